//! Deadline-aware wrappers around blocking capabilities.
//!
//! Capture devices and detection models can hang. We move the wrapped capability onto its
//! own worker thread and wait for each call with a timeout. When a call misses its deadline
//! the wrapper is marked stalled: the stuck worker is abandoned and every later call fails
//! immediately, which ends the owning pipeline loop instead of freezing it.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::capture::FrameSource;
use crate::detection::Detection;
use crate::detector::Detector;
use crate::frame::Frame;
use crate::{Error, Result};

type Job<T> = Box<dyn FnOnce(&mut T) + Send>;

struct DeadlineWorker<T> {
    jobs: Sender<Job<T>>,
    operation: &'static str,
    timeout: Duration,
    stalled: bool,
}

impl<T: Send + 'static> DeadlineWorker<T> {
    fn spawn(mut inner: T, operation: &'static str, timeout: Duration) -> Result<Self> {
        let (jobs, rx) = mpsc::channel::<Job<T>>();

        thread::Builder::new()
            .name(format!("pathcue-{operation}"))
            .spawn(move || {
                for job in rx {
                    job(&mut inner);
                }
            })?;

        Ok(Self {
            jobs,
            operation,
            timeout,
            stalled: false,
        })
    }

    fn call<R>(&mut self, f: impl FnOnce(&mut T) -> R + Send + 'static) -> Result<R>
    where
        R: Send + 'static,
    {
        if self.stalled {
            return Err(self.timeout_error());
        }

        let (done_tx, done_rx) = mpsc::sync_channel::<R>(1);
        self.jobs
            .send(Box::new(move |inner: &mut T| {
                let _ = done_tx.send(f(inner));
            }))
            .map_err(|_| Error::msg(format!("{} worker is gone", self.operation)))?;

        match done_rx.recv_timeout(self.timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                self.stalled = true;
                warn!(
                    operation = self.operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "call missed its deadline; abandoning worker"
                );
                Err(self.timeout_error())
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::msg(format!("{} worker panicked", self.operation)))
            }
        }
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            operation: self.operation,
            after: self.timeout,
        }
    }
}

enum Guarded<T> {
    Direct(T),
    Worker(DeadlineWorker<T>),
}

impl<T: Send + 'static> Guarded<T> {
    fn new(inner: T, operation: &'static str, timeout: Option<Duration>) -> Result<Self> {
        match timeout {
            Some(timeout) => Ok(Self::Worker(DeadlineWorker::spawn(
                inner, operation, timeout,
            )?)),
            None => Ok(Self::Direct(inner)),
        }
    }
}

/// A [`FrameSource`] whose `read` fails with [`Error::Timeout`] instead of hanging.
pub struct TimedSource<S> {
    inner: Guarded<S>,
}

impl<S: FrameSource + Send + 'static> TimedSource<S> {
    /// Wrap `source`; with `timeout = None` calls go straight through on the caller's thread.
    pub fn new(source: S, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            inner: Guarded::new(source, "capture", timeout)?,
        })
    }
}

impl<S: FrameSource + Send + 'static> FrameSource for TimedSource<S> {
    fn read(&mut self) -> Result<Option<Frame>> {
        match &mut self.inner {
            Guarded::Direct(source) => source.read(),
            Guarded::Worker(worker) => worker.call(|source: &mut S| source.read())?,
        }
    }
}

/// A [`Detector`] whose `infer` fails with [`Error::Timeout`] instead of hanging.
pub struct TimedDetector<D> {
    inner: Guarded<D>,
}

impl<D: Detector + Send + 'static> TimedDetector<D> {
    /// Wrap `detector`; with `timeout = None` calls go straight through on the caller's thread.
    pub fn new(detector: D, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            inner: Guarded::new(detector, "detection", timeout)?,
        })
    }
}

impl<D: Detector + Send + 'static> Detector for TimedDetector<D> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        match &mut self.inner {
            Guarded::Direct(detector) => detector.infer(frame),
            Guarded::Worker(worker) => {
                let frame = frame.clone();
                worker.call(move |detector: &mut D| detector.infer(&frame))?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::VecSource;
    use crate::detector::StaticDetector;
    use std::time::Instant;

    struct Hanging {
        delay: Duration,
    }

    impl FrameSource for Hanging {
        fn read(&mut self) -> Result<Option<Frame>> {
            thread::sleep(self.delay);
            Ok(Some(Frame::filled(2, 2, [0, 0, 0])))
        }
    }

    impl Detector for Hanging {
        fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            thread::sleep(self.delay);
            Ok(Vec::new())
        }
    }

    #[test]
    fn fast_calls_pass_through_the_worker() -> anyhow::Result<()> {
        let frames = vec![Frame::filled(2, 2, [1, 1, 1])];
        let mut source = TimedSource::new(VecSource::new(frames), Some(Duration::from_secs(5)))?;
        assert!(source.read()?.is_some());
        assert!(source.read()?.is_none());

        let det = Detection::from_corners(0.0, 0.0, 1.0, 1.0);
        let mut detector = TimedDetector::new(
            StaticDetector::new(vec![det.clone()]),
            Some(Duration::from_secs(5)),
        )?;
        assert_eq!(detector.infer(&Frame::filled(2, 2, [0, 0, 0]))?, vec![det]);
        Ok(())
    }

    #[test]
    fn hung_capture_times_out_and_stays_stalled() -> anyhow::Result<()> {
        let mut source = TimedSource::new(
            Hanging {
                delay: Duration::from_secs(2),
            },
            Some(Duration::from_millis(50)),
        )?;

        let started = Instant::now();
        let err = source.read().unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "capture", .. }));
        assert!(started.elapsed() < Duration::from_secs(1));

        // Later calls fail fast rather than queueing behind the stuck one.
        let started = Instant::now();
        assert!(source.read().is_err());
        assert!(started.elapsed() < Duration::from_millis(50));
        Ok(())
    }

    #[test]
    fn hung_detection_times_out() -> anyhow::Result<()> {
        let mut detector = TimedDetector::new(
            Hanging {
                delay: Duration::from_secs(2),
            },
            Some(Duration::from_millis(50)),
        )?;
        let err = detector.infer(&Frame::filled(2, 2, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "detection", .. }));
        Ok(())
    }

    #[test]
    fn no_timeout_calls_directly() -> anyhow::Result<()> {
        let mut source = TimedSource::new(VecSource::default(), None)?;
        assert!(source.read()?.is_none());
        Ok(())
    }
}
