//! Frame sources: the capture side of the pipeline.
//!
//! A source yields frames until it is exhausted (`Ok(None)`), which ends the stream cleanly.
//! `Err` is reserved for device failures.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::frame::Frame;
use crate::{Error, Result};

/// File extensions recognized by [`ImageSequenceSource`].
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Produces frames on demand.
pub trait FrameSource {
    /// Return the next frame, or `Ok(None)` once the stream has ended.
    fn read(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Option<Frame>> {
        (**self).read()
    }
}

/// A finite, in-memory list of frames.
#[derive(Debug, Default, Clone)]
pub struct VecSource {
    frames: VecDeque<Frame>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for VecSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Replays a directory of still images as a video stream, in file-name order.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
    served: bool,
    looping: bool,
    frame_interval: Option<Duration>,
}

impl ImageSequenceSource {
    /// Collect every png/jpeg file directly inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|err| {
            Error::Capture(format!("cannot read image directory '{}': {err}", dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(Error::Capture(format!(
                "no png/jpeg images found in '{}'",
                dir.display()
            )));
        }

        paths.sort();
        info!(dir = %dir.display(), frames = paths.len(), "image sequence opened");

        Ok(Self {
            paths,
            next: 0,
            served: false,
            looping: false,
            frame_interval: None,
        })
    }

    /// Start over from the first image instead of ending.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Sleep this long before every frame after the first, to mimic a camera's frame rate.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }

        if let Some(interval) = self.frame_interval {
            if self.served {
                thread::sleep(interval);
            }
        }

        let path = &self.paths[self.next];
        self.next += 1;
        self.served = true;

        debug!(path = %path.display(), "reading frame");
        let image = image::open(path)?.to_rgb8();
        Ok(Some(Frame::new(image)))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

type OpenFn<S> = dyn Fn() -> Result<S> + Send + Sync;

/// One capture device shared by several pipeline loops.
///
/// The device is opened on the first [`SharedCapture::lease`] and dropped (releasing the
/// hardware) when the last outstanding lease goes away. Reads from different leases are
/// serialized; each frame goes to exactly one lease.
///
/// Lease bookkeeping lives behind its own lock, which is never held across a device read,
/// so [`SharedCapture::is_open`] and new leases do not wait on a slow or stuck camera.
pub struct SharedCapture<S> {
    inner: Arc<SharedInner<S>>,
}

struct SharedInner<S> {
    open: Box<OpenFn<S>>,
    state: Mutex<SharedState<S>>,
}

struct SharedState<S> {
    device: Option<Arc<Mutex<S>>>,
    leases: usize,
}

/// A pipeline loop's claim on a [`SharedCapture`] device.
pub struct CaptureLease<S> {
    inner: Arc<SharedInner<S>>,
}

impl<S> Clone for SharedCapture<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> SharedCapture<S> {
    /// `open` is called whenever a lease is taken while the device is closed.
    pub fn new(open: impl Fn() -> Result<S> + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                open: Box::new(open),
                state: Mutex::new(SharedState {
                    device: None,
                    leases: 0,
                }),
            }),
        }
    }

    pub fn lease(&self) -> Result<CaptureLease<S>> {
        let mut state = self.inner.lock();
        if state.device.is_none() {
            state.device = Some(Arc::new(Mutex::new((self.inner.open)()?)));
            info!("capture device opened");
        }
        state.leases += 1;

        Ok(CaptureLease {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn active_leases(&self) -> usize {
        self.inner.lock().leases
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().device.is_some()
    }
}

impl<S> SharedInner<S> {
    fn lock(&self) -> MutexGuard<'_, SharedState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: FrameSource> FrameSource for CaptureLease<S> {
    fn read(&mut self) -> Result<Option<Frame>> {
        let Some(device) = self.inner.lock().device.clone() else {
            return Ok(None);
        };
        let mut guard = device.lock().unwrap_or_else(PoisonError::into_inner);
        guard.read()
    }
}

impl<S> Drop for CaptureLease<S> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.leases = state.leases.saturating_sub(1);
        if state.leases == 0 && state.device.take().is_some() {
            info!("capture device released");
        }
    }
}
