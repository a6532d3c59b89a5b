use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use pathcue::capture::{ImageSequenceSource, SharedCapture, VecSource};
use pathcue::deadline::{TimedDetector, TimedSource};
use pathcue::detector::{SharedDetector, StaticDetector};
use pathcue::{
    Announcer, Detection, Detector, Direction, EndReason, Frame, MultipartEncoder, Opts,
    Pipeline, PipelineState, SpeechEngine,
};

const CHUNK_HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

#[derive(Clone, Default)]
struct Recording(Arc<Mutex<Vec<String>>>);

impl Recording {
    fn spoken(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl SpeechEngine for Recording {
    fn speak(&mut self, text: &str) -> pathcue::Result<()> {
        self.0.lock().unwrap().push(text.to_owned());
        Ok(())
    }
}

struct Broken;

impl SpeechEngine for Broken {
    fn speak(&mut self, _text: &str) -> pathcue::Result<()> {
        Err(pathcue::Error::Speech("no audio device".to_owned()))
    }
}

/// Returns one scripted detection set per frame.
struct Scripted(std::vec::IntoIter<Vec<Detection>>);

impl Scripted {
    fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self(frames.into_iter())
    }
}

impl Detector for Scripted {
    fn infer(&mut self, _frame: &Frame) -> pathcue::Result<Vec<Detection>> {
        Ok(self.0.next().unwrap_or_default())
    }
}

/// Accepts `limit` writes, then fails like a closed socket.
struct HangsUpAfter {
    limit: usize,
    writes: usize,
}

impl Write for HangsUpAfter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.writes >= self.limit {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "viewer left"));
        }
        self.writes += 1;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn blank_frames(n: usize) -> VecSource {
    VecSource::new((0..n).map(|_| Frame::filled(300, 90, [0, 0, 0])))
}

fn at(cx: f32) -> Detection {
    Detection::centered_at(cx, 20.0, 10.0, 60.0)
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[test]
fn direction_changes_are_spoken_in_frame_order() -> anyhow::Result<()> {
    let spoken = Recording::default();
    let announcer = Announcer::spawn(spoken.clone(), 8)?;

    // Forward, left, left again (debounced), right, stop.
    let detector = Scripted::new(vec![
        vec![],
        vec![at(150.0)],
        vec![at(150.0)],
        vec![at(50.0), at(150.0)],
        vec![at(50.0), at(150.0), at(250.0)],
    ]);
    let mut pipeline =
        Pipeline::new(blank_frames(5), detector, announcer.handle(), Opts::default())?;

    let mut out = Vec::new();
    let summary = pipeline.run(&mut MultipartEncoder::new(&mut out, 80))?;
    assert_eq!(summary.frames, 5);
    assert_eq!(summary.announcements, 4);
    assert_eq!(summary.end, EndReason::CaptureExhausted);
    assert_eq!(pipeline.state(), PipelineState::Ended);
    assert_eq!(count(&out, CHUNK_HEAD), 5);

    drop(pipeline);
    announcer.shutdown();
    assert_eq!(
        spoken.spoken(),
        vec!["Move Forward", "Move Left", "Move Right", "Stop"]
    );
    Ok(())
}

/// Blocks every `speak` call until the gate is released.
struct Stuck {
    gate: Arc<Mutex<()>>,
    spoken: Recording,
}

impl SpeechEngine for Stuck {
    fn speak(&mut self, text: &str) -> pathcue::Result<()> {
        let _open = self.gate.lock().unwrap();
        self.spoken.speak(text)
    }
}

#[test]
fn latest_direction_is_spoken_even_when_speech_lags() -> anyhow::Result<()> {
    let spoken = Recording::default();
    let gate = Arc::new(Mutex::new(()));
    let closed = gate.lock().unwrap();
    let engine = Stuck {
        gate: Arc::clone(&gate),
        spoken: spoken.clone(),
    };
    let announcer = Announcer::spawn(engine, 1)?;

    let detector = Scripted::new(vec![
        vec![],
        vec![at(150.0)],
        vec![],
        vec![at(50.0), at(150.0), at(250.0)],
        vec![at(50.0), at(150.0), at(250.0)],
        vec![at(50.0), at(150.0), at(250.0)],
    ]);
    let mut pipeline =
        Pipeline::new(blank_frames(6), detector, announcer.handle(), Opts::default())?;

    let mut out = Vec::new();
    let summary = pipeline.run(&mut MultipartEncoder::new(&mut out, 80))?;
    assert_eq!(summary.frames, 6);

    drop(closed);
    drop(pipeline);
    announcer.shutdown();

    let spoken = spoken.spoken();
    assert_eq!(spoken.last().map(String::as_str), Some("Stop"));
    assert!(spoken.len() <= 2, "stale directions were spoken: {spoken:?}");
    Ok(())
}

#[test]
fn speech_failures_never_interrupt_the_stream() -> anyhow::Result<()> {
    let announcer = Announcer::spawn(Broken, 4)?;
    let detector = Scripted::new(vec![vec![], vec![at(150.0)], vec![]]);
    let mut pipeline =
        Pipeline::new(blank_frames(3), detector, announcer.handle(), Opts::default())?;

    let mut out = Vec::new();
    let summary = pipeline.run(&mut MultipartEncoder::new(&mut out, 80))?;
    assert_eq!(summary.frames, 3);
    assert_eq!(count(&out, CHUNK_HEAD), 3);
    Ok(())
}

#[test]
fn viewer_disconnect_ends_the_loop_gracefully() -> anyhow::Result<()> {
    let announcer = Announcer::spawn(Recording::default(), 4)?;
    let mut pipeline = Pipeline::new(
        blank_frames(10),
        StaticDetector::default(),
        announcer.handle(),
        Opts::default(),
    )?;

    let writer = HangsUpAfter {
        limit: 2,
        writes: 0,
    };
    let summary = pipeline.run(&mut MultipartEncoder::new(writer, 80))?;
    assert_eq!(summary.end, EndReason::Disconnected);
    assert!(summary.frames < 10);
    assert_eq!(pipeline.state(), PipelineState::Ended);
    Ok(())
}

#[test]
fn image_directory_streams_through_deadline_wrappers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    for i in 0..3u8 {
        Frame::filled(300, 90, [i * 40, 0, 0])
            .image()
            .save(dir.path().join(format!("frame-{i:03}.png")))?;
    }

    let opts = Opts::default();
    let source = TimedSource::new(ImageSequenceSource::open(dir.path())?, opts.capture_timeout)?;
    let detector = TimedDetector::new(
        StaticDetector::new(vec![at(250.0)]),
        opts.detect_timeout,
    )?;
    let announcer = Announcer::spawn(Recording::default(), 4)?;
    let mut pipeline = Pipeline::new(source, detector, announcer.handle(), opts)?;

    let first = pipeline.step()?.expect("first frame");
    assert_eq!(first.direction, Direction::Forward);
    assert!(first.zones.right && !first.zones.center && !first.zones.left);

    let mut out = Vec::new();
    let summary = pipeline.run(&mut MultipartEncoder::new(&mut out, 80))?;
    assert_eq!(summary.frames, 2);
    assert_eq!(count(&out, CHUNK_HEAD), 2);
    Ok(())
}

#[test]
fn viewers_share_one_device_until_the_last_leaves() -> anyhow::Result<()> {
    let capture = SharedCapture::new(|| Ok(blank_frames(4)));
    let detector = SharedDetector::new(StaticDetector::default());
    let announcer = Announcer::spawn(Recording::default(), 4)?;

    let mut a = Pipeline::new(
        capture.lease()?,
        detector.clone(),
        announcer.handle(),
        Opts::default(),
    )?;
    let mut b = Pipeline::new(
        capture.lease()?,
        detector.clone(),
        announcer.handle(),
        Opts::default(),
    )?;
    assert_eq!(capture.active_leases(), 2);

    assert!(a.step()?.is_some());
    assert!(b.step()?.is_some());

    drop(a);
    assert!(capture.is_open());
    assert!(b.step()?.is_some());

    drop(b);
    assert!(!capture.is_open());
    assert_eq!(capture.active_leases(), 0);
    Ok(())
}

#[test]
fn each_pipeline_debounces_independently() -> anyhow::Result<()> {
    let announcer = Announcer::spawn(Recording::default(), 8)?;
    let detector = StaticDetector::new(vec![at(150.0)]);

    let mut a = Pipeline::new(
        blank_frames(2),
        detector.clone(),
        announcer.handle(),
        Opts::default(),
    )?;
    let mut b = Pipeline::new(blank_frames(2), detector, announcer.handle(), Opts::default())?;

    assert!(a.step()?.expect("frame").announced);
    assert!(b.step()?.expect("frame").announced);
    assert!(!a.step()?.expect("frame").announced);
    Ok(())
}
