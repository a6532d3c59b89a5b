use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use pathcue::backends::command_speech::CommandSpeechEngine;
use pathcue::backends::yolo::{YoloConfig, YoloDetector};
use pathcue::capture::ImageSequenceSource;
use pathcue::deadline::{TimedDetector, TimedSource};
use pathcue::detector::StaticDetector;
use pathcue::speech::SilentSpeechEngine;
use pathcue::{
    Announcer, Detector, FrameSource, MultipartEncoder, Opts, Pipeline, RunSummary, SpeechEngine,
};

fn main() -> Result<()> {
    pathcue::init_logging();
    let params = Params::parse();
    let opts = params.opts()?;

    let source = open_source(&params)?;
    let detector = load_detector(&params)?;

    let engine: Box<dyn SpeechEngine> = match params.speech {
        SpeechChoice::Auto => Box::new(CommandSpeechEngine::platform_default(
            opts.speech_rate_wpm,
            opts.speech_timeout,
        )),
        SpeechChoice::Silent => Box::new(SilentSpeechEngine),
    };
    let announcer = Announcer::spawn(engine, opts.announce_queue_depth)
        .context("failed to start the announcer")?;

    let writer: Box<dyn Write> = match &params.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("failed to create output file '{}'", path.display())
        })?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut encoder = MultipartEncoder::new(writer, opts.jpeg_quality);

    let source = TimedSource::new(source, opts.capture_timeout)?;
    let detector = TimedDetector::new(detector, opts.detect_timeout)?;
    let mut pipeline = Pipeline::new(source, detector, announcer.handle(), opts)?;

    let summary = pipeline.run(&mut encoder)?;
    drop(pipeline);

    // Let queued announcements finish before exiting.
    announcer.shutdown();

    print_summary(&summary)?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "pathcue")]
#[command(about = "Run the navigation pipeline and write a multipart JPEG stream")]
struct Params {
    /// Directory of png/jpeg frames, read in file-name order.
    #[arg(short = 'i', long = "images", conflicts_with = "camera")]
    images: Option<PathBuf>,

    /// Camera device index (requires the `camera` feature).
    #[arg(long = "camera")]
    camera: Option<i32>,

    /// Path to a YOLOv8-style ONNX model. Without one, nothing is ever detected.
    #[arg(short = 'm', long = "model")]
    model_path: Option<PathBuf>,

    #[arg(long = "confidence", default_value_t = 0.25)]
    confidence: f32,

    #[arg(long = "iou", default_value_t = 0.45)]
    iou: f32,

    /// Write the stream here instead of stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Seconds before an unchanged direction is spoken again.
    #[arg(long = "speak-interval", default_value_t = 3.0)]
    speak_interval_secs: f64,

    #[arg(long = "speech", value_enum, default_value_t = SpeechChoice::Auto)]
    speech: SpeechChoice,

    #[arg(long = "speech-rate", default_value_t = pathcue::opts::DEFAULT_SPEECH_RATE_WPM)]
    speech_rate: u32,

    #[arg(long = "jpeg-quality", default_value_t = pathcue::opts::DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,

    #[arg(long = "skip-failed-detections", default_value_t = false)]
    skip_failed_detections: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SpeechChoice {
    Auto,
    Silent,
}

impl Params {
    fn opts(&self) -> Result<Opts> {
        let opts = Opts {
            speak_interval: Duration::try_from_secs_f64(self.speak_interval_secs)
                .context("invalid --speak-interval")?,
            jpeg_quality: self.jpeg_quality,
            speech_rate_wpm: self.speech_rate,
            skip_failed_detections: self.skip_failed_detections,
            ..Opts::default()
        };
        opts.validate()?;
        Ok(opts)
    }
}

fn open_source(params: &Params) -> Result<Box<dyn FrameSource + Send>> {
    if let Some(dir) = &params.images {
        return Ok(Box::new(ImageSequenceSource::open(dir)?));
    }
    open_camera(params.camera.unwrap_or(0))
}

#[cfg(feature = "camera")]
fn open_camera(device_index: i32) -> Result<Box<dyn FrameSource + Send>> {
    use pathcue::backends::opencv_camera::{CameraConfig, OpenCvCamera};

    let camera = OpenCvCamera::open(CameraConfig {
        device_index,
        ..CameraConfig::default()
    })?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_device_index: i32) -> Result<Box<dyn FrameSource + Send>> {
    anyhow::bail!("camera input needs the `camera` feature; pass --images <dir> instead")
}

fn load_detector(params: &Params) -> Result<Box<dyn Detector + Send>> {
    let Some(model_path) = &params.model_path else {
        return Ok(Box::new(StaticDetector::default()));
    };

    let cfg = YoloConfig {
        confidence_threshold: params.confidence,
        iou_threshold: params.iou,
        ..YoloConfig::default()
    };
    Ok(Box::new(YoloDetector::with_config(model_path, cfg)?))
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    let mut stderr = io::stderr().lock();
    serde_json::to_writer(&mut stderr, summary)?;
    writeln!(stderr)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_into_valid_opts() -> anyhow::Result<()> {
        let params = Params::try_parse_from(["pathcue", "--images", "frames"])?;
        let opts = params.opts()?;
        assert_eq!(opts.speak_interval, Duration::from_secs(3));
        assert_eq!(params.speech, SpeechChoice::Auto);
        assert!(params.output.is_none());
        Ok(())
    }

    #[test]
    fn images_and_camera_conflict() {
        let res = Params::try_parse_from(["pathcue", "--images", "frames", "--camera", "0"]);
        assert!(res.is_err());
    }

    #[test]
    fn negative_speak_interval_is_rejected() -> anyhow::Result<()> {
        let params = Params::try_parse_from(["pathcue", "--speak-interval=-1"])?;
        assert!(params.opts().is_err());
        Ok(())
    }
}
