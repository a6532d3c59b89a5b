use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::from_fn;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};

mod metrics;

use pathcue::backends::command_speech::CommandSpeechEngine;
use pathcue::backends::yolo::{YoloConfig, YoloDetector};
use pathcue::capture::{CaptureLease, ImageSequenceSource, SharedCapture};
use pathcue::deadline::{TimedDetector, TimedSource};
use pathcue::detector::{SharedDetector, StaticDetector};
use pathcue::speech::SilentSpeechEngine;
use pathcue::stream_encoder::{self, CONTENT_TYPE};
use pathcue::{
    Announcer, AnnouncerHandle, Detector, Frame, FrameEncoder, FrameSource, Opts, Pipeline,
    SpeechEngine,
};

type BoxedSource = Box<dyn FrameSource + Send>;
type BoxedDetector = Box<dyn Detector + Send>;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Path Planning Assistant</title>
    <style>
        body {
            background-color: #f4f4f4;
            font-family: Arial, sans-serif;
            text-align: center;
            padding: 20px;
        }
        h1 {
            color: #333;
            margin-bottom: 20px;
        }
        .video-container {
            display: inline-block;
            border: 4px solid #333;
            box-shadow: 0 0 15px rgba(0,0,0,0.3);
        }
        img {
            width: 800px;
            height: auto;
        }
        footer {
            margin-top: 30px;
            color: #777;
        }
    </style>
</head>
<body>
    <h1>Live Navigation Feed</h1>
    <div class="video-container">
        <img src="/video_feed" alt="Live Feed">
    </div>
    <footer>
        <p>Real-time Object Detection &amp; Navigation</p>
    </footer>
</body>
</html>
"#;

#[derive(Parser, Debug)]
#[command(name = "pathcue-server")]
#[command(about = "Stream annotated navigation video and speak directions")]
struct Params {
    /// Directory of png/jpeg frames to replay instead of a camera.
    #[arg(long = "images", conflicts_with = "camera")]
    images: Option<PathBuf>,

    /// Replay `--images` forever.
    #[arg(long = "loop", requires = "images")]
    loop_images: bool,

    /// Delay between replayed frames, in milliseconds.
    #[arg(long = "frame-interval-ms", default_value_t = 33)]
    frame_interval_ms: u64,

    /// Camera device index (requires the `camera` feature).
    #[arg(long = "camera")]
    camera: Option<i32>,

    /// Path to a YOLOv8-style ONNX model. Without one, nothing is ever detected.
    #[arg(short = 'm', long = "model")]
    model_path: Option<PathBuf>,

    /// Minimum detection confidence.
    #[arg(long = "confidence", default_value_t = 0.25)]
    confidence: f32,

    /// Overlap threshold for non-max suppression.
    #[arg(long = "iou", default_value_t = 0.45)]
    iou: f32,

    /// Seconds before an unchanged direction is spoken again.
    #[arg(long = "speak-interval", default_value_t = 3.0)]
    speak_interval_secs: f64,

    /// How announcements are voiced.
    #[arg(long = "speech", value_enum, default_value_t = SpeechChoice::Auto)]
    speech: SpeechChoice,

    /// Speech rate in words per minute.
    #[arg(long = "speech-rate", default_value_t = pathcue::opts::DEFAULT_SPEECH_RATE_WPM)]
    speech_rate: u32,

    /// JPEG quality (1-100) of streamed frames.
    #[arg(long = "jpeg-quality", default_value_t = pathcue::opts::DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,

    /// Skip frames whose detection fails instead of ending the stream.
    #[arg(long = "skip-failed-detections")]
    skip_failed_detections: bool,

    /// Host interface to bind to.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 5000)]
    port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SpeechChoice {
    /// `say` on macOS, `espeak-ng` elsewhere.
    Auto,
    /// Log announcements without producing audio.
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

#[derive(Clone)]
struct AppState {
    capture: SharedCapture<BoxedSource>,
    detector: SharedDetector<BoxedDetector>,
    announcer: AnnouncerHandle,
    opts: Arc<Opts>,
    viewers: Arc<AtomicUsize>,
}

#[derive(Debug, Serialize)]
struct StatusResponse<'a> {
    active_viewers: usize,
    capture_open: bool,
    opts: &'a Opts,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    pathcue::init_logging();

    if let Err(err) = run().await {
        error!(error = ?err, "pathcue-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();
    let opts = params.opts()?;

    if let Err(err) = metrics::init() {
        warn!(error = ?err, "metrics disabled (init failed)");
    }

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let capture = SharedCapture::new(source_opener(&params)?);
    let detector = SharedDetector::new(load_detector(&params)?);

    let engine: Box<dyn SpeechEngine> = match params.speech {
        SpeechChoice::Auto => Box::new(CommandSpeechEngine::platform_default(
            opts.speech_rate_wpm,
            opts.speech_timeout,
        )),
        SpeechChoice::Silent => Box::new(SilentSpeechEngine),
    };
    let announcer = Announcer::spawn(engine, opts.announce_queue_depth)
        .context("failed to start the announcer")?;

    let state = AppState {
        capture,
        detector,
        announcer: announcer.handle(),
        opts: Arc::new(opts),
        viewers: Arc::new(AtomicUsize::new(0)),
    };

    let app = router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(
                DefaultMakeSpan::new()
                    .level(Level::INFO)
                    .include_headers(false),
            )
            .on_response(DefaultOnResponse::new().level(Level::INFO))
            .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
    );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/v1/status", get(status))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

type Opener = Box<dyn Fn() -> pathcue::Result<BoxedSource> + Send + Sync>;

/// How to (re)open the capture device whenever the first viewer arrives.
fn source_opener(params: &Params) -> Result<Opener> {
    if let Some(dir) = params.images.clone() {
        // Fail at startup rather than on the first request.
        ImageSequenceSource::open(&dir)?;

        let looping = params.loop_images;
        let interval = Duration::from_millis(params.frame_interval_ms);
        return Ok(Box::new(move || {
            let source = ImageSequenceSource::open(&dir)?
                .looping(looping)
                .with_frame_interval(interval);
            Ok(Box::new(source) as BoxedSource)
        }));
    }

    camera_opener(params.camera.unwrap_or(0))
}

#[cfg(feature = "camera")]
fn camera_opener(device_index: i32) -> Result<Opener> {
    use pathcue::backends::opencv_camera::{CameraConfig, OpenCvCamera};

    Ok(Box::new(move || {
        let camera = OpenCvCamera::open(CameraConfig {
            device_index,
            ..CameraConfig::default()
        })?;
        Ok(Box::new(camera) as BoxedSource)
    }))
}

#[cfg(not(feature = "camera"))]
fn camera_opener(_device_index: i32) -> Result<Opener> {
    anyhow::bail!("camera input needs the `camera` feature; pass --images <dir> instead")
}

fn load_detector(params: &Params) -> Result<BoxedDetector> {
    let Some(model_path) = &params.model_path else {
        warn!("no --model given; every frame will read as clear");
        return Ok(Box::new(StaticDetector::default()));
    };

    let cfg = YoloConfig {
        confidence_threshold: params.confidence,
        iou_threshold: params.iou,
        ..YoloConfig::default()
    };
    let detector = YoloDetector::with_config(model_path, cfg)?;
    Ok(Box::new(detector))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Response {
    Json(StatusResponse {
        active_viewers: state.viewers.load(Ordering::SeqCst),
        capture_open: state.capture.is_open(),
        opts: &state.opts,
    })
    .into_response()
}

/// Start a pipeline loop for this viewer and stream its chunks as the response body.
async fn video_feed(State(state): State<AppState>) -> std::result::Result<Response, AppError> {
    let capture = state.capture.clone();
    let lease = tokio::task::spawn_blocking(move || capture.lease())
        .await
        .map_err(|err| AppError::internal(err.to_string()))?
        .map_err(|err| AppError::unavailable(err.to_string()))?;

    // One chunk in flight: a slow viewer stalls its own loop instead of queueing frames.
    let (tx, rx) = mpsc::channel::<Bytes>(1);
    tokio::task::spawn_blocking(move || stream_viewer(state, lease, tx));

    let body_stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<Bytes, Infallible>(chunk), rx))
    });

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE))],
        Body::from_stream(body_stream),
    )
        .into_response())
}

fn stream_viewer(state: AppState, lease: CaptureLease<BoxedSource>, tx: mpsc::Sender<Bytes>) {
    let viewer = ViewerGuard::new(Arc::clone(&state.viewers));
    let mut encoder = ChannelEncoder::new(tx, state.opts.jpeg_quality);

    let pipeline = TimedSource::new(lease, state.opts.capture_timeout).and_then(|source| {
        let detector = TimedDetector::new(state.detector.clone(), state.opts.detect_timeout)?;
        Pipeline::new(
            source,
            detector,
            state.announcer.clone(),
            (*state.opts).clone(),
        )
    });

    let mut pipeline = match pipeline {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!(error = %err, "failed to start viewer pipeline");
            return;
        }
    };

    match pipeline.run_observed(&mut encoder, |outcome| {
        metrics::record_frame();
        if outcome.announced {
            metrics::record_announcement(outcome.direction);
        }
    }) {
        Ok(summary) => info!(
            stream_id = %summary.stream_id,
            frames = summary.frames,
            announcements = summary.announcements,
            end = ?summary.end,
            "viewer stream ended"
        ),
        Err(err) => error!(error = %err, "viewer stream failed"),
    }

    // Release the device and the viewer slot before the body ends.
    drop(pipeline);
    drop(viewer);
    drop(encoder);
}

/// Counts a viewer for as long as its loop runs.
struct ViewerGuard {
    viewers: Arc<AtomicUsize>,
}

impl ViewerGuard {
    fn new(viewers: Arc<AtomicUsize>) -> Self {
        viewers.fetch_add(1, Ordering::SeqCst);
        metrics::viewer_started();
        Self { viewers }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.viewers.fetch_sub(1, Ordering::SeqCst);
        metrics::viewer_finished();
    }
}

/// Sends each frame as a multipart chunk to the response body.
struct ChannelEncoder {
    tx: mpsc::Sender<Bytes>,
    quality: u8,
}

impl ChannelEncoder {
    fn new(tx: mpsc::Sender<Bytes>, quality: u8) -> Self {
        Self { tx, quality }
    }
}

impl FrameEncoder for ChannelEncoder {
    fn write_frame(&mut self, frame: &Frame) -> pathcue::Result<()> {
        let jpeg = stream_encoder::encode_jpeg(frame, self.quality)?;
        self.tx
            .blocking_send(Bytes::from(stream_encoder::multipart_chunk(&jpeg)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "viewer disconnected"))?;
        Ok(())
    }

    fn close(&mut self) -> pathcue::Result<()> {
        Ok(())
    }
}
