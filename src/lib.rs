//! `pathcue` — an assistive navigation pipeline for live video.
//!
//! Each frame is run through an object detector, detections are sorted into left, center
//! and right bands, and the occupancy decides a spoken recommendation: move forward, left,
//! right, or stop. Announcements are debounced and spoken off the frame loop, while the
//! annotated frames are streamed out as `multipart/x-mixed-replace` JPEG.
//!
//! The capture device, detection model and speech synthesizer are capabilities behind
//! traits ([`FrameSource`], [`Detector`], [`SpeechEngine`]), so the pipeline runs the same
//! against a webcam and a YOLO model as against in-memory frames in tests.

mod error;
pub use error::{Error, Result};

// High-level API (most consumers should start here).
pub mod opts;
pub mod pipeline;

// Data flowing through the loop.
pub mod detection;
pub mod frame;

// Decision logic.
pub mod debounce;
pub mod direction;
pub mod zones;

// Capabilities and the wrappers that bound them.
pub mod capture;
pub mod deadline;
pub mod detector;
pub mod speech;

// Fire-and-forget speech delivery.
pub mod announcer;

// Output side: annotation and stream framing.
pub mod annotate;
pub mod stream_encoder;

// Concrete capture, detection and speech implementations.
pub mod backends;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "logging")]
pub use logging::init as init_logging;

pub use announcer::{Announcer, AnnouncerHandle};
pub use capture::FrameSource;
pub use detection::Detection;
pub use detector::Detector;
pub use direction::Direction;
pub use frame::Frame;
pub use opts::Opts;
pub use pipeline::{EndReason, Pipeline, PipelineState, RunSummary};
pub use speech::SpeechEngine;
pub use stream_encoder::{FrameEncoder, MultipartEncoder};
pub use zones::ZoneStatus;
