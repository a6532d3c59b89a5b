//! The per-viewer frame loop: capture, detect, classify, decide, announce, annotate, encode.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::Result;
use crate::annotate::FrameAnnotator;
use crate::announcer::AnnouncerHandle;
use crate::capture::FrameSource;
use crate::debounce::{DebounceState, SpeechDebouncer};
use crate::detection::Detection;
use crate::detector::Detector;
use crate::direction::Direction;
use crate::frame::Frame;
use crate::opts::Opts;
use crate::stream_encoder::FrameEncoder;
use crate::zones::{ZoneClassifier, ZoneStatus};

/// Where the loop is within the current iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Capturing,
    Detecting,
    Deciding,
    /// Handing the decision to the announcer; never waits on speech.
    Announcing,
    Encoding,
    /// Terminal: the source ran dry, the viewer left, or a step failed.
    Ended,
}

/// Why [`Pipeline::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    CaptureExhausted,
    Disconnected,
}

/// The result of one processed frame.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    /// The input frame with boxes and the direction label drawn on it.
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub zones: ZoneStatus,
    pub direction: Direction,
    /// Whether this frame's direction was handed to the announcer.
    pub announced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stream_id: Uuid,
    pub frames: u64,
    pub announcements: u64,
    pub end: EndReason,
}

/// Per-loop state that survives across iterations.
///
/// Each pipeline owns its own context, so loops for different viewers never share
/// debounce state.
pub struct PipelineContext {
    announcer: AnnouncerHandle,
    debouncer: SpeechDebouncer,
    classifier: ZoneClassifier,
    annotator: FrameAnnotator,
    opts: Opts,
}

impl PipelineContext {
    pub fn new(announcer: AnnouncerHandle, opts: Opts) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            announcer,
            debouncer: SpeechDebouncer::new(opts.speak_interval, Instant::now()),
            classifier: ZoneClassifier::new(opts.left_boundary, opts.right_boundary),
            annotator: FrameAnnotator::default(),
            opts,
        })
    }

    pub fn with_annotator(mut self, annotator: FrameAnnotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn debounce_state(&self) -> &DebounceState {
        self.debouncer.state()
    }
}

/// One navigation loop over a frame source.
pub struct Pipeline<S, D> {
    source: S,
    detector: D,
    ctx: PipelineContext,
    state: PipelineState,
    stream_id: Uuid,
    frames: u64,
    announcements: u64,
}

impl<S: FrameSource, D: Detector> Pipeline<S, D> {
    pub fn new(source: S, detector: D, announcer: AnnouncerHandle, opts: Opts) -> Result<Self> {
        Ok(Self::with_context(
            source,
            detector,
            PipelineContext::new(announcer, opts)?,
        ))
    }

    pub fn with_context(source: S, detector: D, ctx: PipelineContext) -> Self {
        Self {
            source,
            detector,
            ctx,
            state: PipelineState::Idle,
            stream_id: Uuid::new_v4(),
            frames: 0,
            announcements: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Process the next frame.
    ///
    /// Returns `Ok(None)` once the source is exhausted; the pipeline is then `Ended` and
    /// every later call returns `Ok(None)` as well. Capture errors, and detection errors
    /// unless `skip_failed_detections` is set, also end the pipeline.
    pub fn step(&mut self) -> Result<Option<FrameOutcome>> {
        loop {
            if self.state == PipelineState::Ended {
                return Ok(None);
            }

            self.state = PipelineState::Capturing;
            let frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(stream_id = %self.stream_id, frames = self.frames, "capture exhausted");
                    self.state = PipelineState::Ended;
                    return Ok(None);
                }
                Err(err) => return Err(self.fail("capture", err)),
            };

            self.state = PipelineState::Detecting;
            let detections = match self.detector.infer(&frame) {
                Ok(detections) => detections,
                Err(err) if self.ctx.opts.skip_failed_detections => {
                    warn!(
                        stream_id = %self.stream_id,
                        error = %err,
                        "detection failed; skipping frame"
                    );
                    continue;
                }
                Err(err) => return Err(self.fail("detection", err)),
            };

            return self.finish_frame(frame, detections).map(Some);
        }
    }

    fn finish_frame(&mut self, frame: Frame, detections: Vec<Detection>) -> Result<FrameOutcome> {
        self.state = PipelineState::Deciding;
        let zones = self.ctx.classifier.classify(frame.width(), &detections);
        let direction = Direction::decide(&zones);

        // The debouncer records the decision before the text is handed off.
        self.state = PipelineState::Announcing;
        let mut announced = false;
        if self.ctx.debouncer.should_announce(direction, Instant::now()) {
            announced = self.ctx.announcer.announce(direction.label());
            if announced {
                self.announcements += 1;
                info!(stream_id = %self.stream_id, %direction, "announcing");
            }
        }

        self.state = PipelineState::Encoding;
        let annotated = match self.ctx.annotator.annotate(&frame, &detections, direction) {
            Ok(annotated) => annotated,
            Err(err) => return Err(self.fail("annotation", err)),
        };
        self.frames += 1;

        debug!(
            stream_id = %self.stream_id,
            frame = self.frames,
            detections = detections.len(),
            left = zones.left,
            center = zones.center,
            right = zones.right,
            %direction,
            "frame processed"
        );

        Ok(FrameOutcome {
            frame: annotated,
            detections,
            zones,
            direction,
            announced,
        })
    }

    /// Drive the loop to completion, writing every annotated frame to `encoder`.
    pub fn run<E: FrameEncoder>(&mut self, encoder: &mut E) -> Result<RunSummary> {
        self.run_observed(encoder, |_| {})
    }

    /// Like [`Pipeline::run`], calling `observe` after each frame is written.
    ///
    /// A write that fails because the consumer went away ends the run with
    /// [`EndReason::Disconnected`]; other write failures are returned as errors.
    pub fn run_observed<E, F>(&mut self, encoder: &mut E, mut observe: F) -> Result<RunSummary>
    where
        E: FrameEncoder,
        F: FnMut(&FrameOutcome),
    {
        let span = info_span!("pipeline", stream_id = %self.stream_id);
        let _enter = span.enter();

        let (start_frames, start_announcements) = (self.frames, self.announcements);
        let summary = |p: &Self, end: EndReason| RunSummary {
            stream_id: p.stream_id,
            frames: p.frames - start_frames,
            announcements: p.announcements - start_announcements,
            end,
        };

        loop {
            let Some(outcome) = self.step()? else {
                if let Err(err) = encoder.close() {
                    if !err.is_disconnect() {
                        return Err(err);
                    }
                }
                return Ok(summary(&*self, EndReason::CaptureExhausted));
            };

            if let Err(err) = encoder.write_frame(&outcome.frame) {
                self.state = PipelineState::Ended;
                if err.is_disconnect() {
                    info!(frames = self.frames, "viewer disconnected");
                    return Ok(summary(&*self, EndReason::Disconnected));
                }
                error!(error = %err, "encoding failed; ending stream");
                return Err(err);
            }

            observe(&outcome);
        }
    }

    fn fail(&mut self, operation: &str, err: crate::Error) -> crate::Error {
        error!(
            stream_id = %self.stream_id,
            operation,
            error = %err,
            "pipeline step failed; ending stream"
        );
        self.state = PipelineState::Ended;
        err
    }
}
