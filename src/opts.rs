use std::time::Duration;

use serde::Serialize;

use crate::Result;

/// Default minimum gap between repeated announcements of an unchanged direction.
pub const DEFAULT_SPEAK_INTERVAL: Duration = Duration::from_secs(3);

/// Default speech rate in words per minute.
pub const DEFAULT_SPEECH_RATE_WPM: u32 = 150;

/// Default JPEG quality for the outbound stream.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Options that control how the navigation pipeline behaves.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The binaries are responsible for mapping user input into this type so that:
/// - the library remains reusable outside of a CLI context
/// - tests can construct options programmatically
#[derive(Debug, Clone, Serialize)]
pub struct Opts {
    /// Minimum time before an unchanged direction is spoken again.
    pub speak_interval: Duration,

    /// Fraction of the frame width where the left band ends.
    pub left_boundary: f32,

    /// Fraction of the frame width where the center band ends.
    pub right_boundary: f32,

    /// Quality (1..=100) used when compressing annotated frames.
    pub jpeg_quality: u8,

    /// Speech rate handed to the synthesizer, in words per minute.
    pub speech_rate_wpm: u32,

    /// Deadline for a single capture call. `None` waits forever.
    pub capture_timeout: Option<Duration>,

    /// Deadline for a single detection call. `None` waits forever.
    pub detect_timeout: Option<Duration>,

    /// Deadline for a single spoken announcement. `None` waits forever.
    pub speech_timeout: Option<Duration>,

    /// Skip frames whose detection fails instead of ending the stream.
    pub skip_failed_detections: bool,

    /// Pending announcements allowed before new ones are dropped.
    pub announce_queue_depth: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            speak_interval: DEFAULT_SPEAK_INTERVAL,
            left_boundary: 1.0 / 3.0,
            right_boundary: 2.0 / 3.0,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            speech_rate_wpm: DEFAULT_SPEECH_RATE_WPM,
            capture_timeout: Some(Duration::from_secs(5)),
            detect_timeout: Some(Duration::from_secs(10)),
            speech_timeout: Some(Duration::from_secs(15)),
            skip_failed_detections: false,
            announce_queue_depth: 4,
        }
    }
}

impl Opts {
    /// Reject option combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let (left, right) = (self.left_boundary, self.right_boundary);
        if !(left > 0.0 && left < right && right < 1.0) {
            return Err(crate::Error::msg(format!(
                "zone boundaries must satisfy 0 < left < right < 1 (got {left}, {right})"
            )));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(crate::Error::msg(format!(
                "jpeg quality must be between 1 and 100 (got {})",
                self.jpeg_quality
            )));
        }

        if self.speech_rate_wpm == 0 {
            return Err(crate::Error::msg("speech rate must be non-zero"));
        }

        if self.announce_queue_depth == 0 {
            return Err(crate::Error::msg("announce queue depth must be non-zero"));
        }

        Ok(())
    }
}
