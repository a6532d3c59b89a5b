//! Decides when a direction is worth saying out loud.

use std::time::{Duration, Instant};

use crate::direction::Direction;

/// The last spoken direction and when it was spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceState {
    pub last_direction: Option<Direction>,
    pub last_spoken_at: Instant,
}

/// Gate that suppresses repeats of an unchanged direction within `speak_interval`.
///
/// The pipeline driver owns this and is its only writer. State is updated at the moment
/// the decision to speak is made, before the announcement is handed off, so the next frame
/// already sees the new direction even while the previous one is still being spoken.
#[derive(Debug, Clone)]
pub struct SpeechDebouncer {
    speak_interval: Duration,
    state: DebounceState,
}

impl SpeechDebouncer {
    /// A debouncer that has spoken nothing yet, with its clock started at `now`.
    pub fn new(speak_interval: Duration, now: Instant) -> Self {
        Self {
            speak_interval,
            state: DebounceState {
                last_direction: None,
                last_spoken_at: now,
            },
        }
    }

    /// Return `true` if `direction` should be announced at `now`, recording it if so.
    ///
    /// Announces on any change of direction, or once strictly more than `speak_interval`
    /// has passed since the last announcement. Leaves the state untouched otherwise.
    pub fn should_announce(&mut self, direction: Direction, now: Instant) -> bool {
        let changed = self.state.last_direction != Some(direction);
        let elapsed = now.saturating_duration_since(self.state.last_spoken_at);

        if !changed && elapsed <= self.speak_interval {
            return false;
        }

        self.state = DebounceState {
            last_direction: Some(direction),
            last_spoken_at: now,
        };
        true
    }

    pub fn state(&self) -> &DebounceState {
        &self.state
    }

    pub fn speak_interval(&self) -> Duration {
        self.speak_interval
    }
}
