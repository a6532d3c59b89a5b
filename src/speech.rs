use tracing::info;

use crate::Result;

/// Text-to-speech capability used by the [`crate::announcer::Announcer`] worker.
///
/// `speak` blocks until playback completes (or fails). Engines never run on the frame loop:
/// the announcer owns its engine on a dedicated thread and calls it one text at a time, so
/// implementations do not need to be reentrant.
pub trait SpeechEngine: Send {
    fn speak(&mut self, text: &str) -> Result<()>;
}

impl<E: SpeechEngine + ?Sized> SpeechEngine for Box<E> {
    fn speak(&mut self, text: &str) -> Result<()> {
        (**self).speak(text)
    }
}

/// An engine that only logs what it would have said.
///
/// Useful on headless hosts with no audio device.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeechEngine;

impl SpeechEngine for SilentSpeechEngine {
    fn speak(&mut self, text: &str) -> Result<()> {
        info!(%text, "announcement (silent)");
        Ok(())
    }
}
