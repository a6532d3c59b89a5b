use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::speech::SpeechEngine;
use crate::{Error, Result};

/// How often we check whether the synthesizer process has exited.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A [`SpeechEngine`] that runs an external synthesizer program once per announcement.
///
/// The text is always passed as a single trailing argument (never through a shell), and the
/// child is killed if it has not finished within the configured deadline.
#[derive(Debug, Clone)]
pub struct CommandSpeechEngine {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandSpeechEngine {
    /// Use the platform's stock synthesizer: `say` on macOS, `espeak-ng` elsewhere.
    pub fn platform_default(rate_wpm: u32, timeout: Option<Duration>) -> Self {
        let rate = rate_wpm.to_string();
        if cfg!(target_os = "macos") {
            Self::custom("say", ["-r".to_owned(), rate], timeout)
        } else {
            Self::custom("espeak-ng", ["-s".to_owned(), rate], timeout)
        }
    }

    /// Run `program args... <text>` for every announcement.
    pub fn custom(
        program: impl Into<String>,
        args: impl IntoIterator<Item = String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl SpeechEngine for CommandSpeechEngine {
    fn speak(&mut self, text: &str) -> Result<()> {
        let text = sanitize(text);
        if text.is_empty() {
            return Ok(());
        }

        let child = self
            .command(&text)
            .spawn()
            .map_err(|err| Error::Speech(format!("failed to run '{}': {err}", self.program)))?;

        let status = wait_with_deadline(child, self.timeout)?;
        if !status.success() {
            return Err(Error::Speech(format!("'{}' exited with {status}", self.program)));
        }

        debug!(program = %self.program, %text, "spoken");
        Ok(())
    }
}

/// Strip control characters so a label can never smuggle extra lines into the synthesizer.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_owned()
}

fn wait_with_deadline(mut child: Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Timeout {
                operation: "speech",
                after: timeout,
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_control_characters() {
        assert_eq!(sanitize(" Move\nLeft\r\u{7} "), "MoveLeft");
        assert_eq!(sanitize("Stop"), "Stop");
    }

    #[test]
    fn successful_program_speaks() -> anyhow::Result<()> {
        let mut engine = CommandSpeechEngine::custom(
            "true",
            Vec::<String>::new(),
            Some(Duration::from_secs(5)),
        );
        engine.speak("Move Forward")?;
        Ok(())
    }

    #[test]
    fn failing_program_reports_a_speech_error() {
        let mut engine = CommandSpeechEngine::custom("false", Vec::<String>::new(), None);
        let err = engine.speak("Stop").unwrap_err();
        assert!(matches!(err, Error::Speech(_)), "unexpected error: {err}");
    }

    #[test]
    fn missing_program_reports_a_speech_error() {
        let mut engine = CommandSpeechEngine::custom(
            "pathcue-no-such-synthesizer",
            Vec::<String>::new(),
            None,
        );
        let err = engine.speak("Stop").unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }

    #[test]
    fn slow_program_is_killed_at_the_deadline() {
        // `sleep 5 <text>` fails on the trailing argument on some platforms, so wrap in sh.
        let mut engine = CommandSpeechEngine::custom(
            "sh",
            ["-c".to_owned(), "sleep 5".to_owned()],
            Some(Duration::from_millis(100)),
        );
        let started = Instant::now();
        let err = engine.speak("Stop").unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "speech", .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn platform_default_passes_the_rate() {
        let engine = CommandSpeechEngine::platform_default(150, None);
        assert!(engine.args.contains(&"150".to_owned()));
    }
}
