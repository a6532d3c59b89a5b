use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Pathcue's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Pathcue's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    /// The capture device failed (distinct from a clean end-of-stream, which is `Ok(None)`).
    #[error("capture failed: {0}")]
    Capture(String),

    #[error("detection failed: {0}")]
    Detection(String),

    #[error("speech failed: {0}")]
    Speech(String),

    #[error("annotation failed: {0}")]
    Annotation(String),

    /// A capability call did not return within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Whether this error came from the downstream writer going away.
    ///
    /// Broken pipes and resets are the ordinary way a viewer disconnects mid-stream.
    pub fn is_disconnect(&self) -> bool {
        let Self::Other(err) = self else {
            return false;
        };
        err.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::WriteZero
            )
        })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
