//! Error types for Conclave Core

use std::time::Duration;

use thiserror::Error;

/// Maximum number of characters of stderr preserved on a process failure.
pub const STDERR_PREVIEW_MAX_CHARS: usize = 500;

/// Core errors for engine supervision and tool policy
#[derive(Error, Debug)]
pub enum Error {
    /// The engine executable could not be started.
    #[error("failed to spawn engine process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine produced no meaningful output before the first-response deadline.
    #[error("engine produced no initial response within {0:?}")]
    InitialTimeout(Duration),

    /// The engine went silent mid-stream for longer than the allowed gap.
    #[error("engine output stalled for longer than {0:?}")]
    InactivityTimeout(Duration),

    /// The engine exited with a nonzero status.
    #[error("engine exited with status {exit_code}: {stderr_preview}")]
    Process {
        exit_code: i32,
        /// First [`STDERR_PREVIEW_MAX_CHARS`] characters of stderr.
        stderr_preview: String,
    },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Process`] from an exit code and the raw stderr text,
    /// truncating the preview to [`STDERR_PREVIEW_MAX_CHARS`] characters.
    pub fn process(exit_code: i32, stderr: &str) -> Self {
        let trimmed = stderr.trim();
        let stderr_preview = if trimmed.chars().count() > STDERR_PREVIEW_MAX_CHARS {
            trimmed.chars().take(STDERR_PREVIEW_MAX_CHARS).collect()
        } else {
            trimmed.to_string()
        };
        Error::Process {
            exit_code,
            stderr_preview,
        }
    }

    /// Whether this error was caused by one of the two supervision timers.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::InitialTimeout(_) | Error::InactivityTimeout(_)
        )
    }
}

/// Result type alias for Conclave Core
pub type Result<T> = std::result::Result<T, Error>;
