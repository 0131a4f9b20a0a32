use std::fmt::{Display, Formatter};

use crate::engine::CodecKind;

/// EINVAL, reported for units of the wrong kind.
pub const EINVAL: i32 = -22;
/// FFERRTAG('I','N','D','A'), reported for malformed payloads.
pub const INVALID_DATA: i32 = -1094995529;
/// Reported by engines asked for an operation they do not implement.
pub const ENOSYS: i32 = -38;

/// An error raised by a codec engine, identified by an engine-specific code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(EINVAL, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(INVALID_DATA, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ENOSYS, message)
    }
}

/// Errors reported synchronously by [`crate::session::Session`].
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("session already opened")]
    AlreadyOpened,
    #[error("session is not open")]
    NotOpen,
    #[error("session is closed")]
    Closed,
    #[error("{kind} session cannot {operation}")]
    WrongDirection {
        kind: CodecKind,
        operation: &'static str,
    },
    #[error("{0} cannot be called from a consumer callback")]
    Reentrant(&'static str),
    #[error("failed to open codec engine: {0}")]
    Open(#[source] EngineError),
    #[error("{context}: {error}")]
    Engine {
        context: &'static str,
        #[source]
        error: EngineError,
    },
    #[error("failed to spawn {0} thread")]
    Spawn(&'static str, #[source] std::io::Error),
}

/// An error detected on the worker thread, delivered on the error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub code: i32,
    pub context: &'static str,
    pub message: String,
}

impl ErrorEvent {
    pub(crate) fn new(context: &'static str, error: EngineError) -> Self {
        Self {
            code: error.code,
            context,
            message: error.message,
        }
    }
}

impl Display for ErrorEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}: {} (code {})", self.context, self.message, self.code)
    }
}
