use std::fmt;
use std::path::PathBuf;
use serde::Serialize;
use thiserror::Error;
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("instrument connection failed: {0}")]
    Connection(String),
    #[error("instrument i/o failed during `{command}`")]
    Transport {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("measurement script {path:?} is missing or unreadable")]
    ScriptMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("script upload failed at `{command}`")]
    ScriptUpload {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed response from buffer {buffer}: token {index} ({token:?}) is not a number")]
    MalformedBuffer {
        buffer: String,
        index: usize,
        token: String,
    },
    #[error("invalid sweep parameters: {0}")]
    Validation(String),
    #[error("channel {key} has {actual} samples, dataset length is {expected}")]
    LengthMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
    #[error("failed to write {path:?}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
/// Coarse classification reported at the run boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ConnectionError,
    ScriptError,
    ProtocolError,
    ValidationError,
    ProcessingError,
    PersistError,
}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::ScriptError => "ScriptError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ProcessingError => "ProcessingError",
            ErrorKind::PersistError => "PersistError",
        };
        f.write_str(name)
    }
}
impl MeasurementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeasurementError::Connection(_) | MeasurementError::Transport { .. } => {
                ErrorKind::ConnectionError
            }
            MeasurementError::ScriptMissing { .. } | MeasurementError::ScriptUpload { .. } => {
                ErrorKind::ScriptError
            }
            MeasurementError::MalformedBuffer { .. } => ErrorKind::ProtocolError,
            MeasurementError::Validation(_) => ErrorKind::ValidationError,
            MeasurementError::LengthMismatch { .. } => ErrorKind::ProcessingError,
            MeasurementError::Persist { .. } => ErrorKind::PersistError,
        }
    }
    pub fn validation(message: impl Into<String>) -> Self {
        MeasurementError::Validation(message.into())
    }
}
