//! Error types for the unit host.
//!
//! Each layer owns a small error enum; `Error` wraps them all so `?`
//! propagates naturally from the loader up to the CLI.

use std::path::PathBuf;

use thiserror::Error;

/// Message queue construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue capacity {0} is not a power of two of at least 2")]
    InvalidCapacity(usize),
}

/// Failures while opening a unit module. No handle survives any of these.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to open unit module {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("unit module is missing required symbol `{0}`")]
    MissingSymbol(&'static str),

    #[error("malformed unit header: {0}")]
    MalformedHeader(String),

    #[error("unit API version {found:#010x} is not compatible with host API {expected:#010x}")]
    IncompatibleApi { found: u32, expected: u32 },
}

/// Status reported by a unit's initialize callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Target,
    ApiVersion,
    SampleRate,
    Geometry,
    Memory,
    Undefined,
    Other(i8),
}

impl InitStatus {
    /// Decode a non-zero status code returned by `unit_init`.
    pub fn from_code(code: i8) -> Self {
        match code {
            -1 => Self::Target,
            -2 => Self::ApiVersion,
            -4 => Self::SampleRate,
            -8 => Self::Geometry,
            -16 => Self::Memory,
            -32 => Self::Undefined,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for InitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target => write!(f, "target platform/module mismatch"),
            Self::ApiVersion => write!(f, "API version mismatch"),
            Self::SampleRate => write!(f, "unsupported sample rate"),
            Self::Geometry => write!(f, "unsupported buffer geometry"),
            Self::Memory => write!(f, "out of memory"),
            Self::Undefined => write!(f, "undefined error"),
            Self::Other(code) => write!(f, "status code {}", code),
        }
    }
}

/// Errors raised by a unit instance after it was loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("unit rejected the runtime descriptor: {0}")]
    InitFailed(InitStatus),
}

/// Audio backend errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no default {0} device found")]
    NoDefaultDevice(&'static str),

    #[error("{kind} device '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("failed to enumerate devices: {0}")]
    Enumerate(String),

    #[error("failed to query device configuration: {0}")]
    Config(String),

    #[error("device does not support {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("failed to build audio stream: {0}")]
    BuildStream(String),

    #[error("failed to start audio stream: {0}")]
    PlayStream(String),
}

/// Errors surfaced by the render engine's control surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("message queue is full, retry on a later tick")]
    QueueFull,

    #[error("operation requires the audio stream to be stopped")]
    Running,

    #[error("unit has no parameter {0}")]
    UnknownParameter(u8),
}

/// Configuration file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_status_decoding() {
        assert_eq!(InitStatus::from_code(-1), InitStatus::Target);
        assert_eq!(InitStatus::from_code(-4), InitStatus::SampleRate);
        assert_eq!(InitStatus::from_code(-32), InitStatus::Undefined);
        assert_eq!(InitStatus::from_code(-3), InitStatus::Other(-3));
    }

    #[test]
    fn test_engine_error_wraps_unit_error() {
        let err: EngineError = UnitError::InitFailed(InitStatus::Memory).into();
        assert_eq!(
            err.to_string(),
            "unit rejected the runtime descriptor: out of memory"
        );
    }
}
