use thiserror::Error;

use crate::models::StreamKind;

#[derive(Error, Debug)]
pub enum ToolrunError {
    #[error("{executable} {args:?} exited with code {code}")]
    NonZeroExit {
        code: i32,
        executable: String,
        args: Vec<String>,
    },

    #[error("Failed to spawn {executable} {args:?}: {source}")]
    SpawnFailed {
        executable: String,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("No {stream} pipe available for {executable} {args:?}")]
    PipeUnavailable {
        executable: String,
        args: Vec<String>,
        stream: StreamKind,
    },

    #[error("I/O error on {stream} of {executable} {args:?}: {source}")]
    StreamIo {
        executable: String,
        args: Vec<String>,
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{stream} drain of {executable} {args:?} aborted: {reason}")]
    DrainAborted {
        executable: String,
        args: Vec<String>,
        stream: StreamKind,
        reason: String,
    },

    #[error("Failed waiting for {executable} {args:?}: {source}")]
    Wait {
        executable: String,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl ToolrunError {
    /// Exit code carried by a `NonZeroExit`, if this is one.
    pub fn code(&self) -> Option<i32> {
        match self {
            ToolrunError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The executable this error is attributed to, when it comes from a launch.
    pub fn executable(&self) -> Option<&str> {
        match self {
            ToolrunError::NonZeroExit { executable, .. }
            | ToolrunError::SpawnFailed { executable, .. }
            | ToolrunError::PipeUnavailable { executable, .. }
            | ToolrunError::StreamIo { executable, .. }
            | ToolrunError::DrainAborted { executable, .. }
            | ToolrunError::Wait { executable, .. } => Some(executable),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolrunError>;
