use std::io;
use thiserror::Error;

/// Errors surfaced by the watchdog engine and its command API
#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Target '{0}' not found")]
    TargetNotFound(String),

    #[error("Target '{0}' already exists")]
    DuplicateTarget(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Process inspection failed: {0}")]
    Inspection(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Watchdog engine is not available")]
    EngineUnavailable,
}

pub type Result<T> = std::result::Result<T, WatchdogError>;

impl WatchdogError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        WatchdogError::Config(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        WatchdogError::InvalidState(msg.into())
    }

    pub fn inspection<S: Into<String>>(msg: S) -> Self {
        WatchdogError::Inspection(msg.into())
    }
}
