//! Error classification for the detection pipeline.
//!
//! Most functions return `anyhow::Result`. These enums mark the three failure
//! classes the run loop and the binary need to tell apart:
//!
//! - `ConfigError`: fatal, raised before any resource is acquired
//! - `CaptureError`: recoverable, the current iteration is skipped
//! - `ModelError`: fatal, the inference engine cannot be trusted mid-run

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("{what} not found: {path}")]
    MissingFile { what: &'static str, path: String },

    #[error("{0} support was not compiled in (enable the `{1}` feature)")]
    Unavailable(&'static str, &'static str),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera {device} is not connected: {reason}")]
    NotConnected { device: String, reason: String },

    #[error("failed to read frame from {device}: {reason}")]
    Read { device: String, reason: String },

    #[error("unsupported pixel format {0}")]
    Format(String),

    #[error("failed to persist frame to {path}: {reason}")]
    Persist { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("model input mismatch: {0}")]
    Input(String),

    #[error("inference failed: {0}")]
    Invoke(String),

    #[error("malformed model output: {0}")]
    Output(String),
}

/// Broad failure class, used by the binary to choose an exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Config,
    Capture,
    Model,
    Other,
}

impl ErrorClass {
    pub fn of(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.is::<ConfigError>() {
                return Self::Config;
            }
            if cause.is::<CaptureError>() {
                return Self::Capture;
            }
            if cause.is::<ModelError>() {
                return Self::Model;
            }
        }
        Self::Other
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Config => 2,
            Self::Model => 3,
            Self::Capture | Self::Other => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classifies_through_context_layers() {
        let err = Err::<(), _>(ModelError::Invoke("boom".into()))
            .context("running iteration 3")
            .unwrap_err();
        assert_eq!(ErrorClass::of(&err), ErrorClass::Model);
        assert_eq!(ErrorClass::of(&err).exit_code(), 3);

        let err = anyhow::Error::new(ConfigError::Invalid("threshold".into()));
        assert_eq!(ErrorClass::of(&err).exit_code(), 2);

        let err = anyhow::anyhow!("plain failure");
        assert_eq!(ErrorClass::of(&err), ErrorClass::Other);
    }
}
