use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use image::ImageError;
use thiserror::Error;
use uuid::Uuid;

use crate::session::Stage;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to open video device {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to acquire frame from {device}: {message}")]
    FrameCapture { device: String, message: String },

    #[error("device capability error: {0}")]
    Capability(String),

    #[error("unsupported pixel format '{0}' for selected device")]
    UnsupportedFormat(String),

    #[error("failed processing frame data: {0}")]
    FrameProcessing(String),

    #[error("missing {kind} model; provide {flag} or set ${env}")]
    MissingModel {
        kind: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("failed to load {capability} model: {message}")]
    ModelLoad { capability: String, message: String },

    #[error("face detector failed: {0}")]
    DetectorBackend(String),

    #[error("{backend} support is not compiled in; rebuild with the `{feature}` feature")]
    BackendUnavailable {
        backend: &'static str,
        feature: &'static str,
    },

    #[error("{stage} stage timed out after {elapsed:?}")]
    StageTimeout { stage: Stage, elapsed: Duration },

    #[error("{stage} stage cancelled")]
    Cancelled { stage: Stage },

    #[error("session {session_id} has already run; reset it before running again")]
    SessionConsumed { session_id: Uuid },

    #[error("select exactly 2 images before confirming ({selected} selected)")]
    SelectionCount { selected: usize },

    #[error("no captured image with id '{0}'")]
    UnknownImage(String),

    #[error("selection input closed before a pair was confirmed")]
    SelectionInputClosed,

    #[error("embedding extraction failed for {image_id}: {message}")]
    EmbeddingExtraction { image_id: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode image {path}: {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read artifact {path}: {source}")]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("enrollment artifact is invalid: {0}")]
    InvalidArtifact(String),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::DeviceOpen { .. } => ExitCode::from(4),
            AppError::FrameCapture { .. } => ExitCode::from(4),
            AppError::Capability(_) => ExitCode::from(3),
            AppError::UnsupportedFormat(_) => ExitCode::from(2),
            AppError::MissingModel { .. } => ExitCode::from(2),
            AppError::ModelLoad { .. } => ExitCode::from(2),
            AppError::BackendUnavailable { .. } => ExitCode::from(2),
            AppError::StageTimeout { .. } => ExitCode::from(5),
            AppError::Cancelled { .. } => ExitCode::from(130),
            AppError::SelectionInputClosed => ExitCode::from(5),
            AppError::SessionConsumed { .. } => ExitCode::from(5),
            AppError::EmbeddingExtraction { .. } => ExitCode::from(6),
            AppError::InvalidArtifact(_) => ExitCode::from(3),
            AppError::ConfigRead { .. } => ExitCode::from(2),
            AppError::ConfigParse { .. } => ExitCode::from(2),
            AppError::InvalidConfig(_) => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }

    /// Correctable errors are surfaced to the user and never abort a session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AppError::SelectionCount { .. } | AppError::UnknownImage(_)
        )
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_errors_are_correctable() {
        assert!(!AppError::SelectionCount { selected: 1 }.is_fatal());
        assert!(!AppError::UnknownImage("happy_9".into()).is_fatal());
        assert!(AppError::EmbeddingExtraction {
            image_id: "neutral_0".into(),
            message: "no face".into(),
        }
        .is_fatal());
        assert!(AppError::Cancelled {
            stage: Stage::Direction
        }
        .is_fatal());
    }

    #[test]
    fn timeout_message_names_stage() {
        let err = AppError::StageTimeout {
            stage: Stage::Expression,
            elapsed: Duration::from_secs(60),
        };
        assert!(err.human_message().starts_with("expression stage timed out"));
        assert_eq!(err.exit_code(), ExitCode::from(5));
    }
}
