// Crate-level error type
// Aggregates the per-module errors and classifies them for the monitor loop

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::layers::TensorError;
use crate::model::weights::WeightError;
use crate::service::alert::AlertError;
use crate::signal::{PayloadError, ResampleError};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Malformed input: {0}")]
    Payload(#[from] PayloadError),

    #[error("Resampling failed: {0}")]
    Resample(#[from] ResampleError),

    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("Weight loading failed: {0}")]
    Weights(#[from] WeightError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Alert publishing failed: {0}")]
    Alert(#[from] AlertError),

    #[error("Reconstruction error is not a finite number ({0})")]
    NonFiniteScore(f64),
}

pub type DetectorResult<T> = Result<T, DetectorError>;

/// Coarse error classes used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ShapeMismatch,
    Normalization,
    WeightLoad,
    MalformedInput,
    Config,
    Publish,
}

impl DetectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectorError::Payload(_) => ErrorKind::MalformedInput,
            DetectorError::Resample(
                ResampleError::DegenerateRange(_) | ResampleError::NonFiniteRange { .. },
            ) => ErrorKind::Normalization,
            DetectorError::Resample(ResampleError::InvalidTargetLength(_)) => ErrorKind::ShapeMismatch,
            DetectorError::Resample(_) => ErrorKind::MalformedInput,
            DetectorError::Tensor(_) => ErrorKind::ShapeMismatch,
            DetectorError::Weights(_) => ErrorKind::WeightLoad,
            DetectorError::Config(_) => ErrorKind::Config,
            DetectorError::Alert(_) => ErrorKind::Publish,
            DetectorError::NonFiniteScore(_) => ErrorKind::Normalization,
        }
    }

    /// Whether the next message can still be served after this failure
    ///
    /// Bad messages and failed publishes only cost the current call. Shape,
    /// weight and configuration errors repeat for every input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedInput | ErrorKind::Normalization | ErrorKind::Publish
        )
    }
}
