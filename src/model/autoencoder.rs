// Autoencoder pipeline
// Resample -> encode -> decode -> reconstruction error, over a shared weight set

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::DetectorConfig;
use crate::error::DetectorResult;
use crate::model::decoder::Decoder;
use crate::model::encoder::Encoder;
use crate::model::layers::{Tensor3D, TensorError, TensorResult};
use crate::model::weights::{WeightResult, WeightSet};
use crate::signal::{FixedSignal, Resampler, WaveformBuffer};

/// Scalar distance between a signal and its reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMetric {
    /// Mean of |x - y|
    #[default]
    MeanAbsolute,
    /// Mean of (x - y)^2
    MeanSquared,
}

impl ErrorMetric {
    pub fn compute(&self, signal: &[f64], reconstruction: &[f64]) -> TensorResult<f64> {
        if signal.len() != reconstruction.len() || signal.is_empty() {
            return Err(TensorError::shape(
                "reconstruction_error",
                format!("{} values", signal.len()),
                format!("{} values", reconstruction.len()),
            ));
        }

        let total: f64 = signal
            .iter()
            .zip(reconstruction)
            .map(|(x, y)| match self {
                ErrorMetric::MeanAbsolute => (x - y).abs(),
                ErrorMetric::MeanSquared => (x - y) * (x - y),
            })
            .sum();

        Ok(total / signal.len() as f64)
    }
}

/// Dense output of the decoder, one row per batch item
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionResult {
    values: Array2<f64>,
}

impl ReconstructionResult {
    pub fn as_array(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn batch_size(&self) -> usize {
        self.values.nrows()
    }

    /// Row of the first batch item
    pub fn first(&self) -> Vec<f64> {
        self.values.row(0).to_vec()
    }
}

/// Everything one `score` call produces
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// Resampled, normalized network input
    pub signal: FixedSignal,

    /// Decoder output for `signal`
    pub reconstruction: ReconstructionResult,

    /// Reconstruction error under the configured metric
    pub error: f64,
}

/// Stateless inference pipeline; the weight set is shared read-only
#[derive(Debug, Clone)]
pub struct Autoencoder {
    weights: Arc<WeightSet>,
    resampler: Resampler,
    epsilon: f64,
    metric: ErrorMetric,
}

impl Autoencoder {
    /// Validate `weights` against the resampler's target length and bind them
    pub fn new(
        weights: Arc<WeightSet>,
        resampler: Resampler,
        epsilon: f64,
        metric: ErrorMetric,
    ) -> WeightResult<Self> {
        weights.validate(resampler.target_len())?;
        Ok(Autoencoder {
            weights,
            resampler,
            epsilon,
            metric,
        })
    }

    pub fn from_config(weights: Arc<WeightSet>, config: &DetectorConfig) -> WeightResult<Self> {
        Self::new(
            weights,
            config.resampler(),
            config.batch_norm_epsilon,
            config.error_metric,
        )
    }

    pub fn input_dim(&self) -> usize {
        self.resampler.target_len()
    }

    pub fn metric(&self) -> ErrorMetric {
        self.metric
    }

    pub fn weights(&self) -> &Arc<WeightSet> {
        &self.weights
    }

    pub fn resampler(&self) -> &Resampler {
        &self.resampler
    }

    /// Full pipeline for one raw waveform
    pub fn score(&self, waveform: &WaveformBuffer) -> DetectorResult<Score> {
        let signal = self.resampler.resample(waveform)?;
        let reconstruction = self.reconstruct(&signal)?;
        let error = self.metric.compute(signal.values(), &reconstruction.first())?;

        Ok(Score {
            signal,
            reconstruction,
            error,
        })
    }

    /// Encoder output for a single signal
    pub fn latent(&self, signal: &FixedSignal) -> TensorResult<Tensor3D> {
        self.check_len(signal.len())?;
        Encoder::new(&self.weights.encoder, self.epsilon).encode(&signal.to_tensor())
    }

    pub fn reconstruct(&self, signal: &FixedSignal) -> TensorResult<ReconstructionResult> {
        let latent = self.latent(signal)?;
        let values = Decoder::new(&self.weights.decoder, self.epsilon).decode(&latent)?;
        Ok(ReconstructionResult { values })
    }

    /// Reconstruct several already-normalized signals, one per row
    pub fn reconstruct_batch(&self, signals: &Array2<f64>) -> TensorResult<ReconstructionResult> {
        let (batch, len) = signals.dim();
        self.check_len(len)?;

        let x = Array3::from_shape_fn((batch, len, 1), |(b, i, _)| signals[[b, i]]);
        let latent = Encoder::new(&self.weights.encoder, self.epsilon).encode(&x)?;
        let values = Decoder::new(&self.weights.decoder, self.epsilon).decode(&latent)?;
        Ok(ReconstructionResult { values })
    }

    fn check_len(&self, len: usize) -> TensorResult<()> {
        if len != self.input_dim() {
            return Err(TensorError::shape(
                "autoencoder",
                format!("signal of length {}", self.input_dim()),
                format!("signal of length {}", len),
            ));
        }
        Ok(())
    }
}
