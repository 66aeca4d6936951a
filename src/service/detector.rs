// Anomaly decision
// Scores a waveform and compares its reconstruction error to the threshold

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::DetectorConfig;
use crate::error::{DetectorError, DetectorResult};
use crate::model::autoencoder::{Autoencoder, Score};
use crate::model::weights::{WeightResult, WeightSet};
use crate::signal::{parse_payload, WaveformBuffer};

/// Outcome of one scored waveform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub anomalous: bool,

    /// Reconstruction error under the configured metric
    pub error: f64,

    pub threshold: f64,

    /// Sample count of the waveform as received
    pub native_len: usize,

    pub timestamp: DateTime<Utc>,
}

/// Autoencoder plus the threshold that turns its error into a decision
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    autoencoder: Autoencoder,
    threshold: f64,
}

impl AnomalyDetector {
    pub fn new(autoencoder: Autoencoder, threshold: f64) -> Self {
        AnomalyDetector {
            autoencoder,
            threshold,
        }
    }

    pub fn from_config(weights: Arc<WeightSet>, config: &DetectorConfig) -> WeightResult<Self> {
        let autoencoder = Autoencoder::from_config(weights, config)?;
        Ok(Self::new(autoencoder, config.threshold))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn autoencoder(&self) -> &Autoencoder {
        &self.autoencoder
    }

    /// Strictly greater than the threshold counts as anomalous
    pub fn is_anomalous(&self, error: f64) -> bool {
        error > self.threshold
    }

    /// Score a waveform and return both the decision and the full score
    pub fn evaluate_with_score(&self, waveform: &WaveformBuffer) -> DetectorResult<(Decision, Score)> {
        let score = self.autoencoder.score(waveform)?;
        // NaN never compares above the threshold, so it must not reach a decision
        if !score.error.is_finite() {
            return Err(DetectorError::NonFiniteScore(score.error));
        }
        let decision = Decision {
            anomalous: self.is_anomalous(score.error),
            error: score.error,
            threshold: self.threshold,
            native_len: waveform.len(),
            timestamp: Utc::now(),
        };
        Ok((decision, score))
    }

    pub fn evaluate(&self, waveform: &WaveformBuffer) -> DetectorResult<Decision> {
        self.evaluate_with_score(waveform).map(|(decision, _)| decision)
    }

    /// Parse a raw sensor payload, then evaluate it
    pub fn evaluate_payload(&self, payload: &str) -> DetectorResult<Decision> {
        let waveform = parse_payload(payload)?;
        self.evaluate(&waveform)
    }
}
