// Detector configuration
// JSON file with every externally tunable constant; missing keys take defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::autoencoder::ErrorMetric;
use crate::model::layers::BATCH_NORM_EPSILON;
use crate::signal::{AdcScale, Resampler};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to get config directory")]
    NoConfigDir,

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Names and timings used by the messaging collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Topic the sensor publishes raw waveforms on
    pub inbound_topic: String,

    /// Topic anomaly alerts are published on
    pub alert_topic: String,

    /// Client identifier presented to the broker
    pub client_id: String,

    /// Seconds between "waiting for sensor" checks while disconnected
    pub reconnect_interval_secs: u64,

    /// Label carried in the `anomaly` field of alerts
    pub anomaly_label: String,

    /// Human-readable alert description
    pub description: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        MessagingConfig {
            inbound_topic: "ecg/data".to_string(),
            alert_topic: "health/metrics".to_string(),
            client_id: "rpi_client1".to_string(),
            reconnect_interval_secs: 5,
            anomaly_label: "heart_disease".to_string(),
            description: "Anomalous ECG pattern detected".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Network input length every waveform is resampled to
    pub input_dim: usize,

    /// Reconstruction error above which a waveform is anomalous
    pub threshold: f64,

    /// Native sample counts the sensor is allowed to send
    pub native_lengths: Vec<usize>,

    /// ADC count to voltage conversion
    pub adc: AdcScale,

    /// Reduction from reconstruction to a scalar error
    pub error_metric: ErrorMetric,

    /// Added to the moving variance in every batch norm
    pub batch_norm_epsilon: f64,

    /// Directory holding the weight set
    pub weights_dir: PathBuf,

    pub messaging: MessagingConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            input_dim: 188,
            threshold: 0.1,
            native_lengths: vec![50, 100],
            adc: AdcScale::default(),
            error_metric: ErrorMetric::MeanAbsolute,
            batch_norm_epsilon: BATCH_NORM_EPSILON,
            weights_dir: PathBuf::from("wts"),
            messaging: MessagingConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Default config location: <config dir>/ecg-sentinel/config.json
    pub fn default_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("ecg-sentinel").join("config.json"))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: DetectorConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Ok(path) if path.is_file() => {
                log::info!("Using config {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, format!("{}\n", json))?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.input_dim < 2 {
            return Err(ConfigError::Invalid {
                field: "input_dim",
                message: format!("must be at least 2, got {}", self.input_dim),
            });
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::Invalid {
                field: "threshold",
                message: format!("must be a non-negative number, got {}", self.threshold),
            });
        }
        if let Some(len) = self.native_lengths.iter().find(|&&len| len < 2) {
            return Err(ConfigError::Invalid {
                field: "native_lengths",
                message: format!("every length must be at least 2, got {}", len),
            });
        }
        if !(self.adc.full_scale.is_finite() && self.adc.full_scale > 0.0)
            || !(self.adc.reference_volts.is_finite() && self.adc.reference_volts > 0.0)
        {
            return Err(ConfigError::Invalid {
                field: "adc",
                message: "reference voltage and full scale must be positive".to_string(),
            });
        }
        if !(self.batch_norm_epsilon.is_finite() && self.batch_norm_epsilon > 0.0) {
            return Err(ConfigError::Invalid {
                field: "batch_norm_epsilon",
                message: format!("must be positive, got {}", self.batch_norm_epsilon),
            });
        }
        if self.messaging.reconnect_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "messaging.reconnect_interval_secs",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn resampler(&self) -> Resampler {
        Resampler::new(self.input_dim, self.native_lengths.clone(), self.adc)
    }
}
