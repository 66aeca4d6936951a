// ECG Sentinel - ECG anomaly detection with a convolutional autoencoder
// Module declarations

pub mod config;
pub mod error;
pub mod model;
pub mod service;
pub mod signal;
pub mod storage;

pub use config::{ConfigError, DetectorConfig, MessagingConfig};
pub use error::{DetectorError, DetectorResult, ErrorKind};
pub use model::{Autoencoder, ErrorMetric, Score, WeightSet};
pub use service::{AnomalyDetector, Decision};
pub use signal::{parse_payload, FixedSignal, Resampler, WaveformBuffer};
