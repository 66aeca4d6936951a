// Outbound anomaly alerts
// Alert payload plus the sinks that deliver it (append-only JSONL file, in-memory)

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::config::MessagingConfig;
use crate::service::detector::Decision;

/// Errors that can occur while publishing an alert
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Sink rejected alert: {0}")]
    Rejected(String),
}

pub type AlertResult<T> = Result<T, AlertError>;

/// Structured payload published when a waveform is judged anomalous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// Unique identifier for this alert
    pub id: Uuid,

    /// Topic the alert is addressed to
    pub topic: String,

    /// Anomaly label (e.g., "heart_disease")
    pub anomaly: String,

    pub description: String,

    /// Unix timestamp in seconds of the scored waveform
    pub timestamp: i64,

    pub reconstruction_error: f64,

    pub threshold: f64,
}

impl AnomalyAlert {
    pub fn from_decision(decision: &Decision, messaging: &MessagingConfig) -> Self {
        AnomalyAlert {
            id: Uuid::new_v4(),
            topic: messaging.alert_topic.clone(),
            anomaly: messaging.anomaly_label.clone(),
            description: messaging.description.clone(),
            timestamp: decision.timestamp.timestamp(),
            reconstruction_error: decision.error,
            threshold: decision.threshold,
        }
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Destination for anomaly alerts
/// A message-bus client implements this to publish on `AnomalyAlert::topic`
pub trait AlertSink: Send {
    fn publish(&mut self, alert: &AnomalyAlert) -> AlertResult<()>;
}

/// Appends alerts to a JSONL file, creating it if needed
pub struct JsonlAlertSink {
    file_path: PathBuf,
}

impl JsonlAlertSink {
    pub fn new(file_path: PathBuf) -> Self {
        JsonlAlertSink { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl AlertSink for JsonlAlertSink {
    fn publish(&mut self, alert: &AnomalyAlert) -> AlertResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = alert.to_json_line()?;
        file.write_all(json_line.as_bytes())?;
        file.flush()?;

        Ok(())
    }
}

/// Keeps published alerts in memory; clones share the same list
#[derive(Debug, Clone, Default)]
pub struct MemoryAlertSink {
    alerts: Arc<Mutex<Vec<AnomalyAlert>>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn alerts(&self) -> Vec<AnomalyAlert> {
        match self.alerts.lock() {
            Ok(alerts) => alerts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlertSink for MemoryAlertSink {
    fn publish(&mut self, alert: &AnomalyAlert) -> AlertResult<()> {
        self.alerts
            .lock()
            .map_err(|e| AlertError::Rejected(e.to_string()))?
            .push(alert.clone());
        Ok(())
    }
}

/// Read alerts back from a JSONL file
pub fn read_alert_file(path: &Path) -> AlertResult<Vec<AnomalyAlert>> {
    let contents = std::fs::read_to_string(path)?;
    let mut alerts = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let alert: AnomalyAlert = serde_json::from_str(line)?;
        alerts.push(alert);
    }

    Ok(alerts)
}
