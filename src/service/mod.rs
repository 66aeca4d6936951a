// Detection service
// Threshold decisions, alert delivery and the long-running monitor loop

pub mod alert;
pub mod connection;
pub mod detector;
pub mod monitor;

pub use alert::{
    read_alert_file, AlertError, AlertResult, AlertSink, AnomalyAlert, JsonlAlertSink,
    MemoryAlertSink,
};
pub use connection::ConnectionState;
pub use detector::{AnomalyDetector, Decision};
pub use monitor::{forward_lines, InboundEvent, Monitor, MonitorStats};
