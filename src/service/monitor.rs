// Monitor loop
// Consumes inbound sensor events, scores every waveform, publishes alerts for
// anomalies and keeps a reconnect watchdog running while the feed is down

use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::MessagingConfig;
use crate::error::DetectorError;
use crate::service::alert::{AlertSink, AnomalyAlert};
use crate::service::connection::ConnectionState;
use crate::service::detector::{AnomalyDetector, Decision};

/// Events delivered by the messaging collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    Disconnected,
    /// Raw payload received on the inbound topic
    Message(String),
}

/// Running counters, logged when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub received: u64,
    pub normal: u64,
    pub anomalous: u64,
    /// Malformed or flat waveforms that were dropped
    pub skipped: u64,
    /// Waveforms that failed inside the model
    pub failed: u64,
    pub alerts_published: u64,
    pub publish_failures: u64,
}

pub struct Monitor<S: AlertSink> {
    detector: AnomalyDetector,
    sink: S,
    messaging: MessagingConfig,
    state: ConnectionState,
    stats: MonitorStats,
}

impl<S: AlertSink> Monitor<S> {
    pub fn new(detector: AnomalyDetector, sink: S, messaging: MessagingConfig) -> Self {
        Monitor {
            detector,
            sink,
            messaging,
            state: ConnectionState::default(),
            stats: MonitorStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    /// Apply one event; returns the decision when a waveform was scored
    pub fn handle_event(&mut self, event: InboundEvent) -> Option<Decision> {
        match event {
            InboundEvent::Connected => {
                log::info!(
                    "Connected as {}, listening on {}",
                    self.messaging.client_id,
                    self.messaging.inbound_topic
                );
                self.state = self.state.on_connected();
                None
            }
            InboundEvent::Disconnected => {
                log::warn!("Sensor feed disconnected");
                self.state = self.state.on_disconnected();
                None
            }
            InboundEvent::Message(payload) => self.handle_message(&payload),
        }
    }

    fn handle_message(&mut self, payload: &str) -> Option<Decision> {
        self.stats.received += 1;

        let decision = match self.detector.evaluate_payload(payload) {
            Ok(decision) => decision,
            Err(e) => {
                self.record_failure(&e);
                return None;
            }
        };

        if decision.anomalous {
            self.stats.anomalous += 1;
            log::warn!(
                "Anomaly: error {:.6} above threshold {:.6} ({} samples)",
                decision.error,
                decision.threshold,
                decision.native_len
            );
            self.publish(&decision);
        } else {
            self.stats.normal += 1;
            log::debug!(
                "Normal: error {:.6} ({} samples)",
                decision.error,
                decision.native_len
            );
        }

        Some(decision)
    }

    fn publish(&mut self, decision: &Decision) {
        let alert = AnomalyAlert::from_decision(decision, &self.messaging);
        match self.sink.publish(&alert) {
            Ok(()) => {
                self.stats.alerts_published += 1;
                log::info!("Published alert {} to {}", alert.id, alert.topic);
            }
            Err(e) => {
                // Losing one alert must not stop scoring
                self.stats.publish_failures += 1;
                log::error!("Failed to publish alert {}: {}", alert.id, e);
            }
        }
    }

    fn record_failure(&mut self, error: &DetectorError) {
        if error.is_recoverable() {
            self.stats.skipped += 1;
            log::warn!("Skipping waveform ({:?}): {}", error.kind(), error);
        } else {
            self.stats.failed += 1;
            log::error!("Scoring failed ({:?}): {}", error.kind(), error);
        }
    }

    /// Reconnect watchdog tick
    pub fn tick(&mut self) {
        self.state = self.state.on_retry_tick();
        if let ConnectionState::Reconnecting { attempt } = self.state {
            log::info!("Trying to connect (attempt {})", attempt);
        }
    }

    /// Process events until the sender side is dropped, then return the sink and stats
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundEvent>) -> (S, MonitorStats) {
        let mut watchdog = tokio::time::interval(Duration::from_secs(
            self.messaging.reconnect_interval_secs.max(1),
        ));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => {
                        log::info!("Inbound channel closed, stopping monitor");
                        break;
                    }
                },

                _ = watchdog.tick() => self.tick(),
            }
        }

        log::info!(
            "Monitor stopped: {} received, {} normal, {} anomalous, {} skipped, {} failed",
            self.stats.received,
            self.stats.normal,
            self.stats.anomalous,
            self.stats.skipped,
            self.stats.failed
        );

        (self.sink, self.stats)
    }
}

/// Feed newline-delimited payloads from `reader` into `tx`
///
/// Sends `Connected` first and `Disconnected` at end of input. Blank lines are
/// ignored. Returns the number of payloads forwarded.
pub async fn forward_lines<R>(reader: R, tx: mpsc::Sender<InboundEvent>) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    if tx.send(InboundEvent::Connected).await.is_err() {
        return Ok(0);
    }

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if tx.send(InboundEvent::Message(line.to_string())).await.is_err() {
            log::debug!("Monitor went away, stopping input");
            return Ok(forwarded);
        }
        forwarded += 1;
    }

    // Receiver may already be gone; nothing left to deliver either way
    let _ = tx.send(InboundEvent::Disconnected).await;
    Ok(forwarded)
}
