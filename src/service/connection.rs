// Broker connection state
// Tracks whether the sensor feed is live and how long we have been waiting for it

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected, or the link dropped and no retry tick has fired yet
    #[default]
    Disconnected,
    Connected,
    /// Still waiting; `attempt` counts watchdog ticks since the link dropped
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn on_connected(self) -> Self {
        ConnectionState::Connected
    }

    pub fn on_disconnected(self) -> Self {
        ConnectionState::Disconnected
    }

    /// Advance on a watchdog tick; a live connection is left alone
    pub fn on_retry_tick(self) -> Self {
        match self {
            ConnectionState::Connected => ConnectionState::Connected,
            ConnectionState::Disconnected => ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Reconnecting { attempt } => ConnectionState::Reconnecting {
                attempt: attempt.saturating_add(1),
            },
        }
    }
}
