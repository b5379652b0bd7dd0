//! Pure connection health logic for the MQTT client
//!
//! State transitions and publish gating are decided here; the client only
//! applies the decisions.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tracing::{error, info, warn};

/// Events that drive connection state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Started,
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    StopRequested,
}

/// Stateless connection policy
pub struct HealthMonitor;

impl HealthMonitor {
    /// Next state after an event; `attempts` is the count of consecutive failures
    /// including this one
    pub fn next_state(
        current: &ConnectionState,
        event: ConnectionEvent,
        attempts: u32,
    ) -> ConnectionState {
        if *current == ConnectionState::Stopped {
            return ConnectionState::Stopped;
        }

        match event {
            ConnectionEvent::Started => ConnectionState::Connecting,
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(_) => ConnectionState::Reconnecting(attempts),
            ConnectionEvent::StopRequested => ConnectionState::Stopped,
        }
    }

    /// Publishing and subscribing are only allowed while connected
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Delay before retrying after a failed poll
    pub fn retry_delay(config: &ReconnectConfig, attempts: u32) -> Duration {
        config.delay_for(attempts)
    }

    /// Upper bound to wait for the first ConnAck during start
    pub fn connect_timeout(config: &ReconnectConfig) -> Duration {
        let total: u64 = config.backoff_pattern.iter().sum();
        Duration::from_millis(total).max(Duration::from_secs(10))
    }

    pub fn log_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (_, ConnectionState::Connected) if from != to => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!("MQTT connection lost: {}", reason);
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                warn!(attempt = *attempt, "MQTT reconnecting");
            }
            (_, ConnectionState::Stopped) if from != to => {
                info!("MQTT client stopped");
            }
            (ConnectionState::Connected, other) => {
                error!("MQTT connection state changed unexpectedly: {:?}", other);
            }
            _ => {}
        }
    }
}
