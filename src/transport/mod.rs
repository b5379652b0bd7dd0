//! MQTT port abstraction
//!
//! The framework only talks to the broker through [`MqttPort`]. Optional
//! capabilities (explicit start/stop, inbound message dispatch) are exposed
//! through capability queries so that a plain test double can skip them.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

/// Boxed, sendable future used at type-erased callback seams
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Inbound message callback: `(topic, payload)`
pub type MessageCallback = Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// MQTT quality of service level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Errors surfaced by MQTT port implementations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected: {0}")]
    NotConnected(String),
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscribing to {topic} failed")]
    SubscribeFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Publish/subscribe surface shared by every task.
///
/// Implementations must be safe to call concurrently from many tasks without
/// external locking.
#[async_trait]
pub trait MqttPort: Send + Sync {
    /// Publish a message; fails if the port is not connected
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Explicit start/stop control, if this port has any
    fn lifecycle(&self) -> Option<&dyn PortLifecycle> {
        None
    }

    /// Inbound message dispatch, if this port can receive messages
    fn inbound(&self) -> Option<&dyn InboundSource> {
        None
    }
}

/// Optional start/stop capability of an MQTT port
#[async_trait]
pub trait PortLifecycle: Send + Sync {
    async fn start(&self) -> Result<(), TransportError>;
    async fn stop(&self) -> Result<(), TransportError>;
}

/// Optional inbound-message capability of an MQTT port
pub trait InboundSource: Send + Sync {
    /// Register the callback invoked for every inbound message
    fn on_message(&self, callback: MessageCallback);
}

/// Last-Will-and-Testament message supplied to the port at connection time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}
