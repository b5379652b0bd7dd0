//! rumqttc-backed MQTT port
//!
//! Split the same way throughout: pure pieces are testable without a broker,
//! the client wires them to the network.
//!
//! - [`connection`] - broker URL parsing, options, reconnect backoff
//! - [`message_handler`] - event routing and the sequential inbound dispatcher
//! - [`health_monitor`] - connection state transitions and publish gating
//! - [`client`] - the supervisor task and the [`crate::transport::MqttPort`] impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use bridgekit::config::MqttSection;
//! use bridgekit::transport::mqtt::MqttClient;
//! use bridgekit::transport::{MqttPort, QoS};
//!
//! # tokio_test::block_on(async {
//! let client = MqttClient::new(&MqttSection::default(), "home", None)?;
//! if let Some(lifecycle) = client.lifecycle() {
//!     lifecycle.start().await?;
//! }
//! client.publish("home/status", "online", true, QoS::AtLeastOnce).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor};
pub use message_handler::{Dispatcher, EventRoute, MessageHandler};
