//! bridgekit
//!
//! Application framework for small IoT-to-MQTT bridge daemons.
//!
//! # Overview
//!
//! A bridge registers devices (long-running handlers), telemetry pollers and
//! command handlers on an [`App`]. The app wires them to an MQTT broker:
//! - per-device `state`, `availability`, `set` and `error` topics below a prefix
//! - a retained heartbeat on `{prefix}/status` backed by a Last-Will
//! - structured error events for every failing handler
//! - graceful shutdown on SIGINT/SIGTERM
//!
//! Handler parameters are injected by type: ask for a [`DeviceContext`], the
//! settings, the clock, or any registered adapter port.
//!
//! # Quick Start
//!
//! ```no_run
//! use bridgekit::{App, DeviceContext, HandlerResult, OnChange, State, TelemetryOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> bridgekit::BridgeResult<()> {
//!     let mut app = App::new("greenhouse", "1.0.0");
//!
//!     app.telemetry_with(
//!         "climate",
//!         Duration::from_secs(10),
//!         TelemetryOptions::new().strategy(OnChange::threshold(0.2)),
//!         || async {
//!             let mut state = State::new();
//!             state.insert("temperature".into(), 21.5.into());
//!             HandlerResult::Ok(state)
//!         },
//!     )?;
//!
//!     app.command("vent", |_topic: String, payload: String| async move {
//!         let mut state = State::new();
//!         state.insert("position".into(), payload.into());
//!         HandlerResult::Ok(Some(state))
//!     })?;
//!
//!     app.device("watchdog", |ctx: DeviceContext| async move {
//!         while ctx.sleep(Duration::from_secs(60)).await {
//!             ctx.logger().info("still alive");
//!         }
//!         HandlerResult::Ok(())
//!     })?;
//!
//!     app.run().await
//! }
//! ```

pub mod app;
pub mod clock;
pub mod config;
pub mod error;
pub mod error_publisher;
pub mod health;
pub mod injection;
pub mod observability;
pub mod routing;
pub mod shutdown;
pub mod telemetry;
pub mod testing;
pub mod topics;
pub mod transport;

/// JSON object published as device state
pub type State = serde_json::Map<String, serde_json::Value>;

pub use app::{
    AdapterSource, App, AppContext, DeviceContext, DeviceLogger, LifecycleState,
};
pub use clock::{Clock, SystemClock};
pub use config::{AppSettings, ConfigError, Settings};
pub use error::{
    BridgeError, BridgeResult, HandlerError, HandlerResult, InjectionError, RegistrationError,
};
pub use error_publisher::{ErrorPayload, ErrorPublisher, ErrorTypeMap};
pub use health::HealthReporter;
pub use injection::{DynHandler, ParamKind, ParamSpec, ProviderMap};
pub use routing::TopicRouter;
pub use shutdown::ShutdownSignal;
pub use telemetry::{
    AllOf, AnyOf, Every, Filter, LowPass, OnChange, PublishStrategy, Pt1, StrategyError,
    StrategyExt, TelemetryOptions,
};
pub use topics::TopicLayout;
pub use transport::mqtt::MqttClient;
pub use transport::{MqttPort, QoS, TransportError};
