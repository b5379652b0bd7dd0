//! Composition root for bridge daemons
//!
//! An [`App`] collects registrations (devices, telemetry pollers, command
//! handlers, hooks and adapters), validates each one as it is registered, and
//! then drives the whole lifecycle in [`App::run`].
//!
//! ```no_run
//! use bridgekit::{App, DeviceContext, HandlerResult, State};
//! use std::time::Duration;
//!
//! # async fn demo() -> bridgekit::BridgeResult<()> {
//! let mut app = App::new("greenhouse", env!("CARGO_PKG_VERSION"));
//! app.telemetry("climate", Duration::from_secs(30), || async {
//!     let mut state = State::new();
//!     state.insert("temperature".into(), 21.5.into());
//!     HandlerResult::Ok(state)
//! })?;
//! app.device("vent", |ctx: DeviceContext| async move {
//!     ctx.on_command(|_topic, payload| async move {
//!         tracing::info!("vent -> {}", payload);
//!         Ok(())
//!     });
//!     ctx.wait_for_shutdown().await;
//!     Ok(())
//! })?;
//! app.run().await
//! # }
//! ```

pub mod context;
pub mod lifecycle;
pub mod registration;

pub use context::{AppContext, CommandCallback, DeviceContext, DeviceLogger};
pub use lifecycle::LifecycleState;
pub use registration::{AdapterFactory, AdapterSource};

use crate::clock::Clock;
use crate::config::{AppSettings, Settings};
use crate::error::{BridgeResult, HandlerError, RegistrationError};
use crate::error_publisher::ErrorTypeMap;
use crate::injection::{CommandFn, Inject, InjectableFn, Injected, InjectedCommand};
use crate::shutdown::ShutdownSignal;
use crate::telemetry::TelemetryOptions;
use crate::transport::MqttPort;
use crate::State;
use context::SettingsSlot;
use registration::{AdapterRegistry, Registration, RegistrationKind, RegistrationTable};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Bridge daemon builder and orchestrator
pub struct App {
    name: String,
    version: String,
    registrations: RegistrationTable,
    startup_hooks: Vec<Injected<()>>,
    shutdown_hooks: Vec<Injected<()>>,
    adapters: AdapterRegistry,
    settings: Option<SettingsSlot>,
    mqtt: Option<Arc<dyn MqttPort>>,
    clock: Option<Arc<dyn Clock>>,
    shutdown: Option<ShutdownSignal>,
    dry_run: Option<bool>,
    heartbeat_interval: Option<Option<Duration>>,
    error_types: ErrorTypeMap,
    state_tx: watch::Sender<LifecycleState>,
}

impl App {
    /// `name` doubles as the topic prefix unless settings provide one
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Unstarted);
        Self {
            name: name.into(),
            version: version.into(),
            registrations: RegistrationTable::default(),
            startup_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
            adapters: AdapterRegistry::default(),
            settings: None,
            mqtt: None,
            clock: None,
            shutdown: None,
            dry_run: None,
            heartbeat_interval: None,
            error_types: ErrorTypeMap::default(),
            state_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of device, telemetry and command registrations
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Watch the lifecycle state; the receiver keeps the last state after `run` returns
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    fn register(
        &mut self,
        name: Option<&str>,
        build: impl FnOnce(&str) -> Result<RegistrationKind, RegistrationError>,
    ) -> Result<&mut Self, RegistrationError> {
        self.registrations.check_name(name)?;
        let label = name.unwrap_or(&self.name).to_string();
        let kind = build(&label)?;
        self.registrations.push(Registration {
            name: name.map(str::to_string),
            kind,
        })?;
        Ok(self)
    }

    /// Long-running handler started once per run
    pub fn device<Args, H>(&mut self, name: &str, handler: H) -> Result<&mut Self, RegistrationError>
    where
        H: InjectableFn<Args, ()>,
    {
        self.register(Some(name), |label| {
            Ok(RegistrationKind::Device(Injected::prepare(label, handler)?))
        })
    }

    /// Device addressed by the bare prefix (`{prefix}/set`, `{prefix}/state`)
    pub fn root_device<Args, H>(&mut self, handler: H) -> Result<&mut Self, RegistrationError>
    where
        H: InjectableFn<Args, ()>,
    {
        self.register(None, |label| {
            Ok(RegistrationKind::Device(Injected::prepare(label, handler)?))
        })
    }

    /// Poll `handler` every `interval` and publish what it returns as state
    pub fn telemetry<Args, H>(
        &mut self,
        name: &str,
        interval: Duration,
        handler: H,
    ) -> Result<&mut Self, RegistrationError>
    where
        H: InjectableFn<Args, State>,
    {
        self.telemetry_with(name, interval, TelemetryOptions::default(), handler)
    }

    pub fn telemetry_with<Args, H>(
        &mut self,
        name: &str,
        interval: Duration,
        options: TelemetryOptions,
        handler: H,
    ) -> Result<&mut Self, RegistrationError>
    where
        H: InjectableFn<Args, State>,
    {
        RegistrationTable::check_interval(name, interval)?;
        self.register(Some(name), |label| {
            Ok(RegistrationKind::Telemetry {
                handler: Injected::prepare(label, handler)?,
                interval,
                options,
            })
        })
    }

    pub fn root_telemetry<Args, H>(
        &mut self,
        interval: Duration,
        options: TelemetryOptions,
        handler: H,
    ) -> Result<&mut Self, RegistrationError>
    where
        H: InjectableFn<Args, State>,
    {
        RegistrationTable::check_interval(&self.name, interval)?;
        self.register(None, |label| {
            Ok(RegistrationKind::Telemetry {
                handler: Injected::prepare(label, handler)?,
                interval,
                options,
            })
        })
    }

    /// `(topic, payload, injected...) -> Option<State>`; returned state is
    /// published as the registration's state
    pub fn command<Args, H>(&mut self, name: &str, handler: H) -> Result<&mut Self, RegistrationError>
    where
        H: CommandFn<Args>,
    {
        self.register(Some(name), |label| {
            Ok(RegistrationKind::Command(InjectedCommand::prepare(label, handler)?))
        })
    }

    pub fn root_command<Args, H>(&mut self, handler: H) -> Result<&mut Self, RegistrationError>
    where
        H: CommandFn<Args>,
    {
        self.register(None, |label| {
            Ok(RegistrationKind::Command(InjectedCommand::prepare(label, handler)?))
        })
    }

    /// Runs before any device starts; an error aborts the run
    pub fn on_startup<Args, H>(&mut self, handler: H) -> Result<&mut Self, RegistrationError>
    where
        H: InjectableFn<Args, ()>,
    {
        let name = format!("on_startup#{}", self.startup_hooks.len());
        self.startup_hooks.push(Injected::prepare(&name, handler)?);
        Ok(self)
    }

    /// Runs during teardown; errors are logged and ignored
    pub fn on_shutdown<Args, H>(&mut self, handler: H) -> Result<&mut Self, RegistrationError>
    where
        H: InjectableFn<Args, ()>,
    {
        let name = format!("on_shutdown#{}", self.shutdown_hooks.len());
        self.shutdown_hooks.push(Injected::prepare(&name, handler)?);
        Ok(self)
    }

    /// Register the implementation of port type `P`, e.g. `Arc<dyn Sensor>`
    pub fn adapter<P: Inject>(&mut self, implementation: P) -> Result<&mut Self, RegistrationError> {
        self.adapters
            .register(AdapterSource::instance(implementation), None)?;
        Ok(self)
    }

    /// Like [`App::adapter`], with a variant used when the app runs dry
    pub fn adapter_with_dry_run<P: Inject>(
        &mut self,
        implementation: P,
        dry_run: P,
    ) -> Result<&mut Self, RegistrationError> {
        self.adapters.register(
            AdapterSource::instance(implementation),
            Some(AdapterSource::instance(dry_run)),
        )?;
        Ok(self)
    }

    /// Build the adapter lazily when the app starts
    pub fn adapter_factory<P, F>(&mut self, factory: F) -> Result<&mut Self, RegistrationError>
    where
        P: Inject,
        F: Fn() -> Result<P, HandlerError> + Send + Sync + 'static,
    {
        self.adapters.register(AdapterSource::factory(factory), None)?;
        Ok(self)
    }

    /// Fully general adapter registration
    pub fn adapter_source<P: Inject>(
        &mut self,
        implementation: AdapterSource<P>,
        dry_run: Option<AdapterSource<P>>,
    ) -> Result<&mut Self, RegistrationError> {
        self.adapters.register(implementation, dry_run)?;
        Ok(self)
    }

    /// Name a factory so adapters can refer to it with [`AdapterSource::Catalog`]
    pub fn catalog<P, F>(&mut self, name: &str, factory: F) -> Result<&mut Self, RegistrationError>
    where
        P: Inject,
        F: Fn() -> Result<P, HandlerError> + Send + Sync + 'static,
    {
        self.adapters.register_catalog(name, factory)?;
        Ok(self)
    }

    /// Use these settings instead of defaults plus environment overrides.
    ///
    /// Handlers can ask for `Arc<S>` as well as `Arc<Settings>`.
    pub fn settings<S: AppSettings>(&mut self, settings: S) -> &mut Self {
        self.settings = Some(SettingsSlot::new(settings));
        self
    }

    /// Use this port instead of connecting to the configured broker
    pub fn mqtt(&mut self, port: Arc<dyn MqttPort>) -> &mut Self {
        self.mqtt = Some(port);
        self
    }

    pub fn clock(&mut self, clock: Arc<dyn Clock>) -> &mut Self {
        self.clock = Some(clock);
        self
    }

    /// Use this signal instead of installing OS signal handlers
    pub fn shutdown(&mut self, signal: ShutdownSignal) -> &mut Self {
        self.shutdown = Some(signal);
        self
    }

    /// Overrides `app.dry_run` from settings
    pub fn dry_run(&mut self, dry_run: bool) -> &mut Self {
        self.dry_run = Some(dry_run);
        self
    }

    /// Overrides `app.heartbeat_interval_secs`; `None` or zero disables periodic heartbeats
    pub fn heartbeat_interval(&mut self, interval: Option<Duration>) -> &mut Self {
        self.heartbeat_interval = Some(interval.filter(|interval| !interval.is_zero()));
        self
    }

    /// Map handler error types to `error_type` strings in published errors
    pub fn error_types(&mut self, types: ErrorTypeMap) -> &mut Self {
        self.error_types = types;
        self
    }

    /// Run until the shutdown signal fires, then tear everything down
    pub async fn run(self) -> BridgeResult<()> {
        lifecycle::Lifecycle::bootstrap(self)?.run().await
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("registrations", &self.registrations.len())
            .field("adapters", &self.adapters.len())
            .finish()
    }
}
