//! Lifecycle orchestration
//!
//! `Unstarted -> Bootstrapped -> DevicesBuilt -> Running -> ShuttingDown -> Stopped`,
//! strictly forward. A failing startup hook ends the run before `Running`;
//! nothing that fails during teardown stops the remaining teardown steps.

use super::context::{AppContext, DeviceContext, SettingsSlot};
use super::registration::{Registration, RegistrationKind};
use super::App;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, Settings};
use crate::error::{BridgeError, BridgeResult, HandlerError, RegistrationError};
use crate::error_publisher::{ErrorPublisher, ErrorTypeMap};
use crate::health::HealthReporter;
use crate::injection::{Injected, ProviderMap};
use crate::observability::logging;
use crate::routing::{RouteHandler, TopicRouter};
use crate::shutdown::ShutdownSignal;
use crate::topics::{validate_segment, TopicLayout};
use crate::transport::mqtt::MqttClient;
use crate::transport::{BoxFuture, MqttPort};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Where an [`App`] is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Bootstrapped,
    DevicesBuilt,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Unstarted => "unstarted",
            LifecycleState::Bootstrapped => "bootstrapped",
            LifecycleState::DevicesBuilt => "devices_built",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Services shared by every phase after bootstrap
struct Services {
    health: Arc<HealthReporter>,
    errors: Arc<ErrorPublisher>,
    shutdown: ShutdownSignal,
    signal_task: Option<JoinHandle<()>>,
}

/// Handles owned while the app is running
struct Running {
    tasks: Vec<(String, JoinHandle<()>)>,
    heartbeat: Option<JoinHandle<()>>,
    app_providers: ProviderMap,
}

pub(crate) struct Lifecycle {
    name: String,
    version: String,
    layout: TopicLayout,
    settings: SettingsSlot,
    adapters: ProviderMap,
    mqtt: Arc<dyn MqttPort>,
    clock: Arc<dyn Clock>,
    injected_shutdown: Option<ShutdownSignal>,
    heartbeat_interval: Option<Duration>,
    registrations: Vec<Registration>,
    startup_hooks: Vec<Injected<()>>,
    shutdown_hooks: Vec<Injected<()>>,
    error_types: ErrorTypeMap,
    state_tx: watch::Sender<LifecycleState>,
}

// ========== PURE HELPERS ==========

/// Settings given to the builder, or defaults with environment overrides
fn effective_settings(settings: Option<SettingsSlot>) -> Result<SettingsSlot, ConfigError> {
    match settings {
        Some(slot) => Ok(slot),
        None => {
            let mut settings = Settings::default();
            settings.apply_env_overrides();
            settings.validate()?;
            Ok(SettingsSlot::new(settings))
        }
    }
}

/// Topic prefix: explicit `app.prefix`, else the app name
fn topic_prefix(settings: &Settings, name: &str) -> Result<String, ConfigError> {
    let prefix = settings
        .app
        .prefix
        .clone()
        .unwrap_or_else(|| name.to_string());
    validate_segment(&prefix)
        .map_err(|reason| ConfigError::InvalidConfig(format!("topic prefix '{prefix}': {reason}")))?;
    Ok(prefix)
}

async fn report_failure(errors: &ErrorPublisher, ctx: &DeviceContext, error: HandlerError) {
    error!(device = %ctx.name(), "Handler failed: {}", error);
    errors
        .publish(error.as_ref(), Some(ctx.name()), ctx.is_root())
        .await;
}

/// Router entry for one registration; failures are published, never returned
fn command_proxy(
    kind: &RegistrationKind,
    ctx: DeviceContext,
    providers: Arc<ProviderMap>,
    errors: Arc<ErrorPublisher>,
) -> RouteHandler {
    let command = match kind {
        RegistrationKind::Command(command) => Some(command.clone()),
        _ => None,
    };

    Arc::new(move |topic: String, payload: String| -> BoxFuture<'static, ()> {
        let command = command.clone();
        let ctx = ctx.clone();
        let providers = providers.clone();
        let errors = errors.clone();
        let span = crate::command_span!(device = %ctx.name(), topic = %topic);

        Box::pin(
            async move {
                match command {
                    Some(command) => match command.invoke(topic, payload, &providers).await {
                        Ok(Some(state)) => {
                            if let Err(e) = ctx.publish_state(&state).await {
                                warn!(device = %ctx.name(), "Failed to publish command state: {}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => report_failure(&errors, &ctx, e).await,
                    },
                    None => match ctx.dispatch_command(topic, payload).await {
                        Some(Ok(())) => {}
                        Some(Err(e)) => report_failure(&errors, &ctx, e).await,
                        None => debug!(device = %ctx.name(), "No on_command handler set"),
                    },
                }
            }
            .instrument(span),
        )
    })
}

async fn stop_port(mqtt: &Arc<dyn MqttPort>) {
    if let Some(lifecycle) = mqtt.lifecycle() {
        if let Err(e) = lifecycle.stop().await {
            warn!("Failed to stop MQTT port: {}", e);
        }
    }
}

impl Lifecycle {
    /// Phase 1: settings, topic prefix, logging, adapters, port and clock
    pub(crate) fn bootstrap(app: App) -> BridgeResult<Self> {
        let App {
            name,
            version,
            registrations,
            startup_hooks,
            shutdown_hooks,
            adapters,
            settings,
            mqtt,
            clock,
            shutdown,
            dry_run,
            heartbeat_interval,
            error_types,
            state_tx,
        } = app;

        let settings = effective_settings(settings)?;
        let base = settings.base().clone();
        logging::init_from_section(&base.logging);

        let name = base.app.name.clone().unwrap_or(name);
        validate_segment(&name).map_err(|reason| RegistrationError::InvalidName {
            name: name.clone(),
            reason,
        })?;
        registrations.check_root_name(&name)?;
        let layout = TopicLayout::new(topic_prefix(&base, &name)?);

        let dry_run = dry_run.unwrap_or(base.app.dry_run);
        if dry_run {
            info!("Dry run: using dry-run adapter variants where registered");
        }
        let adapters = adapters.resolve(dry_run)?;

        let mqtt: Arc<dyn MqttPort> = match mqtt {
            Some(port) => port,
            None => Arc::new(MqttClient::new(
                &base.mqtt,
                &name,
                Some(HealthReporter::will(&layout)),
            )?),
        };
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let lifecycle = Self {
            version: base.app.version.clone().unwrap_or(version),
            name,
            layout,
            settings,
            adapters,
            mqtt,
            clock,
            injected_shutdown: shutdown,
            heartbeat_interval: heartbeat_interval.unwrap_or_else(|| base.app.heartbeat_interval()),
            registrations: registrations.into_entries(),
            startup_hooks,
            shutdown_hooks,
            error_types,
            state_tx,
        };
        lifecycle.transition(LifecycleState::Bootstrapped);
        Ok(lifecycle)
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state_tx.send_replace(next);
        info!(app = %self.name, state = %next, from = %previous, "Lifecycle transition");
    }

    pub(crate) async fn run(self) -> BridgeResult<()> {
        let span = crate::lifecycle_span!(app = %self.name, version = %self.version);
        self.run_phases().instrument(span).await
    }

    async fn run_phases(mut self) -> BridgeResult<()> {
        let services = match self.start_services().await {
            Ok(services) => services,
            Err(e) => {
                self.transition(LifecycleState::Stopped);
                return Err(e);
            }
        };

        match self.start(&services).await {
            Ok(running) => {
                self.transition(LifecycleState::Running);
                services.shutdown.wait().await;
                self.transition(LifecycleState::ShuttingDown);
                self.teardown(running, services).await;
                Ok(())
            }
            Err(e) => {
                error!(app = %self.name, "Startup failed: {}", e);
                self.abort(services).await;
                Err(e)
            }
        }
    }

    /// Phases 2 and 3: health and error services, port start, shutdown signal
    async fn start_services(&mut self) -> BridgeResult<Services> {
        let health = Arc::new(HealthReporter::new(
            self.mqtt.clone(),
            self.layout.clone(),
            self.version.clone(),
            self.clock.clone(),
        ));
        let errors = Arc::new(
            ErrorPublisher::new(self.mqtt.clone(), self.layout.clone())
                .with_type_map(std::mem::take(&mut self.error_types)),
        );

        if let Some(lifecycle) = self.mqtt.lifecycle() {
            lifecycle.start().await?;
            info!(app = %self.name, "MQTT port started");
        }

        let (shutdown, signal_task) = match self.injected_shutdown.take() {
            Some(signal) => (signal, None),
            None => {
                let signal = ShutdownSignal::new();
                match signal.install_os_handlers() {
                    Ok(task) => (signal, Some(task)),
                    Err(e) => {
                        stop_port(&self.mqtt).await;
                        return Err(BridgeError::internal(format!(
                            "failed to install signal handlers: {e}"
                        )));
                    }
                }
            }
        };

        Ok(Services {
            health,
            errors,
            shutdown,
            signal_task,
        })
    }

    /// Phases 4 to 9: announce, wire commands, subscribe, hooks, heartbeat, launch
    async fn start(&mut self, services: &Services) -> BridgeResult<Running> {
        for registration in &self.registrations {
            services
                .health
                .publish_device_available(registration.display_name(&self.name), registration.is_root())
                .await;
        }

        let router = Arc::new(TopicRouter::new(self.layout.clone()));
        let mut units = Vec::with_capacity(self.registrations.len());
        for registration in std::mem::take(&mut self.registrations) {
            let ctx = DeviceContext::new(
                registration.display_name(&self.name).to_string(),
                registration.is_root(),
                self.layout.clone(),
                self.mqtt.clone(),
                services.shutdown.clone(),
                self.clock.clone(),
                self.adapters.clone(),
                self.settings.clone(),
            );
            let providers = Arc::new(ctx.providers());
            if registration.kind.receives_commands() {
                let proxy = command_proxy(
                    &registration.kind,
                    ctx.clone(),
                    providers.clone(),
                    services.errors.clone(),
                );
                router.register(ctx.name(), proxy, registration.is_root())?;
            }
            units.push((registration, ctx, providers));
        }
        self.transition(LifecycleState::DevicesBuilt);

        let topics = router.subscriptions();
        for topic in &topics {
            self.mqtt.subscribe(topic).await?;
            debug!(topic = %topic, "Subscribed");
        }
        match self.mqtt.inbound() {
            Some(inbound) => inbound.on_message(router.clone().into_callback()),
            None if !topics.is_empty() => {
                warn!("MQTT port cannot receive messages; command handlers will never run")
            }
            None => {}
        }

        let app_ctx = AppContext::new(
            self.name.clone(),
            self.settings.clone(),
            self.adapters.clone(),
        );
        let app_providers = app_ctx.providers();
        for hook in &self.startup_hooks {
            hook.invoke(&app_providers)
                .await
                .map_err(BridgeError::StartupHook)?;
        }

        services.health.publish_heartbeat().await;
        let heartbeat = self.heartbeat_interval.map(|interval| {
            let health = services.health.clone();
            let shutdown = services.shutdown.clone();
            tokio::spawn(async move {
                while shutdown.sleep(interval).await {
                    health.publish_heartbeat().await;
                }
            })
        });

        let tasks = units
            .into_iter()
            .filter_map(|(registration, ctx, providers)| {
                self.launch(registration, ctx, providers, services)
            })
            .collect();

        Ok(Running {
            tasks,
            heartbeat,
            app_providers,
        })
    }

    /// Phase 9 for one registration; command registrations have no task
    fn launch(
        &self,
        registration: Registration,
        ctx: DeviceContext,
        providers: Arc<ProviderMap>,
        services: &Services,
    ) -> Option<(String, JoinHandle<()>)> {
        let errors = services.errors.clone();
        let span = ctx.logger().span().clone();
        let name = ctx.name().to_string();

        let task = match registration.kind {
            RegistrationKind::Device(handler) => tokio::spawn(
                async move {
                    match handler.invoke(&providers).await {
                        Ok(()) => debug!(device = %ctx.name(), "Device handler returned"),
                        Err(e) => report_failure(&errors, &ctx, e).await,
                    }
                }
                .instrument(span),
            ),
            RegistrationKind::Telemetry {
                handler,
                interval,
                options,
            } => {
                let mut pipeline = options.into_pipeline(self.clock.clone());
                tokio::spawn(
                    async move {
                        loop {
                            if ctx.shutdown_requested() {
                                break;
                            }
                            match handler.invoke(&providers).await {
                                Ok(state) => {
                                    if let Some(state) = pipeline.process(state) {
                                        match ctx.publish_state(&state).await {
                                            Ok(()) => pipeline.published(state),
                                            Err(e) => warn!(
                                                device = %ctx.name(),
                                                "Failed to publish telemetry: {}", e
                                            ),
                                        }
                                    }
                                }
                                Err(e) => report_failure(&errors, &ctx, e).await,
                            }
                            if !ctx.sleep(interval).await {
                                break;
                            }
                        }
                    }
                    .instrument(span),
                )
            }
            RegistrationKind::Command(_) => return None,
        };

        info!(device = %name, "Registration launched");
        Some((name, task))
    }

    /// Phase 11
    async fn teardown(&self, running: Running, services: Services) {
        let Running {
            tasks,
            heartbeat,
            app_providers,
        } = running;

        for (_, task) in &tasks {
            task.abort();
        }
        for (name, task) in tasks {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(device = %name, "Task ended abnormally: {}", e),
            }
        }

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
            let _ = heartbeat.await;
        }

        for hook in &self.shutdown_hooks {
            if let Err(e) = hook.invoke(&app_providers).await {
                error!(app = %self.name, "Shutdown hook failed: {}", e);
            }
        }

        services.health.shutdown().await;
        stop_port(&self.mqtt).await;
        if let Some(task) = services.signal_task {
            task.abort();
        }
        self.transition(LifecycleState::Stopped);
    }

    /// Undo a partial start: nothing was launched yet
    async fn abort(&self, services: Services) {
        services.health.shutdown().await;
        stop_port(&self.mqtt).await;
        if let Some(task) = services.signal_task {
            task.abort();
        }
        self.transition(LifecycleState::Stopped);
    }
}
