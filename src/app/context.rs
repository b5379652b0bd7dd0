//! Runtime handles given to handlers
//!
//! A [`DeviceContext`] is built once per registration and lives as long as the
//! registration's task. It scopes every publish to its own topics and exposes
//! shutdown-aware waiting. Hooks get the narrower [`AppContext`].

use crate::clock::Clock;
use crate::config::{AppSettings, Settings};
use crate::error::{HandlerResult, InjectionError};
use crate::injection::{Inject, ProviderMap};
use crate::shutdown::ShutdownSignal;
use crate::topics::{Address, TopicLayout};
use crate::transport::{BoxFuture, MqttPort, QoS, TransportError};
use crate::State;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{debug, Span};

/// Raw `(topic, payload)` command callback registered by a device
pub type CommandCallback =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, HandlerResult<()>> + Send + Sync>;

/// Settings as handed to contexts: the base [`Settings`] plus a hook that
/// registers the user settings type under every key it answers for
#[derive(Clone)]
pub(crate) struct SettingsSlot {
    base: Arc<Settings>,
    register: Arc<dyn Fn(&mut ProviderMap) + Send + Sync>,
}

impl SettingsSlot {
    pub(crate) fn new<S: AppSettings>(settings: S) -> Self {
        let base = Arc::new(settings.base().clone());
        let user = Arc::new(settings);
        let base_key = base.clone();
        Self {
            base,
            register: Arc::new(move |providers: &mut ProviderMap| {
                providers.insert(user.clone());
                providers.insert(base_key.clone());
            }),
        }
    }

    pub(crate) fn base(&self) -> &Arc<Settings> {
        &self.base
    }

    pub(crate) fn register(&self, providers: &mut ProviderMap) {
        (self.register)(providers);
    }
}

/// Per-device logger, injectable into handlers.
///
/// Everything logged through it carries a `device` field.
#[derive(Debug, Clone)]
pub struct DeviceLogger {
    name: String,
    span: Span,
}

impl DeviceLogger {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let span = crate::device_span!(name);
        Self { name, span }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn debug(&self, message: &str) {
        self.span.in_scope(|| tracing::debug!(device = %self.name, "{}", message));
    }

    pub fn info(&self, message: &str) {
        self.span.in_scope(|| tracing::info!(device = %self.name, "{}", message));
    }

    pub fn warn(&self, message: &str) {
        self.span.in_scope(|| tracing::warn!(device = %self.name, "{}", message));
    }

    pub fn error(&self, message: &str) {
        self.span.in_scope(|| tracing::error!(device = %self.name, "{}", message));
    }
}

struct DeviceInner {
    name: String,
    is_root: bool,
    layout: TopicLayout,
    mqtt: Arc<dyn MqttPort>,
    shutdown: ShutdownSignal,
    clock: Arc<dyn Clock>,
    adapters: ProviderMap,
    settings: SettingsSlot,
    logger: DeviceLogger,
    command: StdMutex<Option<CommandCallback>>,
}

/// Handle a device, telemetry or command handler uses to talk to the outside.
///
/// Cheap to clone; clones share the same registration.
#[derive(Clone)]
pub struct DeviceContext {
    inner: Arc<DeviceInner>,
}

impl DeviceContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        is_root: bool,
        layout: TopicLayout,
        mqtt: Arc<dyn MqttPort>,
        shutdown: ShutdownSignal,
        clock: Arc<dyn Clock>,
        adapters: ProviderMap,
        settings: SettingsSlot,
    ) -> Self {
        let logger = DeviceLogger::new(name.clone());
        Self {
            inner: Arc::new(DeviceInner {
                name,
                is_root,
                layout,
                mqtt,
                shutdown,
                clock,
                adapters,
                settings,
                logger,
                command: StdMutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_root
    }

    fn address(&self) -> Address<'_> {
        Address::new(&self.inner.name, self.inner.is_root)
    }

    pub fn settings(&self) -> &Settings {
        self.inner.settings.base()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn logger(&self) -> &DeviceLogger {
        &self.inner.logger
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.inner.shutdown.clone()
    }

    /// `{prefix}/{name}/state`, or `{prefix}/state` for the root registration
    pub fn state_topic(&self) -> String {
        self.inner.layout.state(self.address())
    }

    pub fn command_topic(&self) -> String {
        self.inner.layout.command(self.address())
    }

    /// Publish `state` as this device's retained state
    pub async fn publish_state(&self, state: &State) -> Result<(), TransportError> {
        let payload = serde_json::Value::Object(state.clone()).to_string();
        let topic = self.state_topic();
        self.inner
            .mqtt
            .publish(&topic, &payload, true, QoS::AtLeastOnce)
            .await?;
        debug!(device = %self.name(), topic = %topic, "State published");
        Ok(())
    }

    /// Publish a raw payload on a channel below this device
    pub async fn publish(
        &self,
        channel: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), TransportError> {
        let topic = self.inner.layout.channel(self.address(), channel);
        self.inner
            .mqtt
            .publish(&topic, payload, retain, QoS::AtLeastOnce)
            .await
    }

    /// Sleep unless shutdown comes first; `false` means interrupted
    pub async fn sleep(&self, duration: Duration) -> bool {
        self.inner.shutdown.sleep(duration).await
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    pub async fn wait_for_shutdown(&self) {
        self.inner.shutdown.wait().await;
    }

    /// Handle inbound messages on this device's command topic.
    ///
    /// The callback gets the raw `(topic, payload)`; nothing is published on
    /// its behalf. A later registration replaces an earlier one.
    pub fn on_command<F, Fut>(&self, callback: F)
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        let callback: CommandCallback =
            Arc::new(move |topic: String, payload: String| -> BoxFuture<'static, HandlerResult<()>> {
                Box::pin(callback(topic, payload))
            });
        *self
            .inner
            .command
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(callback);
    }

    fn command_callback(&self) -> Option<CommandCallback> {
        self.inner
            .command
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run the `on_command` callback; `None` when the device never set one
    pub(crate) async fn dispatch_command(
        &self,
        topic: String,
        payload: String,
    ) -> Option<HandlerResult<()>> {
        let callback = self.command_callback()?;
        Some(callback(topic, payload).await)
    }

    /// Adapter registered for port type `P`, e.g. `Arc<dyn TemperatureSensor>`
    pub fn adapter<P: Inject>(&self) -> Option<P> {
        self.inner.adapters.get::<P>()
    }

    pub fn require_adapter<P: Inject>(&self) -> Result<P, InjectionError> {
        self.adapter::<P>()
            .ok_or_else(|| InjectionError::UnresolvedType {
                parameter: "adapter".to_string(),
                type_name: std::any::type_name::<P>().to_string(),
                available: self.inner.adapters.available(),
            })
    }

    /// Everything a handler running in this context can ask for
    pub fn providers(&self) -> ProviderMap {
        let mut providers = ProviderMap::new();
        providers.extend(&self.inner.adapters);
        self.inner.settings.register(&mut providers);
        providers.insert(self.clone());
        providers.insert(self.inner.logger.clone());
        providers.insert(self.inner.clock.clone());
        providers.insert(self.inner.shutdown.clone());
        providers
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("name", &self.inner.name)
            .field("is_root", &self.inner.is_root)
            .finish()
    }
}

/// Context for startup and shutdown hooks: settings and adapters, no topics
#[derive(Clone)]
pub struct AppContext {
    name: String,
    settings: SettingsSlot,
    adapters: ProviderMap,
}

impl AppContext {
    pub(crate) fn new(name: String, settings: SettingsSlot, adapters: ProviderMap) -> Self {
        Self {
            name,
            settings,
            adapters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Settings {
        self.settings.base()
    }

    pub fn adapter<P: Inject>(&self) -> Option<P> {
        self.adapters.get::<P>()
    }

    pub fn providers(&self) -> ProviderMap {
        let mut providers = ProviderMap::new();
        providers.extend(&self.adapters);
        self.settings.register(&mut providers);
        providers.insert(self.clone());
        providers
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("name", &self.name)
            .field("adapters", &self.adapters)
            .finish()
    }
}
