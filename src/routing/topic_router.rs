//! Inbound command routing
//!
//! Maps `{prefix}/{device}/set` to the named device's handler and `{prefix}/set`
//! to the root handler. Every other topic shape is ignored, which keeps the
//! framework's own state, availability and error topics from looping back.

use crate::error::RegistrationError;
use crate::topics::{Address, TopicLayout};
use crate::transport::{BoxFuture, MessageCallback};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Command callback for one registration: `(topic, payload)`
pub type RouteHandler = Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// What happened to an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the named registration, or to the root one when `None`
    Dispatched(Option<String>),
    /// Command topic shape, but nothing registered for it
    Unhandled,
    /// Not a command topic
    Ignored,
}

#[derive(Default)]
struct RouteTable {
    named: HashMap<String, RouteHandler>,
    order: Vec<String>,
    root: Option<(String, RouteHandler)>,
}

/// Routes inbound `(topic, payload)` pairs to per-device command handlers
pub struct TopicRouter {
    layout: TopicLayout,
    table: RwLock<RouteTable>,
}

impl TopicRouter {
    pub fn new(layout: TopicLayout) -> Self {
        Self {
            layout,
            table: RwLock::new(RouteTable::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the command handler for `name`; `is_root` binds it to `{prefix}/set`
    pub fn register(
        &self,
        name: &str,
        handler: RouteHandler,
        is_root: bool,
    ) -> Result<(), RegistrationError> {
        let mut table = self.write();

        if is_root {
            if let Some((existing, _)) = &table.root {
                return Err(RegistrationError::DuplicateRoot {
                    existing: existing.clone(),
                    attempted: name.to_string(),
                });
            }
            table.root = Some((name.to_string(), handler));
            return Ok(());
        }

        if table.named.contains_key(name) {
            return Err(RegistrationError::DuplicateName(name.to_string()));
        }
        table.named.insert(name.to_string(), handler);
        table.order.push(name.to_string());
        Ok(())
    }

    /// Topics to subscribe, derived from the current registrations
    pub fn subscriptions(&self) -> Vec<String> {
        let table = self.read();
        let mut topics = Vec::with_capacity(table.order.len() + 1);
        if table.root.is_some() {
            topics.push(self.layout.command(Address::Root));
        }
        topics.extend(
            table
                .order
                .iter()
                .map(|name| self.layout.command(Address::Named(name))),
        );
        topics
    }

    /// Device segment of a named command topic
    fn device_segment<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic
            .strip_prefix(self.layout.prefix())?
            .strip_prefix('/')?;
        let device = rest.strip_suffix("/set")?;
        if device.is_empty() || device.contains('/') {
            return None;
        }
        Some(device)
    }

    /// Dispatch one inbound message
    pub async fn route(&self, topic: String, payload: String) -> RouteOutcome {
        let (handler, target) = {
            let table = self.read();
            if topic == self.layout.command(Address::Root) {
                match &table.root {
                    Some((_, handler)) => (handler.clone(), None),
                    None => {
                        warn!("No root command handler for {}", topic);
                        return RouteOutcome::Unhandled;
                    }
                }
            } else if let Some(device) = self.device_segment(&topic) {
                match table.named.get(device) {
                    Some(handler) => (handler.clone(), Some(device.to_string())),
                    None => {
                        warn!("No command handler for device '{}' on {}", device, topic);
                        return RouteOutcome::Unhandled;
                    }
                }
            } else {
                return RouteOutcome::Ignored;
            }
        };

        debug!(topic = %topic, "Dispatching command");
        handler(topic, payload).await;
        RouteOutcome::Dispatched(target)
    }

    /// Inbound-message callback for an MQTT port
    pub fn into_callback(self: Arc<Self>) -> MessageCallback {
        Arc::new(move |topic: String, payload: String| -> BoxFuture<'static, ()> {
            let router = self.clone();
            Box::pin(async move {
                router.route(topic, payload).await;
            })
        })
    }
}
