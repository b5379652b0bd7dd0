//! Registration tables owned by the `App`
//!
//! Everything here is validated when it is registered; by the time the app
//! runs, the tables are immutable.

use crate::error::{BridgeError, HandlerError, RegistrationError};
use crate::injection::{Inject, Injected, InjectedCommand, ProviderMap, ProviderValue, TypeKey};
use crate::telemetry::TelemetryOptions;
use crate::topics::validate_segment;
use crate::State;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a registration runs
pub(crate) enum RegistrationKind {
    /// Runs once in its own task
    Device(Injected<()>),
    /// Polled every `interval`; the returned state is published
    Telemetry {
        handler: Injected<State>,
        interval: Duration,
        options: TelemetryOptions,
    },
    /// Invoked for every message on the registration's command topic
    Command(InjectedCommand),
}

impl RegistrationKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            RegistrationKind::Device(_) => "device",
            RegistrationKind::Telemetry { .. } => "telemetry",
            RegistrationKind::Command(_) => "command",
        }
    }

    /// Device and command registrations listen on a command topic
    pub(crate) fn receives_commands(&self) -> bool {
        !matches!(self, RegistrationKind::Telemetry { .. })
    }
}

/// One device, telemetry or command registration.
///
/// The root registration has no name of its own and is addressed by the
/// app's name.
pub(crate) struct Registration {
    pub(crate) name: Option<String>,
    pub(crate) kind: RegistrationKind,
}

impl Registration {
    pub(crate) fn is_root(&self) -> bool {
        self.name.is_none()
    }

    pub(crate) fn display_name<'a>(&'a self, app_name: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(app_name)
    }
}

/// Ordered registrations with name and root uniqueness enforced across kinds
#[derive(Default)]
pub(crate) struct RegistrationTable {
    entries: Vec<Registration>,
    mixed_warned: bool,
}

impl RegistrationTable {
    pub(crate) fn check_interval(name: &str, interval: Duration) -> Result<(), RegistrationError> {
        if interval.is_zero() {
            return Err(RegistrationError::InvalidInterval {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Reject names that cannot be used, before any handler work is done
    pub(crate) fn check_name(&self, name: Option<&str>) -> Result<(), RegistrationError> {
        match name {
            Some(name) => {
                validate_segment(name).map_err(|reason| RegistrationError::InvalidName {
                    name: name.to_string(),
                    reason,
                })?;
                if self.entries.iter().any(|r| r.name.as_deref() == Some(name)) {
                    return Err(RegistrationError::DuplicateName(name.to_string()));
                }
            }
            None => {
                if let Some(existing) = self.entries.iter().find(|r| r.is_root()) {
                    return Err(RegistrationError::DuplicateRoot {
                        existing: existing.kind.label().to_string(),
                        attempted: "root".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, registration: Registration) -> Result<(), RegistrationError> {
        self.check_name(registration.name.as_deref())?;

        if self.take_mixed_warning(&registration) {
            warn!(
                "Root and named registrations are mixed; the root command topic sits above every named device"
            );
        }

        debug!(
            name = registration.name.as_deref().unwrap_or("<root>"),
            kind = registration.kind.label(),
            "Registered"
        );
        self.entries.push(registration);
        Ok(())
    }

    /// True the first time `incoming` makes the table mix root and named
    /// registrations
    fn take_mixed_warning(&mut self, incoming: &Registration) -> bool {
        if self.mixed_warned {
            return false;
        }
        let has_root = incoming.is_root() || self.entries.iter().any(|r| r.is_root());
        let has_named = !incoming.is_root() || self.entries.iter().any(|r| !r.is_root());
        self.mixed_warned = has_root && has_named;
        self.mixed_warned
    }

    /// A root registration is addressed by the app's name, so no named
    /// registration may use it. Checked once the effective name is known.
    pub(crate) fn check_root_name(&self, app_name: &str) -> Result<(), RegistrationError> {
        let has_root = self.entries.iter().any(Registration::is_root);
        if has_root && self.entries.iter().any(|r| r.name.as_deref() == Some(app_name)) {
            return Err(RegistrationError::RootNameCollision(app_name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn into_entries(self) -> Vec<Registration> {
        self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Zero-argument adapter factory
pub type AdapterFactory<P> = Arc<dyn Fn() -> Result<P, HandlerError> + Send + Sync>;

type ErasedFactory = Arc<dyn Fn() -> Result<ProviderValue, HandlerError> + Send + Sync>;

/// Where an adapter instance comes from
pub enum AdapterSource<P> {
    /// Ready-made instance
    Instance(P),
    /// Built once per run
    Factory(AdapterFactory<P>),
    /// Factory registered in the app's catalog under this name
    Catalog(String),
}

impl<P: Inject> AdapterSource<P> {
    pub fn instance(value: P) -> Self {
        AdapterSource::Instance(value)
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<P, HandlerError> + Send + Sync + 'static,
    {
        AdapterSource::Factory(Arc::new(factory))
    }

    pub fn catalog(name: impl Into<String>) -> Self {
        AdapterSource::Catalog(name.into())
    }

    fn erase(self) -> ErasedSource {
        match self {
            AdapterSource::Instance(value) => ErasedSource::Instance(Arc::new(value)),
            AdapterSource::Factory(factory) => ErasedSource::Factory(Arc::new(move || {
                factory().map(|value| Arc::new(value) as ProviderValue)
            })),
            AdapterSource::Catalog(name) => ErasedSource::Catalog(name),
        }
    }
}

enum ErasedSource {
    Instance(ProviderValue),
    Factory(ErasedFactory),
    Catalog(String),
}

struct CatalogEntry {
    produces: TypeKey,
    factory: ErasedFactory,
}

struct AdapterEntry {
    port: TypeKey,
    primary: ErasedSource,
    dry_run: Option<ErasedSource>,
}

/// Adapters by port type, plus the named factory catalog
#[derive(Default)]
pub(crate) struct AdapterRegistry {
    entries: Vec<AdapterEntry>,
    catalog: HashMap<String, CatalogEntry>,
}

impl AdapterRegistry {
    pub(crate) fn register<P: Inject>(
        &mut self,
        primary: AdapterSource<P>,
        dry_run: Option<AdapterSource<P>>,
    ) -> Result<(), RegistrationError> {
        let port = TypeKey::of::<P>();
        if self.entries.iter().any(|entry| entry.port == port) {
            return Err(RegistrationError::DuplicateAdapter(port.name().to_string()));
        }
        self.entries.push(AdapterEntry {
            port,
            primary: primary.erase(),
            dry_run: dry_run.map(AdapterSource::erase),
        });
        Ok(())
    }

    /// Register a named factory that `AdapterSource::Catalog` can refer to
    pub(crate) fn register_catalog<P, F>(
        &mut self,
        name: &str,
        factory: F,
    ) -> Result<(), RegistrationError>
    where
        P: Inject,
        F: Fn() -> Result<P, HandlerError> + Send + Sync + 'static,
    {
        if self.catalog.contains_key(name) {
            return Err(RegistrationError::DuplicateCatalogEntry(name.to_string()));
        }
        self.catalog.insert(
            name.to_string(),
            CatalogEntry {
                produces: TypeKey::of::<P>(),
                factory: Arc::new(move || factory().map(|value| Arc::new(value) as ProviderValue)),
            },
        );
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn build(&self, port: TypeKey, source: &ErasedSource) -> Result<ProviderValue, BridgeError> {
        match source {
            ErasedSource::Instance(value) => Ok(value.clone()),
            ErasedSource::Factory(factory) => {
                factory().map_err(|e| BridgeError::adapter(port.name(), e.to_string()))
            }
            ErasedSource::Catalog(name) => {
                let entry = self.catalog.get(name).ok_or_else(|| {
                    BridgeError::adapter(port.name(), format!("no catalog entry named '{name}'"))
                })?;
                if entry.produces != port {
                    return Err(BridgeError::adapter(
                        port.name(),
                        format!(
                            "catalog entry '{name}' produces {}",
                            entry.produces.name()
                        ),
                    ));
                }
                (entry.factory)().map_err(|e| BridgeError::adapter(port.name(), e.to_string()))
            }
        }
    }

    /// Build one instance per port, swapping in dry-run variants when asked
    /// and available
    pub(crate) fn resolve(&self, dry_run: bool) -> Result<ProviderMap, BridgeError> {
        let mut providers = ProviderMap::new();
        for entry in &self.entries {
            let source = match (&entry.dry_run, dry_run) {
                (Some(variant), true) => {
                    debug!(port = entry.port.name(), "Using dry-run adapter");
                    variant
                }
                _ => &entry.primary,
            };
            let instance = self.build(entry.port, source)?;
            providers.insert_erased(entry.port, instance);
        }
        Ok(providers)
    }
}
