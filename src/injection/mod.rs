//! Type-keyed dependency injection for handlers
//!
//! A handler declares its parameters as a list of [`ParamSpec`]s. The list is
//! checked once at registration ([`build_plan`]) and turned into an
//! [`InjectionPlan`]; every invocation then only does map lookups against a
//! [`ProviderMap`].
//!
//! Providers are registered under every type they should answer for. A user
//! settings type is inserted as both `Arc<UserSettings>` and `Arc<Settings>`, an
//! adapter as `Arc<dyn Port>`, so resolution is a single exact lookup.

pub mod handler;

use crate::error::{InjectionError, RegistrationError};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use handler::{
    CommandFn, DynHandler, ErasedCommand, ErasedFn, InjectableFn, Injected, InjectedCommand,
};

/// Anything that can be handed to a handler by value
pub trait Inject: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Inject for T {}

/// Runtime identity of an injectable type
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// How a parameter can be supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Can be supplied by name; the only kind the injector accepts
    Named,
    PositionalOnly,
    Variadic,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParamKind::Named => "named",
            ParamKind::PositionalOnly => "positional-only",
            ParamKind::Variadic => "variadic",
        };
        f.write_str(label)
    }
}

/// Declared handler parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub ty: Option<TypeKey>,
}

impl ParamSpec {
    /// Named parameter of type `T`
    pub fn typed<T: 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Named,
            ty: Some(TypeKey::of::<T>()),
        }
    }

    /// Named parameter with no type; only valid when excluded from injection
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Named,
            ty: None,
        }
    }

    pub fn with_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Ordered `(parameter, type)` pairs resolved for every invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionPlan {
    entries: Vec<(String, TypeKey)>,
}

impl InjectionPlan {
    pub fn entries(&self) -> &[(String, TypeKey)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check a handler's declared parameters and produce its plan.
///
/// Parameters named in `excluded` are filled by the caller (the MQTT topic and
/// payload slots of command handlers) and are skipped.
pub fn build_plan(
    handler: &str,
    params: &[ParamSpec],
    excluded: &[&str],
) -> Result<InjectionPlan, RegistrationError> {
    let mut entries = Vec::with_capacity(params.len());

    for param in params {
        if excluded.contains(&param.name.as_str()) {
            continue;
        }
        if param.kind != ParamKind::Named {
            return Err(RegistrationError::UnsupportedParameterKind {
                handler: handler.to_string(),
                parameter: param.name.clone(),
                kind: param.kind.to_string(),
            });
        }
        let ty = param.ty.ok_or_else(|| RegistrationError::UntypedParameter {
            handler: handler.to_string(),
            parameter: param.name.clone(),
        })?;
        entries.push((param.name.clone(), ty));
    }

    Ok(InjectionPlan { entries })
}

/// Type-erased provider instance
pub type ProviderValue = Arc<dyn Any + Send + Sync>;

/// Live instances keyed by the type they answer for
#[derive(Clone, Default)]
pub struct ProviderMap {
    entries: HashMap<TypeKey, ProviderValue>,
}

impl ProviderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under its own type, replacing any previous provider
    pub fn insert<T: Inject>(&mut self, value: T) {
        self.entries.insert(TypeKey::of::<T>(), Arc::new(value));
    }

    /// Register an already type-erased provider; `value` must hold a `key` type
    pub fn insert_erased(&mut self, key: TypeKey, value: ProviderValue) {
        self.entries.insert(key, value);
    }

    /// Copy every provider of `other` into this map
    pub fn extend(&mut self, other: &ProviderMap) {
        for (key, value) in &other.entries {
            self.entries.insert(*key, value.clone());
        }
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeKey::of::<T>())
    }

    pub fn get<T: Inject>(&self) -> Option<T> {
        self.entries
            .get(&TypeKey::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Sorted type names of every provider, used in error messages
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .keys()
            .map(|key| key.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up every planned parameter
    pub fn resolve(&self, plan: &InjectionPlan) -> Result<Resolved, InjectionError> {
        let mut values = Vec::with_capacity(plan.len());
        for (parameter, key) in plan.entries() {
            let value = self
                .entries
                .get(key)
                .ok_or_else(|| InjectionError::UnresolvedType {
                    parameter: parameter.clone(),
                    type_name: key.name().to_string(),
                    available: self.available(),
                })?;
            values.push((*key, value.clone()));
        }
        Ok(Resolved { values, cursor: 0 })
    }
}

impl fmt::Debug for ProviderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.available()).finish()
    }
}

/// Arguments resolved for one invocation, consumed in plan order
pub struct Resolved {
    values: Vec<(TypeKey, ProviderValue)>,
    cursor: usize,
}

impl Resolved {
    /// Take the next argument as `T`
    pub fn next<T: Inject>(&mut self) -> Result<T, InjectionError> {
        let index = self.cursor;
        let expected = std::any::type_name::<T>();
        let (key, value) = self
            .values
            .get(index)
            .ok_or_else(|| InjectionError::TypeMismatch {
                index,
                expected: expected.to_string(),
                found: "nothing".to_string(),
            })?;
        let typed = value
            .downcast_ref::<T>()
            .ok_or_else(|| InjectionError::TypeMismatch {
                index,
                expected: expected.to_string(),
                found: key.name().to_string(),
            })?;
        self.cursor += 1;
        Ok(typed.clone())
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Sensor: Send + Sync {
        fn read(&self) -> f64;
    }

    struct FixedSensor(f64);

    impl Sensor for FixedSensor {
        fn read(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_build_plan_keeps_order() {
        let params = vec![
            ParamSpec::typed::<String>("name"),
            ParamSpec::typed::<u32>("count"),
        ];
        let plan = build_plan("handler", &params, &[]).unwrap();
        let names: Vec<&str> = plan.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "count"]);
        assert_eq!(plan.entries()[1].1, TypeKey::of::<u32>());
    }

    #[test]
    fn test_build_plan_rejects_untyped() {
        let params = vec![ParamSpec::untyped("mystery")];
        let err = build_plan("poll", &params, &[]).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::UntypedParameter {
                handler: "poll".to_string(),
                parameter: "mystery".to_string(),
            }
        );
    }

    #[test]
    fn test_build_plan_rejects_positional_and_variadic() {
        for kind in [ParamKind::PositionalOnly, ParamKind::Variadic] {
            let params = vec![ParamSpec::typed::<u8>("args").with_kind(kind)];
            let err = build_plan("poll", &params, &[]).unwrap_err();
            assert!(matches!(
                err,
                RegistrationError::UnsupportedParameterKind { .. }
            ));
        }
    }

    #[test]
    fn test_build_plan_skips_excluded() {
        let params = vec![
            ParamSpec::untyped("topic"),
            ParamSpec::untyped("payload"),
            ParamSpec::typed::<String>("label"),
        ];
        let plan = build_plan("relay", &params, &["topic", "payload"]).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_resolve_exact_match() {
        let mut providers = ProviderMap::new();
        providers.insert(42u32);
        providers.insert("hello".to_string());

        let plan = build_plan(
            "h",
            &[
                ParamSpec::typed::<String>("s"),
                ParamSpec::typed::<u32>("n"),
            ],
            &[],
        )
        .unwrap();

        let mut resolved = providers.resolve(&plan).unwrap();
        assert_eq!(resolved.next::<String>().unwrap(), "hello");
        assert_eq!(resolved.next::<u32>().unwrap(), 42);
        assert_eq!(resolved.remaining(), 0);
    }

    #[test]
    fn test_resolve_trait_object_provider() {
        let mut providers = ProviderMap::new();
        let sensor: Arc<dyn Sensor> = Arc::new(FixedSensor(21.5));
        providers.insert(sensor);

        let plan = build_plan("h", &[ParamSpec::typed::<Arc<dyn Sensor>>("sensor")], &[]).unwrap();
        let mut resolved = providers.resolve(&plan).unwrap();
        let sensor = resolved.next::<Arc<dyn Sensor>>().unwrap();
        assert_eq!(sensor.read(), 21.5);
    }

    #[test]
    fn test_unresolved_lists_available() {
        let mut providers = ProviderMap::new();
        providers.insert(1u8);

        let plan = build_plan("h", &[ParamSpec::typed::<String>("s")], &[]).unwrap();
        let err = providers.resolve(&plan).err().unwrap();
        match &err {
            InjectionError::UnresolvedType {
                parameter,
                type_name,
                available,
            } => {
                assert_eq!(parameter, "s");
                assert!(type_name.contains("String"));
                assert_eq!(available, &vec!["u8".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("u8"));
    }

    #[test]
    fn test_next_reports_mismatch() {
        let mut providers = ProviderMap::new();
        providers.insert(7u16);
        let plan = build_plan("h", &[ParamSpec::typed::<u16>("n")], &[]).unwrap();

        let mut resolved = providers.resolve(&plan).unwrap();
        assert!(matches!(
            resolved.next::<String>(),
            Err(InjectionError::TypeMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_extend_and_get() {
        let mut base = ProviderMap::new();
        base.insert(3i64);
        let mut scoped = ProviderMap::new();
        scoped.insert(true);
        scoped.extend(&base);

        assert_eq!(scoped.get::<i64>(), Some(3));
        assert_eq!(scoped.get::<bool>(), Some(true));
        assert!(scoped.contains::<i64>());
        assert!(!base.contains::<bool>());
        assert_eq!(scoped.len(), 2);
    }
}
