//! Publish decisions for telemetry samples
//!
//! A strategy sees every sample together with the last published one and
//! decides whether the new sample goes out.

use crate::clock::{Clock, SystemClock};
use crate::State;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("call count must be at least 1")]
    ZeroCalls,
    #[error("period must be a finite number of seconds >= 0, got {0}")]
    InvalidPeriod(f64),
}

pub trait PublishStrategy: Send + Sync {
    /// `previous` is the last published state, `None` before the first publish
    fn should_publish(&mut self, current: &State, previous: Option<&State>) -> bool;

    /// Called after a sample was actually published
    fn on_published(&mut self) {}

    /// Share the app clock with time-based strategies
    fn bind_clock(&mut self, _clock: Arc<dyn Clock>) {}
}

impl PublishStrategy for Box<dyn PublishStrategy> {
    fn should_publish(&mut self, current: &State, previous: Option<&State>) -> bool {
        (**self).should_publish(current, previous)
    }

    fn on_published(&mut self) {
        (**self).on_published();
    }

    fn bind_clock(&mut self, clock: Arc<dyn Clock>) {
        (**self).bind_clock(clock);
    }
}

enum Period {
    Calls { every: u64, count: u64 },
    Seconds { every: f64, last: Option<f64>, clock: Arc<dyn Clock> },
}

/// Throttle by call count or elapsed time
pub struct Every {
    period: Period,
}

impl Every {
    /// Publish on calls `n`, `2n`, ... counted since the last publish
    pub fn calls(n: u64) -> Result<Self, StrategyError> {
        if n == 0 {
            return Err(StrategyError::ZeroCalls);
        }
        Ok(Self {
            period: Period::Calls { every: n, count: 0 },
        })
    }

    /// Publish when at least `seconds` passed since the last publish
    pub fn seconds(seconds: f64) -> Result<Self, StrategyError> {
        if !(seconds.is_finite() && seconds >= 0.0) {
            return Err(StrategyError::InvalidPeriod(seconds));
        }
        Ok(Self {
            period: Period::Seconds {
                every: seconds,
                last: None,
                clock: Arc::new(SystemClock::new()),
            },
        })
    }
}

impl PublishStrategy for Every {
    fn should_publish(&mut self, _current: &State, _previous: Option<&State>) -> bool {
        match &mut self.period {
            Period::Calls { every, count } => {
                *count += 1;
                *count % *every == 0
            }
            Period::Seconds { every, last, clock } => match last {
                None => true,
                Some(last) => clock.now() - *last >= *every,
            },
        }
    }

    fn on_published(&mut self) {
        match &mut self.period {
            Period::Calls { count, .. } => *count = 0,
            Period::Seconds { last, clock, .. } => *last = Some(clock.now()),
        }
    }

    fn bind_clock(&mut self, bound: Arc<dyn Clock>) {
        if let Period::Seconds { clock, .. } = &mut self.period {
            *clock = bound;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Deadband {
    None,
    Global(f64),
    PerField(HashMap<String, f64>),
}

/// Publish when the sample differs from the last published one.
///
/// With a dead-band, numeric leaves only count as changed when
/// `|current - previous| > threshold`. Added or removed keys and changed
/// non-numeric values always count.
#[derive(Debug, Clone, PartialEq)]
pub struct OnChange {
    deadband: Deadband,
}

impl Default for OnChange {
    fn default() -> Self {
        Self::new()
    }
}

impl OnChange {
    pub fn new() -> Self {
        Self {
            deadband: Deadband::None,
        }
    }

    pub fn threshold(threshold: f64) -> Self {
        Self {
            deadband: Deadband::Global(threshold),
        }
    }

    /// Thresholds keyed by field name; fields without an entry use exact comparison
    pub fn per_field<I, K>(thresholds: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            deadband: Deadband::PerField(
                thresholds
                    .into_iter()
                    .map(|(field, threshold)| (field.into(), threshold))
                    .collect(),
            ),
        }
    }

    fn threshold_for(&self, field: Option<&str>) -> Option<f64> {
        match &self.deadband {
            Deadband::None => None,
            Deadband::Global(threshold) => Some(*threshold),
            Deadband::PerField(map) => field.and_then(|name| map.get(name).copied()),
        }
    }

    fn objects_differ(&self, current: &State, previous: &State) -> bool {
        if current.len() != previous.len()
            || current.keys().any(|key| !previous.contains_key(key))
        {
            return true;
        }
        current.iter().any(|(key, value)| match previous.get(key) {
            Some(old) => self.values_differ(Some(key), value, old),
            None => true,
        })
    }

    fn values_differ(&self, field: Option<&str>, current: &Value, previous: &Value) -> bool {
        match (current, previous) {
            (Value::Object(current), Value::Object(previous)) => {
                self.objects_differ(current, previous)
            }
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => match self.threshold_for(field) {
                    Some(threshold) => (a - b).abs() > threshold,
                    None => a != b,
                },
                _ => a != b,
            },
            _ => current != previous,
        }
    }
}

impl PublishStrategy for OnChange {
    fn should_publish(&mut self, current: &State, previous: Option<&State>) -> bool {
        match previous {
            None => true,
            Some(previous) => self.objects_differ(current, previous),
        }
    }
}

/// Publish when any child agrees; every child is asked on every call
pub struct AnyOf {
    children: Vec<Box<dyn PublishStrategy>>,
}

impl AnyOf {
    pub fn new(children: Vec<Box<dyn PublishStrategy>>) -> Self {
        Self { children }
    }

    pub fn or<S: PublishStrategy + 'static>(mut self, other: S) -> Self {
        self.children.push(Box::new(other));
        self
    }
}

/// Publish when every child agrees; every child is asked on every call
pub struct AllOf {
    children: Vec<Box<dyn PublishStrategy>>,
}

impl AllOf {
    pub fn new(children: Vec<Box<dyn PublishStrategy>>) -> Self {
        Self { children }
    }

    pub fn and<S: PublishStrategy + 'static>(mut self, other: S) -> Self {
        self.children.push(Box::new(other));
        self
    }
}

fn ask_all(
    children: &mut [Box<dyn PublishStrategy>],
    current: &State,
    previous: Option<&State>,
) -> Vec<bool> {
    children
        .iter_mut()
        .map(|child| child.should_publish(current, previous))
        .collect()
}

impl PublishStrategy for AnyOf {
    fn should_publish(&mut self, current: &State, previous: Option<&State>) -> bool {
        ask_all(&mut self.children, current, previous)
            .into_iter()
            .any(|vote| vote)
    }

    fn on_published(&mut self) {
        self.children.iter_mut().for_each(|c| c.on_published());
    }

    fn bind_clock(&mut self, clock: Arc<dyn Clock>) {
        self.children
            .iter_mut()
            .for_each(|c| c.bind_clock(clock.clone()));
    }
}

impl PublishStrategy for AllOf {
    fn should_publish(&mut self, current: &State, previous: Option<&State>) -> bool {
        ask_all(&mut self.children, current, previous)
            .into_iter()
            .all(|vote| vote)
    }

    fn on_published(&mut self) {
        self.children.iter_mut().for_each(|c| c.on_published());
    }

    fn bind_clock(&mut self, clock: Arc<dyn Clock>) {
        self.children
            .iter_mut()
            .for_each(|c| c.bind_clock(clock.clone()));
    }
}

/// `.or()` / `.and()` on any strategy
pub trait StrategyExt: PublishStrategy + Sized + 'static {
    fn or<S: PublishStrategy + 'static>(self, other: S) -> AnyOf {
        AnyOf::new(vec![Box::new(self), Box::new(other)])
    }

    fn and<S: PublishStrategy + 'static>(self, other: S) -> AllOf {
        AllOf::new(vec![Box::new(self), Box::new(other)])
    }
}

impl StrategyExt for Every {}
impl StrategyExt for OnChange {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use serde_json::json;

    fn state(value: Value) -> State {
        match value {
            Value::Object(map) => map,
            _ => panic!("state must be an object"),
        }
    }

    #[test]
    fn test_every_calls() {
        let mut every = Every::calls(3).unwrap();
        let s = state(json!({"t": 1}));
        let votes: Vec<bool> = (0..6).map(|_| every.should_publish(&s, None)).collect();
        assert_eq!(votes, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_every_calls_resets_on_publish() {
        let mut every = Every::calls(3).unwrap();
        let s = state(json!({"t": 1}));
        every.should_publish(&s, None);
        every.should_publish(&s, None);
        every.on_published();
        assert!(!every.should_publish(&s, None));
        assert!(!every.should_publish(&s, None));
        assert!(every.should_publish(&s, None));
    }

    #[test]
    fn test_every_rejects_invalid_periods() {
        assert_eq!(Every::calls(0).err(), Some(StrategyError::ZeroCalls));
        assert_eq!(
            Every::seconds(-1.0).err(),
            Some(StrategyError::InvalidPeriod(-1.0))
        );
        assert!(Every::seconds(f64::NAN).is_err());
        assert!(Every::seconds(f64::INFINITY).is_err());
        assert!(Every::seconds(0.0).is_ok());
        assert!(Every::calls(1).is_ok());
    }

    #[test]
    fn test_every_seconds() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut every = Every::seconds(10.0).unwrap();
        every.bind_clock(clock.clone());
        let s = state(json!({"t": 1}));

        assert!(every.should_publish(&s, None));
        every.on_published();
        clock.advance(9.9);
        assert!(!every.should_publish(&s, None));
        clock.advance(0.1);
        assert!(every.should_publish(&s, None));
    }

    #[test]
    fn test_on_change_exact() {
        let mut strategy = OnChange::new();
        let a = state(json!({"t": 21.0, "mode": "auto"}));
        let b = state(json!({"t": 21.0, "mode": "auto"}));
        let c = state(json!({"t": 21.01, "mode": "auto"}));

        assert!(strategy.should_publish(&a, None));
        assert!(!strategy.should_publish(&b, Some(&a)));
        assert!(strategy.should_publish(&c, Some(&a)));
    }

    #[test]
    fn test_on_change_threshold_is_strict() {
        let mut strategy = OnChange::threshold(0.5);
        let prev = state(json!({"t": 20.0}));

        assert!(!strategy.should_publish(&state(json!({"t": 20.5})), Some(&prev)));
        assert!(strategy.should_publish(&state(json!({"t": 20.6})), Some(&prev)));
        assert!(strategy.should_publish(&state(json!({"t": 19.4})), Some(&prev)));
    }

    #[test]
    fn test_on_change_structural_difference_always_triggers() {
        let mut strategy = OnChange::threshold(100.0);
        let prev = state(json!({"t": 20.0}));

        assert!(strategy.should_publish(&state(json!({"t": 20.0, "h": 40})), Some(&prev)));
        assert!(strategy.should_publish(&state(json!({"h": 20.0})), Some(&prev)));
        assert!(strategy.should_publish(&state(json!({"t": "20"})), Some(&prev)));
    }

    #[test]
    fn test_on_change_nested_objects() {
        let mut strategy = OnChange::threshold(1.0);
        let prev = state(json!({"env": {"t": 20.0, "h": 40.0}}));

        assert!(!strategy.should_publish(&state(json!({"env": {"t": 20.5, "h": 40.0}})), Some(&prev)));
        assert!(strategy.should_publish(&state(json!({"env": {"t": 22.0, "h": 40.0}})), Some(&prev)));
        assert!(strategy.should_publish(&state(json!({"env": {"t": 20.0}})), Some(&prev)));
    }

    #[test]
    fn test_on_change_per_field() {
        let mut strategy = OnChange::per_field([("t", 0.5)]);
        let prev = state(json!({"t": 20.0, "h": 40.0}));

        assert!(!strategy.should_publish(&state(json!({"t": 20.3, "h": 40.0})), Some(&prev)));
        assert!(strategy.should_publish(&state(json!({"t": 20.0, "h": 40.1})), Some(&prev)));
    }

    #[test]
    fn test_any_of_evaluates_every_child() {
        let mut strategy = OnChange::new().or(Every::calls(2).unwrap());
        let s = state(json!({"t": 1}));

        // OnChange fires first, Every still counts
        assert!(strategy.should_publish(&s, None));
        assert!(strategy.should_publish(&s, Some(&s)));
        assert!(!strategy.should_publish(&s, Some(&s)));
    }

    #[test]
    fn test_all_of_requires_every_child() {
        let mut strategy = OnChange::new().and(Every::calls(2).unwrap());
        let a = state(json!({"t": 1}));
        let b = state(json!({"t": 2}));

        assert!(!strategy.should_publish(&a, None));
        assert!(strategy.should_publish(&b, Some(&a)));
        strategy.on_published();
        assert!(!strategy.should_publish(&a, Some(&b)));
    }

    #[test]
    fn test_composition_chains() {
        let mut strategy = OnChange::threshold(1.0)
            .or(Every::calls(10).unwrap())
            .or(Every::calls(3).unwrap());
        let s = state(json!({"t": 1}));
        assert!(strategy.should_publish(&s, None));
        assert!(!strategy.should_publish(&s, Some(&s)));
        assert!(strategy.should_publish(&s, Some(&s)));
    }
}
