//! Telemetry post-processing
//!
//! Every value a telemetry handler returns passes through its
//! [`TelemetryPipeline`]: numeric fields are filtered, then the publish
//! strategy decides whether the sample goes out.

pub mod filter;
pub mod strategy;

pub use filter::{Filter, FilterError, LowPass, Pt1};
pub use strategy::{AllOf, AnyOf, Every, OnChange, PublishStrategy, StrategyError, StrategyExt};

use crate::clock::Clock;
use crate::State;
use serde_json::{Number, Value};
use std::sync::Arc;
use tracing::debug;

/// Per-registration telemetry options
#[derive(Default)]
pub struct TelemetryOptions {
    strategy: Option<Box<dyn PublishStrategy>>,
    filters: Vec<(String, Box<dyn Filter>)>,
}

impl TelemetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only publish samples the strategy accepts; without one every sample goes out
    pub fn strategy<S: PublishStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    /// Smooth a top-level numeric field before the strategy sees it
    pub fn filter<F: Filter + 'static>(mut self, field: impl Into<String>, filter: F) -> Self {
        self.filters.push((field.into(), Box::new(filter)));
        self
    }

    pub(crate) fn into_pipeline(self, clock: Arc<dyn Clock>) -> TelemetryPipeline {
        TelemetryPipeline::new(self, clock)
    }
}

impl std::fmt::Debug for TelemetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryOptions")
            .field("strategy", &self.strategy.is_some())
            .field(
                "filters",
                &self.filters.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Filter and gate state for one telemetry loop
pub struct TelemetryPipeline {
    strategy: Option<Box<dyn PublishStrategy>>,
    filters: Vec<(String, Box<dyn Filter>)>,
    last_published: Option<State>,
}

impl TelemetryPipeline {
    fn new(options: TelemetryOptions, clock: Arc<dyn Clock>) -> Self {
        let TelemetryOptions {
            mut strategy,
            filters,
        } = options;
        if let Some(strategy) = strategy.as_mut() {
            strategy.bind_clock(clock);
        }
        Self {
            strategy,
            filters,
            last_published: None,
        }
    }

    fn apply_filters(&mut self, state: &mut State) {
        for (field, filter) in &mut self.filters {
            let Some(raw) = state.get(field.as_str()).and_then(Value::as_f64) else {
                continue;
            };
            let filtered = filter.update(raw);
            if let Some(number) = Number::from_f64(filtered) {
                state.insert(field.clone(), Value::Number(number));
            }
        }
    }

    /// Returns the state to publish, or `None` when the strategy vetoes it
    pub fn process(&mut self, mut state: State) -> Option<State> {
        self.apply_filters(&mut state);

        if let Some(strategy) = self.strategy.as_mut() {
            if !strategy.should_publish(&state, self.last_published.as_ref()) {
                debug!("Telemetry sample suppressed by publish strategy");
                return None;
            }
        }
        Some(state)
    }

    /// Record that `state` reached the broker
    pub fn published(&mut self, state: State) {
        if let Some(strategy) = self.strategy.as_mut() {
            strategy.on_published();
        }
        self.last_published = Some(state);
    }

    pub fn last_published(&self) -> Option<&State> {
        self.last_published.as_ref()
    }
}
