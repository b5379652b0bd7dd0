//! Signal conditioning for numeric telemetry fields

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("alpha must be in (0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("time constant must be >= 0 and sample period > 0 (tau={tau}, dt={dt})")]
    InvalidTiming { tau: f64, dt: f64 },
}

/// Stateful scalar filter
pub trait Filter: Send + Sync {
    /// Feed one raw sample and return the filtered output
    fn update(&mut self, raw: f64) -> f64;
    /// Last output, `None` before the first sample
    fn value(&self) -> Option<f64>;
    fn reset(&mut self);
}

/// Exponential moving average; the first sample passes through unchanged
#[derive(Debug, Clone, PartialEq)]
pub struct LowPass {
    alpha: f64,
    value: Option<f64>,
}

impl LowPass {
    pub fn new(alpha: f64) -> Result<Self, FilterError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(FilterError::InvalidAlpha(alpha));
        }
        Ok(Self { alpha, value: None })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Filter for LowPass {
    fn update(&mut self, raw: f64) -> f64 {
        let next = match self.value {
            Some(previous) => previous + self.alpha * (raw - previous),
            None => raw,
        };
        self.value = Some(next);
        next
    }

    fn value(&self) -> Option<f64> {
        self.value
    }

    fn reset(&mut self) {
        self.value = None;
    }
}

/// First-order lag element with time constant `tau` sampled every `dt` seconds
#[derive(Debug, Clone, PartialEq)]
pub struct Pt1 {
    inner: LowPass,
    tau: f64,
    dt: f64,
}

impl Pt1 {
    pub fn new(tau: f64, dt: f64) -> Result<Self, FilterError> {
        if !(tau >= 0.0 && dt > 0.0) || !tau.is_finite() || !dt.is_finite() {
            return Err(FilterError::InvalidTiming { tau, dt });
        }
        Ok(Self {
            inner: LowPass::new(dt / (tau + dt))?,
            tau,
            dt,
        })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}

impl Filter for Pt1 {
    fn update(&mut self, raw: f64) -> f64 {
        self.inner.update(raw)
    }

    fn value(&self) -> Option<f64> {
        self.inner.value()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}
