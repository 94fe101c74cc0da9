//! Pluggable demand-signal source.
//!
//! Demand forecasting itself lives outside the core; this trait is the
//! seam it plugs into. A present signal nudges risk scores on spot-heavy
//! choices; absence is non-fatal and the default source returns nothing.

use async_trait::async_trait;

use crate::catalog::GpuKind;

/// A demand expectation for one GPU kind over a horizon.
#[derive(Debug, Clone, Copy)]
pub struct DemandSignal {
    /// Expected demand relative to current (1.0 = unchanged).
    pub expected_relative_demand: f64,
    /// Forecaster confidence in [0, 1].
    pub confidence: f64,
}

/// Source of demand signals.
#[async_trait]
pub trait DemandSignalSource: Send + Sync {
    /// Expected relative demand for `gpu_kind` over the next `horizon_hrs`.
    ///
    /// `None` means no forecast is available, which callers must treat as
    /// neutral.
    async fn demand_signal(&self, gpu_kind: GpuKind, horizon_hrs: u32) -> Option<DemandSignal>;
}

/// Source that never has a forecast.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoForecast;

#[async_trait]
impl DemandSignalSource for NoForecast {
    async fn demand_signal(&self, _gpu_kind: GpuKind, _horizon_hrs: u32) -> Option<DemandSignal> {
        None
    }
}

/// Fixed signal source for tests and manual overrides.
#[derive(Debug, Clone, Copy)]
pub struct StaticForecast {
    /// The signal returned for every kind.
    pub signal: DemandSignal,
}

#[async_trait]
impl DemandSignalSource for StaticForecast {
    async fn demand_signal(&self, _gpu_kind: GpuKind, _horizon_hrs: u32) -> Option<DemandSignal> {
        Some(self.signal)
    }
}
