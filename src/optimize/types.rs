//! Optimization request and allocation types.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::catalog::{GpuKind, ProviderId};
use crate::pricing::{Generation, Line};

/// One GPU demand within a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkloadItem {
    /// Required GPU kind.
    pub gpu_kind: GpuKind,
    /// Minimum GPUs to allocate.
    pub min_count: u32,
    /// Maximum GPUs to allocate.
    pub max_count: u32,
    /// Planned run length in hours. Informational for the hourly model.
    #[serde(default = "default_duration_hrs")]
    pub duration_hrs: u32,
}

fn default_duration_hrs() -> u32 {
    1
}

/// What the solver optimizes for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Objective {
    /// Minimize aggregate hourly spend.
    #[default]
    MinCost,
    /// Maximize aggregate benchmark score within budget.
    MaxPerformance,
    /// Weighted blend of normalized cost and performance.
    Balanced,
}

/// An optimization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// GPU demands; at least one item.
    pub workloads: Vec<WorkloadItem>,
    /// Optimization objective.
    #[serde(default)]
    pub objective: Objective,
    /// Hourly budget ceiling in dollars.
    pub budget_per_hour: Decimal,
    /// Risk tolerance in [0, 1]; 0 avoids spot entirely, 1 embraces it.
    pub risk_tolerance: Decimal,
    /// Only consider these providers, or all when `None`.
    #[serde(default)]
    pub provider_allowlist: Option<Vec<ProviderId>>,
    /// Only consider these regions, or all when `None`.
    #[serde(default)]
    pub region_allowlist: Option<Vec<String>>,
    /// Per-request solve cap in milliseconds; clamped to the configured
    /// default when absent or larger.
    #[serde(default)]
    pub solver_deadline_ms: Option<u64>,
}

impl Request {
    /// Validate the request before any solve.
    pub fn validate(&self) -> Result<(), String> {
        if self.workloads.is_empty() {
            return Err("at least one workload item is required".to_string());
        }
        for item in &self.workloads {
            if item.min_count > item.max_count {
                return Err(format!(
                    "workload {}: min_count {} exceeds max_count {}",
                    item.gpu_kind, item.min_count, item.max_count
                ));
            }
            if item.max_count == 0 {
                return Err(format!("workload {}: max_count must be positive", item.gpu_kind));
            }
        }
        if self.budget_per_hour <= Decimal::ZERO {
            return Err("budget_per_hour must be positive".to_string());
        }
        if self.risk_tolerance < Decimal::ZERO || self.risk_tolerance > Decimal::ONE {
            return Err("risk_tolerance must be within [0, 1]".to_string());
        }
        Ok(())
    }

    /// Spot weight for the effective-price blend.
    ///
    /// The on-demand weight is `alpha = max(0, 1 - risk_tolerance)`, so the
    /// spot side carries the risk tolerance itself: a risk tolerance of 0
    /// prices every line at pure on-demand and never favors spot.
    pub fn spot_weight(&self) -> Decimal {
        self.risk_tolerance.clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Canonical fingerprint for solution caching and solve coalescing.
    ///
    /// Order-insensitive over workloads and allowlists, so semantically
    /// identical requests share one solve.
    pub fn fingerprint(&self) -> u64 {
        let mut workloads = self.workloads.clone();
        workloads.sort_by(|a, b| {
            (a.gpu_kind.to_string(), a.min_count, a.max_count, a.duration_hrs).cmp(&(
                b.gpu_kind.to_string(),
                b.min_count,
                b.max_count,
                b.duration_hrs,
            ))
        });
        let mut providers = self.provider_allowlist.clone();
        if let Some(list) = providers.as_mut() {
            list.sort();
            list.dedup();
        }
        let mut regions = self.region_allowlist.clone();
        if let Some(list) = regions.as_mut() {
            list.sort();
            list.dedup();
        }

        let mut hasher = DefaultHasher::new();
        workloads.hash(&mut hasher);
        self.objective.hash(&mut hasher);
        self.budget_per_hour.hash(&mut hasher);
        self.risk_tolerance.hash(&mut hasher);
        providers.hash(&mut hasher);
        regions.hash(&mut hasher);
        self.solver_deadline_ms.hash(&mut hasher);
        hasher.finish()
    }
}

/// Which constraint family made a request unsatisfiable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BindingConstraint {
    /// The hourly budget cannot cover the minimum demand.
    Budget,
    /// Not enough instances exist to reach the minimum counts.
    Capacity,
    /// A requested GPU kind has no candidate lines at all.
    Coverage,
}

/// Outcome classification of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AllocationStatus {
    /// Solver proved optimality.
    Optimal,
    /// Feasible solution without an optimality proof; gap when known.
    FeasibleGap {
        /// Relative MIP gap if the backend reported one.
        gap: Option<f64>,
    },
    /// Proven infeasible, with the binding constraint family.
    Infeasible {
        /// Why no solution exists.
        binding: BindingConstraint,
    },
    /// Deadline hit with no feasible incumbent.
    Timeout,
}

impl AllocationStatus {
    /// Whether the allocation carries usable lines.
    pub fn is_feasible(&self) -> bool {
        matches!(
            self,
            AllocationStatus::Optimal | AllocationStatus::FeasibleGap { .. }
        )
    }

    /// Short status label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Optimal => "optimal",
            AllocationStatus::FeasibleGap { .. } => "feasible-gap",
            AllocationStatus::Infeasible { .. } => "infeasible",
            AllocationStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chosen line within an allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationLine {
    /// The provider/instance/region tuple.
    pub line: Line,
    /// Instances to launch.
    pub count: u32,
    /// GPU kind on the instance.
    pub gpu_kind: GpuKind,
    /// GPUs per instance.
    pub gpu_per_instance: u32,
    /// Effective hourly unit price used by the solve.
    pub unit_price: Decimal,
    /// `count * unit_price`.
    pub total_price: Decimal,
}

/// Concrete allocation satisfying (or explaining) a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Chosen lines; empty unless the status is feasible.
    pub lines: Vec<AllocationLine>,
    /// Solver objective value in objective units.
    pub objective_value: Decimal,
    /// Total hourly spend across lines.
    pub total_per_hour: Decimal,
    /// Outcome classification.
    pub status: AllocationStatus,
    /// Wall-clock solve time in milliseconds.
    pub solve_ms: u64,
    /// Pricing generation the solve observed.
    pub generation: Generation,
    /// Savings versus the most expensive feasible quote, when computable.
    pub savings_vs_baseline_pct: Option<Decimal>,
}

impl Allocation {
    /// Total GPUs allocated for a kind.
    pub fn gpu_total(&self, kind: GpuKind) -> u32 {
        self.lines
            .iter()
            .filter(|l| l.gpu_kind == kind)
            .map(|l| l.count * l.gpu_per_instance)
            .sum()
    }
}

/// Identifier of an asynchronous optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Mint a fresh run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// State of an asynchronous optimization run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunState {
    /// Still solving.
    Pending,
    /// Finished with an allocation.
    Completed(Allocation),
    /// Failed before producing an allocation.
    Failed {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}
