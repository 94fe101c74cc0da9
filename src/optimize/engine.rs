//! The optimization engine: snapshot, formulate, solve, translate.
//!
//! Stateless between solves apart from a bounded solution cache keyed by
//! (request fingerprint, pricing generation) and the in-flight map that
//! coalesces duplicate requests onto a single running solve.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::OptimizeError;
use crate::metrics;
use crate::pricing::{Aggregator, Generation, PricePoint, PricingFilter};

use super::model::{self, CandidateLine};
use super::solver::{MilpSolver, SolverStatus};
use super::types::{
    Allocation, AllocationLine, AllocationStatus, BindingConstraint, Objective, Request, RunId,
    RunState,
};

/// Engine-level settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default and maximum per-request solve deadline.
    pub default_deadline: Duration,
    /// Target MILP optimality gap (informational for the backend).
    pub gap_target: f64,
    /// Max concurrent solves.
    pub pool_size: usize,
    /// Solution cache capacity.
    pub cache_capacity: usize,
    /// How long a cold-start call waits for the first publish.
    pub first_publish_grace: Duration,
    /// Cost/performance weight for the balanced objective.
    pub balanced_lambda: f64,
}

impl EngineConfig {
    /// Derive engine settings from the application config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_deadline: Duration::from_secs(config.solver_deadline_secs),
            gap_target: config.solver_gap,
            pool_size: config.solver_pool_size,
            cache_capacity: config.solution_cache_capacity,
            first_publish_grace: Duration::from_secs(config.first_publish_grace_secs),
            balanced_lambda: config.balanced_lambda,
        }
    }
}

/// Bounded LRU of finished allocations.
struct SolutionCache {
    capacity: usize,
    map: HashMap<(u64, Generation), Allocation>,
    order: VecDeque<(u64, Generation)>,
}

impl SolutionCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: (u64, Generation)) -> Option<Allocation> {
        let hit = self.map.get(&key).cloned();
        if hit.is_some() {
            self.order.retain(|k| *k != key);
            self.order.push_back(key);
        }
        hit
    }

    fn insert(&mut self, key: (u64, Generation), allocation: Allocation) {
        if self.map.insert(key, allocation).is_none() {
            self.order.push_back(key);
        }
        while self.map.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }
}

/// The optimization engine.
pub struct OptimizationEngine {
    aggregator: Arc<Aggregator>,
    catalog: Arc<Catalog>,
    solver: Arc<dyn MilpSolver>,
    pool: Arc<Semaphore>,
    cache: Mutex<SolutionCache>,
    in_flight: Mutex<HashMap<u64, broadcast::Sender<Allocation>>>,
    runs: Mutex<HashMap<RunId, RunState>>,
    config: EngineConfig,
}

impl OptimizationEngine {
    /// Create an engine over an aggregator, catalog and solver backend.
    pub fn new(
        aggregator: Arc<Aggregator>,
        catalog: Arc<Catalog>,
        solver: Arc<dyn MilpSolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            aggregator,
            catalog,
            solver,
            pool: Arc::new(Semaphore::new(config.pool_size)),
            cache: Mutex::new(SolutionCache::new(config.cache_capacity)),
            in_flight: Mutex::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Synchronous optimization: validate, snapshot, solve, translate.
    #[instrument(skip(self, request), fields(objective = %request.objective))]
    pub async fn quick_optimize(&self, request: Request) -> Result<Allocation, OptimizeError> {
        request.validate().map_err(OptimizeError::InvalidRequest)?;

        self.aggregator
            .wait_for_first_publish(self.config.first_publish_grace)
            .await?;

        let fingerprint = request.fingerprint();
        let (_, generation) = self.aggregator.snapshot();

        if let Some(hit) = self.cache.lock().unwrap().get((fingerprint, generation)) {
            metrics::inc_cache_hit();
            debug!(generation, "Solution cache hit");
            return Ok(hit);
        }

        // Coalesce onto an in-flight solve for the same fingerprint.
        let mut rx = {
            let mut in_flight = self.in_flight.lock().unwrap();
            let existing = in_flight.get(&fingerprint).map(|tx| tx.subscribe());
            if existing.is_none() {
                let (tx, _) = broadcast::channel(4);
                in_flight.insert(fingerprint, tx);
            }
            existing
        };

        if let Some(rx) = rx.as_mut() {
            metrics::inc_solves_coalesced();
            match rx.recv().await {
                Ok(allocation) => return Ok(allocation),
                // The leading solve failed; fall through and solve directly.
                Err(_) => return self.solve_request(&request).await,
            }
        }

        let outcome = self.solve_request(&request).await;

        let tx = self.in_flight.lock().unwrap().remove(&fingerprint);
        if let (Some(tx), Ok(allocation)) = (tx, outcome.as_ref()) {
            let _ = tx.send(allocation.clone());
        }

        if let Ok(allocation) = outcome.as_ref() {
            // Timed-out solves are not cached: a retry may do better.
            if !matches!(allocation.status, AllocationStatus::Timeout) {
                self.cache
                    .lock()
                    .unwrap()
                    .insert((fingerprint, allocation.generation), allocation.clone());
            }
        }

        outcome
    }

    /// Begin an asynchronous optimization run.
    pub async fn submit(self: &Arc<Self>, request: Request) -> Result<RunId, OptimizeError> {
        request.validate().map_err(OptimizeError::InvalidRequest)?;

        let id = RunId::new();
        self.runs.lock().unwrap().insert(id, RunState::Pending);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let state = match engine.quick_optimize(request).await {
                Ok(allocation) => RunState::Completed(allocation),
                Err(err) => RunState::Failed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                },
            };
            engine.runs.lock().unwrap().insert(id, state);
        });

        Ok(id)
    }

    /// State of an asynchronous run.
    pub fn run_state(&self, id: RunId) -> Result<RunState, OptimizeError> {
        self.runs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| OptimizeError::RunNotFound(id.to_string()))
    }

    /// Filtered view of the current pricing table.
    pub fn pricing_snapshot(
        &self,
        filter: &PricingFilter,
    ) -> (Vec<PricePoint>, Generation, OffsetDateTime) {
        let (table, generation) = self.aggregator.snapshot();
        let points = table
            .filtered(filter)
            .into_iter()
            .filter(|p| {
                self.catalog
                    .spec(p.line.provider, &p.line.instance)
                    .map_or(false, |spec| filter.matches_gpu(spec.gpu_kind))
            })
            .cloned()
            .collect();
        (points, generation, table.built_at)
    }

    async fn solve_request(&self, request: &Request) -> Result<Allocation, OptimizeError> {
        let start = Instant::now();
        let (table, generation) = self.aggregator.snapshot();
        let candidates = model::candidate_lines(&table, &self.catalog, request);

        if let Some(binding) = model::infeasibility_reason(&candidates, request) {
            let allocation = infeasible_allocation(binding, generation, start);
            metrics::inc_solves_completed(allocation.status.as_str());
            return Ok(allocation);
        }

        let problem = model::build_problem(&candidates, request, self.config.balanced_lambda);
        let deadline = request
            .solver_deadline_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_deadline)
            .min(self.config.default_deadline);

        // The permit rides with the blocking task: an abandoned solve keeps
        // its pool slot until the backend actually returns.
        let permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|_| OptimizeError::SolverFailure("solver pool closed".to_string()))?;
        let solver = Arc::clone(&self.solver);
        let solve = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            solver.solve(&problem)
        });

        let solution = match tokio::time::timeout(deadline, solve).await {
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Solve hit deadline");
                let allocation = Allocation {
                    lines: vec![],
                    objective_value: Decimal::ZERO,
                    total_per_hour: Decimal::ZERO,
                    status: AllocationStatus::Timeout,
                    solve_ms: start.elapsed().as_millis() as u64,
                    generation,
                    savings_vs_baseline_pct: None,
                };
                metrics::record_solve_latency(start, allocation.status.as_str());
                metrics::inc_solves_completed(allocation.status.as_str());
                return Ok(allocation);
            }
            Ok(joined) => joined
                .map_err(|e| OptimizeError::SolverFailure(format!("solver task panicked: {e}")))??,
        };

        let allocation = match solution.status {
            SolverStatus::Infeasible => {
                // The pre-check passed, so integrality interactions with the
                // budget are the remaining cause.
                infeasible_allocation(BindingConstraint::Budget, generation, start)
            }
            SolverStatus::Optimal | SolverStatus::Feasible => {
                let mut lines = Vec::new();
                let mut total = Decimal::ZERO;
                for (candidate, value) in candidates.iter().zip(solution.values.iter()) {
                    let count = value.round() as i64;
                    if count <= 0 {
                        continue;
                    }
                    let count = count as u32;
                    let total_price = candidate.effective_price * Decimal::from(count);
                    total += total_price;
                    lines.push(AllocationLine {
                        line: candidate.line.clone(),
                        count,
                        gpu_kind: candidate.gpu_kind,
                        gpu_per_instance: candidate.gpu_per_instance,
                        unit_price: candidate.effective_price,
                        total_price,
                    });
                }

                let status = match solution.status {
                    SolverStatus::Optimal => AllocationStatus::Optimal,
                    _ => AllocationStatus::FeasibleGap { gap: None },
                };

                Allocation {
                    objective_value: objective_value(request, solution.objective, total),
                    savings_vs_baseline_pct: savings_pct(&candidates, request, total),
                    lines,
                    total_per_hour: total,
                    status,
                    solve_ms: start.elapsed().as_millis() as u64,
                    generation,
                }
            }
        };

        metrics::record_solve_latency(start, allocation.status.as_str());
        metrics::inc_solves_completed(allocation.status.as_str());
        info!(
            status = %allocation.status,
            total_per_hour = %allocation.total_per_hour,
            lines = allocation.lines.len(),
            solve_ms = allocation.solve_ms,
            "Solve finished"
        );
        Ok(allocation)
    }
}

/// Objective value in objective units.
///
/// For min-cost the objective is the decimal spend itself, keeping the
/// determinism guarantee independent of float noise; other objectives
/// report the solver's value.
fn objective_value(request: &Request, solver_objective: f64, total: Decimal) -> Decimal {
    match request.objective {
        Objective::MinCost => total,
        Objective::MaxPerformance | Objective::Balanced => {
            Decimal::from_f64_retain(solver_objective).unwrap_or(Decimal::ZERO)
        }
    }
}

fn infeasible_allocation(
    binding: BindingConstraint,
    generation: Generation,
    start: Instant,
) -> Allocation {
    Allocation {
        lines: vec![],
        objective_value: Decimal::ZERO,
        total_per_hour: Decimal::ZERO,
        status: AllocationStatus::Infeasible { binding },
        solve_ms: start.elapsed().as_millis() as u64,
        generation,
        savings_vs_baseline_pct: None,
    }
}

/// Savings of `total` against the most expensive feasible coverage, in
/// percent.
fn savings_pct(
    candidates: &[CandidateLine],
    request: &Request,
    total: Decimal,
) -> Option<Decimal> {
    let baseline = model::baseline_cost(candidates, request)?;
    if baseline <= Decimal::ZERO || total >= baseline {
        return None;
    }
    Some((baseline - total) / baseline * Decimal::ONE_HUNDRED)
}
