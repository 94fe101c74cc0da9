//! MILP formulation: candidate lines, preprocessing and matrix build.
//!
//! For each candidate line `l` the integer variable `x_l` counts chosen
//! instances. Workload coverage, budget and per-line capacity become linear
//! rows over those variables; the objective varies with the request.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::catalog::{Catalog, GpuKind};
use crate::pricing::{Line, PricingTable};

use super::solver::{ConstraintSense, LinearConstraint, MilpProblem};
use super::types::{BindingConstraint, Objective, Request};

/// Deterministic tie-break perturbation, far below the 0.1% gap target.
const TIE_BREAK_EPSILON: f64 = 1e-9;

/// One line eligible for selection, joined with its catalog spec.
#[derive(Debug, Clone)]
pub struct CandidateLine {
    /// The (provider, instance, region) tuple.
    pub line: Line,
    /// GPU kind on the instance.
    pub gpu_kind: GpuKind,
    /// GPUs per instance.
    pub gpu_per_instance: u32,
    /// Static benchmark score of the instance type.
    pub perf_score: f64,
    /// Blended hourly unit price for this request.
    pub effective_price: Decimal,
    /// Fraction of the effective price carried by spot.
    pub spot_share: Decimal,
    /// Tightened integer upper bound on the count variable.
    pub upper_bound: u32,
}

/// Build the candidate set for a request from a snapshot.
///
/// Preprocessing happens here: allowlist filtering, GPU kinds not
/// referenced by the request are dropped, unit prices beyond the budget
/// eliminate the line, and count bounds are tightened from the workload
/// maxima. The result is sorted by the deterministic tie-break rank:
/// higher on-demand share first, then provider, region, instance.
pub fn candidate_lines(
    table: &PricingTable,
    catalog: &Catalog,
    request: &Request,
) -> Vec<CandidateLine> {
    let spot_weight = request.spot_weight();

    let mut candidates: Vec<CandidateLine> = table
        .iter()
        .filter_map(|point| {
            let line = &point.line;
            if let Some(allow) = &request.provider_allowlist {
                if !allow.contains(&line.provider) {
                    return None;
                }
            }
            if let Some(allow) = &request.region_allowlist {
                if !allow.iter().any(|r| r == &line.region) {
                    return None;
                }
            }

            let spec = catalog.spec(line.provider, &line.instance)?;
            let max_for_kind: u32 = request
                .workloads
                .iter()
                .filter(|w| w.gpu_kind == spec.gpu_kind)
                .map(|w| w.max_count)
                .max()?;

            let effective_price = point.effective_price(spot_weight);
            if effective_price > request.budget_per_hour {
                return None;
            }

            let per_instance = spec.gpu_count.max(1);
            let from_demand = max_for_kind.div_ceil(per_instance);
            let upper_bound = spec.capacity.min(from_demand);
            if upper_bound == 0 {
                return None;
            }

            let spot_share = if point.spot.is_some() {
                spot_weight
            } else {
                Decimal::ZERO
            };

            Some(CandidateLine {
                line: line.clone(),
                gpu_kind: spec.gpu_kind,
                gpu_per_instance: per_instance,
                perf_score: spec.perf_score,
                effective_price,
                spot_share,
                upper_bound,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.spot_share
            .cmp(&b.spot_share)
            .then_with(|| a.line.cmp(&b.line))
    });
    candidates
}

/// Assemble the MILP for a candidate set.
///
/// All objectives keep the hard budget row `sum(c_l * x_l) <= budget`; the
/// objective coefficients vary. Each coefficient receives `rank * epsilon`
/// so equal-cost optima resolve identically across solver backends.
pub fn build_problem(
    candidates: &[CandidateLine],
    request: &Request,
    balanced_lambda: f64,
) -> MilpProblem {
    let budget = request.budget_per_hour.to_f64().unwrap_or(f64::MAX);
    let perf_ceiling = candidates
        .iter()
        .map(|c| c.perf_score)
        .fold(1.0_f64, f64::max);

    let objective: Vec<f64> = candidates
        .iter()
        .enumerate()
        .map(|(rank, c)| {
            let cost = c.effective_price.to_f64().unwrap_or(f64::MAX);
            let base = match request.objective {
                Objective::MinCost => cost,
                Objective::MaxPerformance => -c.perf_score,
                Objective::Balanced => {
                    balanced_lambda * (cost / budget)
                        - (1.0 - balanced_lambda) * (c.perf_score / perf_ceiling)
                }
            };
            base + rank as f64 * TIE_BREAK_EPSILON
        })
        .collect();

    let mut constraints = Vec::new();

    // Workload coverage: per GPU kind, min <= sum(gpu_per_instance * x) <= max.
    for item in &request.workloads {
        let coefficients: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.gpu_kind == item.gpu_kind)
            .map(|(i, c)| (i, f64::from(c.gpu_per_instance)))
            .collect();
        constraints.push(LinearConstraint {
            coefficients: coefficients.clone(),
            sense: ConstraintSense::GreaterEqual,
            rhs: f64::from(item.min_count),
        });
        constraints.push(LinearConstraint {
            coefficients,
            sense: ConstraintSense::LessEqual,
            rhs: f64::from(item.max_count),
        });
    }

    // Budget ceiling over effective prices.
    constraints.push(LinearConstraint {
        coefficients: candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.effective_price.to_f64().unwrap_or(f64::MAX)))
            .collect(),
        sense: ConstraintSense::LessEqual,
        rhs: budget,
    });

    MilpProblem {
        objective,
        constraints,
        upper_bounds: candidates
            .iter()
            .map(|c| Some(f64::from(c.upper_bound)))
            .collect(),
        integer: true,
    }
}

/// Explain why no feasible allocation can exist, checked before solving.
///
/// Checks run cheapest-binding-first so the explanation names the most
/// actionable constraint: coverage, then capacity, then budget.
pub fn infeasibility_reason(
    candidates: &[CandidateLine],
    request: &Request,
) -> Option<BindingConstraint> {
    for item in &request.workloads {
        let matching: Vec<&CandidateLine> = candidates
            .iter()
            .filter(|c| c.gpu_kind == item.gpu_kind)
            .collect();

        if item.min_count == 0 {
            continue;
        }
        if matching.is_empty() {
            return Some(BindingConstraint::Coverage);
        }

        let capacity: u64 = matching
            .iter()
            .map(|c| u64::from(c.upper_bound) * u64::from(c.gpu_per_instance))
            .sum();
        if capacity < u64::from(item.min_count) {
            return Some(BindingConstraint::Capacity);
        }
    }

    // Greedy lower bound on cost: fill each minimum with the cheapest
    // per-GPU lines. If even that exceeds the budget, the MILP cannot win.
    let mut lower_bound = Decimal::ZERO;
    for item in &request.workloads {
        if item.min_count == 0 {
            continue;
        }
        let mut matching: Vec<&CandidateLine> = candidates
            .iter()
            .filter(|c| c.gpu_kind == item.gpu_kind)
            .collect();
        matching.sort_by(|a, b| {
            let per_gpu_a = a.effective_price / Decimal::from(a.gpu_per_instance);
            let per_gpu_b = b.effective_price / Decimal::from(b.gpu_per_instance);
            per_gpu_a.cmp(&per_gpu_b)
        });

        let mut remaining = item.min_count;
        let mut cost = Decimal::ZERO;
        for c in matching {
            if remaining == 0 {
                break;
            }
            let needed = remaining.div_ceil(c.gpu_per_instance).min(c.upper_bound);
            cost += c.effective_price * Decimal::from(needed);
            remaining = remaining.saturating_sub(needed * c.gpu_per_instance);
        }
        lower_bound += cost;
    }
    if lower_bound > request.budget_per_hour {
        return Some(BindingConstraint::Budget);
    }

    None
}

/// Cost of covering every minimum with the *most expensive* per-GPU lines,
/// as a baseline for the savings estimate. `None` when any kind lacks
/// coverage.
pub fn baseline_cost(candidates: &[CandidateLine], request: &Request) -> Option<Decimal> {
    let mut total = Decimal::ZERO;
    for item in &request.workloads {
        if item.min_count == 0 {
            continue;
        }
        let mut matching: Vec<&CandidateLine> = candidates
            .iter()
            .filter(|c| c.gpu_kind == item.gpu_kind)
            .collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| {
            let per_gpu_a = a.effective_price / Decimal::from(a.gpu_per_instance);
            let per_gpu_b = b.effective_price / Decimal::from(b.gpu_per_instance);
            per_gpu_b.cmp(&per_gpu_a)
        });

        let mut remaining = item.min_count;
        for c in matching {
            if remaining == 0 {
                break;
            }
            let needed = remaining.div_ceil(c.gpu_per_instance).min(c.upper_bound);
            total += c.effective_price * Decimal::from(needed);
            remaining = remaining.saturating_sub(needed * c.gpu_per_instance);
        }
        if remaining > 0 {
            return None;
        }
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProviderId;
    use crate::optimize::types::WorkloadItem;
    use crate::pricing::PricePoint;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use time::OffsetDateTime;

    fn table_with(points: Vec<(ProviderId, &str, &str, Decimal, Option<Decimal>)>) -> PricingTable {
        let now = OffsetDateTime::now_utc();
        let entries: HashMap<Line, PricePoint> = points
            .into_iter()
            .map(|(provider, instance, region, on_demand, spot)| {
                let line = Line::new(provider, instance, region);
                (
                    line.clone(),
                    PricePoint {
                        line,
                        on_demand,
                        spot,
                        observed_at: now,
                    },
                )
            })
            .collect();
        PricingTable::new(entries, 1, now)
    }

    fn request(min: u32, max: u32, budget: Decimal) -> Request {
        Request {
            workloads: vec![WorkloadItem {
                gpu_kind: GpuKind::A100,
                min_count: min,
                max_count: max,
                duration_hrs: 1,
            }],
            objective: Objective::MinCost,
            budget_per_hour: budget,
            risk_tolerance: dec!(1),
            provider_allowlist: None,
            region_allowlist: None,
            solver_deadline_ms: None,
        }
    }

    #[test]
    fn candidates_drop_unreferenced_gpu_kinds() {
        let table = table_with(vec![
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
            (ProviderId::LambdaLabs, "gpu_1x_h100_pcie", "us-east-1", dec!(2.49), None),
        ]);
        let catalog = Catalog::builtin();
        let candidates = candidate_lines(&table, &catalog, &request(4, 4, dec!(20)));

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].gpu_kind, GpuKind::A100);
    }

    #[test]
    fn candidates_drop_lines_beyond_budget() {
        let table = table_with(vec![
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
            (ProviderId::Aws, "p4d.24xlarge", "us-east-1", dec!(32.00), None),
        ]);
        let catalog = Catalog::builtin();
        let candidates = candidate_lines(&table, &catalog, &request(4, 4, dec!(20)));

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].line.provider, ProviderId::LambdaLabs);
    }

    #[test]
    fn candidates_honor_provider_allowlist() {
        let table = table_with(vec![
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
            (ProviderId::Gcp, "a2-highgpu-1g", "us-central1", dec!(2.50), None),
        ]);
        let catalog = Catalog::builtin();
        let mut req = request(2, 2, dec!(20));
        req.provider_allowlist = Some(vec![ProviderId::Gcp]);

        let candidates = candidate_lines(&table, &catalog, &req);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].line.provider, ProviderId::Gcp);
    }

    #[test]
    fn upper_bound_is_tightened_by_demand() {
        let table = table_with(vec![(
            ProviderId::Aws,
            "p4d.24xlarge",
            "us-east-1",
            dec!(16.00),
            None,
        )]);
        let catalog = Catalog::builtin();
        let candidates = candidate_lines(&table, &catalog, &request(8, 8, dec!(100)));

        // 8 GPUs over an 8-GPU instance: one machine suffices.
        assert_eq!(candidates[0].upper_bound, 1);
    }

    #[test]
    fn tie_break_rank_prefers_on_demand_share() {
        let table = table_with(vec![
            (ProviderId::Aws, "p4d.24xlarge", "us-east-1", dec!(16.00), Some(dec!(6.40))),
            (ProviderId::LambdaLabs, "gpu_8x_a100", "us-east-1", dec!(16.00), None),
        ]);
        let catalog = Catalog::builtin();
        let mut req = request(8, 8, dec!(100));
        req.risk_tolerance = dec!(0.5);

        let candidates = candidate_lines(&table, &catalog, &req);
        // Pure on-demand Lambda ranks ahead of the spot-blended AWS line.
        assert_eq!(candidates[0].line.provider, ProviderId::LambdaLabs);
        assert_eq!(candidates[1].line.provider, ProviderId::Aws);
    }

    #[test]
    fn infeasibility_names_coverage() {
        let catalog = Catalog::builtin();
        let table = table_with(vec![]);
        let candidates = candidate_lines(&table, &catalog, &request(4, 4, dec!(20)));
        assert_eq!(
            infeasibility_reason(&candidates, &request(4, 4, dec!(20))),
            Some(BindingConstraint::Coverage)
        );
    }

    #[test]
    fn infeasibility_names_budget() {
        let table = table_with(vec![(
            ProviderId::LambdaLabs,
            "gpu_1x_a100",
            "us-east-1",
            dec!(2.40),
            None,
        )]);
        let catalog = Catalog::builtin();
        let req = request(8, 8, dec!(5));
        let candidates = candidate_lines(&table, &catalog, &req);
        assert_eq!(
            infeasibility_reason(&candidates, &req),
            Some(BindingConstraint::Budget)
        );
    }

    #[test]
    fn feasible_request_has_no_reason() {
        let table = table_with(vec![(
            ProviderId::LambdaLabs,
            "gpu_1x_a100",
            "us-east-1",
            dec!(2.40),
            None,
        )]);
        let catalog = Catalog::builtin();
        let req = request(4, 4, dec!(20));
        let candidates = candidate_lines(&table, &catalog, &req);
        assert_eq!(infeasibility_reason(&candidates, &req), None);
    }

    #[test]
    fn baseline_uses_most_expensive_coverage() {
        let table = table_with(vec![
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
            (ProviderId::Gcp, "a2-highgpu-1g", "us-central1", dec!(3.00), None),
        ]);
        let catalog = Catalog::builtin();
        let req = request(2, 2, dec!(20));
        let candidates = candidate_lines(&table, &catalog, &req);
        // Worst case covers both GPUs from the pricier GCP line: 2 x 3.00.
        assert_eq!(baseline_cost(&candidates, &req), Some(dec!(6.00)));
    }
}
