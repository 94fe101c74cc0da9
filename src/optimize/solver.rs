//! MILP solver capability interface and the HiGHS backend.
//!
//! The engine talks to a [`MilpSolver`] trait object so concrete MILP
//! libraries stay pluggable; the shipped backend wraps HiGHS through
//! good_lp. Decimal prices are converted to f64 only at this boundary.

use good_lp::solvers::highs::highs;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel};

use crate::error::OptimizeError;

/// Row sense of a linear constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSense {
    /// `lhs <= rhs`
    LessEqual,
    /// `lhs >= rhs`
    GreaterEqual,
    /// `lhs == rhs`
    Equal,
}

/// Sparse linear constraint over the decision variables.
#[derive(Debug, Clone)]
pub struct LinearConstraint {
    /// (variable index, coefficient) pairs; omitted indices are zero.
    pub coefficients: Vec<(usize, f64)>,
    /// Row sense.
    pub sense: ConstraintSense,
    /// Right-hand side.
    pub rhs: f64,
}

/// A minimization problem over non-negative (optionally integer) variables.
#[derive(Debug, Clone)]
pub struct MilpProblem {
    /// Objective coefficient per variable.
    pub objective: Vec<f64>,
    /// Constraint rows.
    pub constraints: Vec<LinearConstraint>,
    /// Optional upper bound per variable; lower bounds are all zero.
    pub upper_bounds: Vec<Option<f64>>,
    /// Whether variables are integral.
    pub integer: bool,
}

impl MilpProblem {
    /// Number of decision variables.
    pub fn num_vars(&self) -> usize {
        self.objective.len()
    }
}

/// Solver-reported outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    /// Proven optimal.
    Optimal,
    /// Feasible without an optimality proof.
    Feasible,
    /// Proven infeasible.
    Infeasible,
}

/// A solution returned by a backend.
#[derive(Debug, Clone)]
pub struct SolverSolution {
    /// Outcome classification.
    pub status: SolverStatus,
    /// Value per decision variable; empty when infeasible.
    pub values: Vec<f64>,
    /// Objective value at `values`.
    pub objective: f64,
}

/// Capability interface over concrete MILP libraries.
///
/// Implementations are synchronous; the engine runs them on blocking
/// threads and enforces wall-clock deadlines from outside.
pub trait MilpSolver: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Solve a minimization problem.
    fn solve(&self, problem: &MilpProblem) -> Result<SolverSolution, OptimizeError>;
}

/// HiGHS-based MILP solver via good_lp.
#[derive(Debug, Default, Clone)]
pub struct HighsSolver;

impl HighsSolver {
    /// Create a new HiGHS solver instance.
    pub fn new() -> Self {
        Self
    }
}

impl MilpSolver for HighsSolver {
    fn name(&self) -> &'static str {
        "highs"
    }

    fn solve(&self, problem: &MilpProblem) -> Result<SolverSolution, OptimizeError> {
        let n = problem.num_vars();
        if n == 0 {
            return Ok(SolverSolution {
                status: SolverStatus::Optimal,
                values: vec![],
                objective: 0.0,
            });
        }

        let mut vars = variables!();
        let mut var_list = Vec::with_capacity(n);
        for i in 0..n {
            let mut v = variable().min(0.0);
            if let Some(ub) = problem.upper_bounds.get(i).copied().flatten() {
                v = v.max(ub);
            }
            if problem.integer {
                v = v.integer();
            }
            var_list.push(vars.add(v));
        }

        let objective: Expression = var_list
            .iter()
            .zip(problem.objective.iter())
            .map(|(v, c)| *c * *v)
            .sum();

        let mut model = vars.minimise(objective).using(highs);

        for row in &problem.constraints {
            let lhs: Expression = row
                .coefficients
                .iter()
                .map(|(i, c)| *c * var_list[*i])
                .sum();
            match row.sense {
                ConstraintSense::LessEqual => {
                    model = model.with(constraint!(lhs <= row.rhs));
                }
                ConstraintSense::GreaterEqual => {
                    model = model.with(constraint!(lhs >= row.rhs));
                }
                ConstraintSense::Equal => {
                    model = model.with(constraint!(lhs == row.rhs));
                }
            }
        }

        match model.solve() {
            Ok(solution) => {
                let values: Vec<f64> = var_list.iter().map(|v| solution.value(*v)).collect();
                let objective_value: f64 = values
                    .iter()
                    .zip(problem.objective.iter())
                    .map(|(v, c)| v * c)
                    .sum();
                Ok(SolverSolution {
                    status: SolverStatus::Optimal,
                    values,
                    objective: objective_value,
                })
            }
            Err(good_lp::ResolutionError::Infeasible) => Ok(SolverSolution {
                status: SolverStatus::Infeasible,
                values: vec![],
                objective: 0.0,
            }),
            Err(err) => Err(OptimizeError::SolverFailure(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leq(coefficients: Vec<(usize, f64)>, rhs: f64) -> LinearConstraint {
        LinearConstraint {
            coefficients,
            sense: ConstraintSense::LessEqual,
            rhs,
        }
    }

    fn geq(coefficients: Vec<(usize, f64)>, rhs: f64) -> LinearConstraint {
        LinearConstraint {
            coefficients,
            sense: ConstraintSense::GreaterEqual,
            rhs,
        }
    }

    #[test]
    fn solver_name() {
        assert_eq!(HighsSolver::new().name(), "highs");
    }

    #[test]
    fn empty_problem_is_trivially_optimal() {
        let problem = MilpProblem {
            objective: vec![],
            constraints: vec![],
            upper_bounds: vec![],
            integer: true,
        };
        let solution = HighsSolver::new().solve(&problem).unwrap();
        assert_eq!(solution.status, SolverStatus::Optimal);
        assert!(solution.values.is_empty());
    }

    #[test]
    fn picks_cheaper_variable() {
        // min 3x + 2y  s.t.  x + y >= 4,  x,y integer >= 0
        let problem = MilpProblem {
            objective: vec![3.0, 2.0],
            constraints: vec![geq(vec![(0, 1.0), (1, 1.0)], 4.0)],
            upper_bounds: vec![None, None],
            integer: true,
        };
        let solution = HighsSolver::new().solve(&problem).unwrap();
        assert_eq!(solution.status, SolverStatus::Optimal);
        assert_eq!(solution.values[0].round() as i64, 0);
        assert_eq!(solution.values[1].round() as i64, 4);
        assert!((solution.objective - 8.0).abs() < 1e-6);
    }

    #[test]
    fn integrality_forces_rounding_up() {
        // min x  s.t.  8x >= 4 with integer x: x = 1, not 0.5.
        let problem = MilpProblem {
            objective: vec![1.0],
            constraints: vec![geq(vec![(0, 8.0)], 4.0)],
            upper_bounds: vec![None],
            integer: true,
        };
        let solution = HighsSolver::new().solve(&problem).unwrap();
        assert_eq!(solution.values[0].round() as i64, 1);
    }

    #[test]
    fn infeasible_is_reported_not_errored() {
        // x <= 1 and x >= 4 cannot hold.
        let problem = MilpProblem {
            objective: vec![1.0],
            constraints: vec![leq(vec![(0, 1.0)], 1.0), geq(vec![(0, 1.0)], 4.0)],
            upper_bounds: vec![None],
            integer: true,
        };
        let solution = HighsSolver::new().solve(&problem).unwrap();
        assert_eq!(solution.status, SolverStatus::Infeasible);
    }

    #[test]
    fn upper_bounds_are_respected() {
        // min -x  s.t.  x <= 3 (bound): maximizes x at its bound.
        let problem = MilpProblem {
            objective: vec![-1.0],
            constraints: vec![],
            upper_bounds: vec![Some(3.0)],
            integer: true,
        };
        let solution = HighsSolver::new().solve(&problem).unwrap();
        assert_eq!(solution.values[0].round() as i64, 3);
    }
}
