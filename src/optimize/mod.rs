//! Optimization engine: MILP allocation of GPU workloads.
//!
//! This module handles:
//! - Request and allocation types with validation
//! - Candidate-line generation and MILP formulation
//! - The pluggable solver interface and HiGHS backend
//! - The engine orchestrating solves, caching and async runs

pub mod engine;
pub mod model;
pub mod solver;
pub mod types;

pub use engine::{EngineConfig, OptimizationEngine};
pub use model::{baseline_cost, build_problem, candidate_lines, infeasibility_reason, CandidateLine};
pub use solver::{HighsSolver, MilpProblem, MilpSolver, SolverSolution, SolverStatus};
pub use types::{
    Allocation, AllocationLine, AllocationStatus, BindingConstraint, Objective, Request, RunId,
    RunState, WorkloadItem,
};
