//! # stas-solver
//!
//! Allocation search and scheduling for the stas engine.
//!
//! This crate provides:
//! - The ITAGS greedy best-first search over incremental allocations
//! - The deterministic MILP scheduler with lazy transition refinement
//! - TETAQ heuristics (APR and NSQ), goal check and pruning methods
//! - Search repair under incremental problem changes
//!
//! ## Example
//!
//! ```rust
//! use stas_core::{Configuration, ProblemBuilder, Species};
//! use std::sync::Arc;
//!
//! let species = Arc::new(Species::new("rover", vec![1.0], 0.5, 1.0, 0));
//! let depot = Configuration::se2(0.0, 0.0, 0.0);
//! let inputs = ProblemBuilder::new()
//!     .species(species.clone())
//!     .robot("r0", species, depot)
//!     .task("survey", 1.0, vec![1.0], depot, depot)
//!     .alpha(1.0)
//!     .makespan_bounds(1.0, 1.0)
//!     .build()
//!     .unwrap();
//!
//! let outcome = stas_solver::solve(inputs);
//! let solution = outcome.solution.expect("solvable");
//! assert_eq!(solution.allocation.get(0, 0), 1.0);
//! ```

pub mod context;
pub mod heuristics;
pub mod milp;
pub mod node;
pub mod repair;
pub mod scheduler;
pub mod search;

pub use context::SolverContext;
pub use heuristics::{is_goal, AllOf, Evaluation, NullPruner, Pruner, Tetaq, TraitImprovementPruner};
pub use milp::{
    ConstraintSense, CpBackend, MilpBackend, ObjectiveSense, SolveOptions, SolveStatus, VarId,
};
pub use node::{allocation_hash, AllocationNode, NodeStatus};
pub use repair::ProblemDelta;
pub use scheduler::{MilpScheduler, SchedulerFailure, TransitionStatus};
pub use search::{
    solve, ItagsSearch, NodeRecord, SearchOutcome, SearchSolution, SearchStatistics,
};
