//! # stas-core
//!
//! Core domain model for the stas engine: the simultaneous allocation of
//! heterogeneous robots to durative tasks and the scheduling of the result.
//!
//! This crate provides:
//! - Domain types: `Species`, `Robot`, `Task`, `Configuration`, `Schedule`
//! - The validated, shared-immutable `ProblemInputs` bundle
//! - Trait algebra over dense matrices (`allocated_traits`, `traits_mismatch_error`)
//! - The memoised motion-planning oracle
//! - The key-indexed `MutablePriorityQueue` used by the search
//!
//! ## Example
//!
//! ```rust
//! use stas_core::{Configuration, ProblemBuilder, Species};
//! use std::sync::Arc;
//!
//! let species = Arc::new(Species::new("rover", vec![1.0], 0.5, 1.0, 0));
//! let at_depot = Configuration::se2(0.0, 0.0, 0.0);
//! let inputs = ProblemBuilder::new()
//!     .species(species.clone())
//!     .robot("r0", species, at_depot)
//!     .task("survey", 1.0, vec![1.0], at_depot, at_depot)
//!     .alpha(1.0)
//!     .makespan_bounds(1.0, 1.0)
//!     .build()
//!     .unwrap();
//! assert_eq!(inputs.num_robots(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod algebra;
pub mod config;
pub mod matrix;
pub mod oracle;
pub mod queue;

pub use algebra::{
    allocated_traits, positive_traits_mismatch_matrix, traits_mismatch_error,
    traits_mismatch_matrix, TraitReduction,
};
pub use config::{Configuration, VertexId};
pub use matrix::Matrix;
pub use oracle::{
    Environment, GraphEnvironment, GridEnvironment, MemoisingOracle, MotionOracle, OracleFailure,
    QueryBudget,
};
pub use queue::MutablePriorityQueue;

// ============================================================================
// Type Aliases
// ============================================================================

/// Row index into the allocation matrix
pub type TaskIndex = usize;

/// Column index into the allocation matrix
pub type RobotIndex = usize;

/// One incremental cell of the allocation matrix
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub task: TaskIndex,
    pub robot: RobotIndex,
}

// ============================================================================
// Species / Robot / Task
// ============================================================================

/// A robot kind: shared capability traits and geometry.
///
/// Robots of one species share motion-plan cache entries, because a path is
/// valid for any robot with the same bounding radius.
#[derive(Clone, Debug)]
pub struct Species {
    pub name: String,
    /// Capability trait vector of length `T`
    pub traits: Vec<f32>,
    /// Radius of the bounding circle/sphere used for collision checking
    pub bounding_radius: f32,
    /// Nominal speed, used to convert path lengths into durations
    pub speed: f32,
    /// Index of this species' motion planner in `ProblemInputs::planners`
    pub planner: usize,
}

impl Species {
    pub fn new(
        name: impl Into<String>,
        traits: Vec<f32>,
        bounding_radius: f32,
        speed: f32,
        planner: usize,
    ) -> Self {
        Self {
            name: name.into(),
            traits,
            bounding_radius,
            speed,
            planner,
        }
    }
}

/// A single robot: a species plus a starting configuration
#[derive(Clone, Debug)]
pub struct Robot {
    pub name: String,
    pub species: Arc<Species>,
    pub initial_configuration: Configuration,
}

impl Robot {
    pub fn new(
        name: impl Into<String>,
        species: Arc<Species>,
        initial_configuration: Configuration,
    ) -> Self {
        Self {
            name: name.into(),
            species,
            initial_configuration,
        }
    }

    pub fn bounding_radius(&self) -> f32 {
        self.species.bounding_radius
    }

    pub fn speed(&self) -> f32 {
        self.species.speed
    }
}

/// A durative unit of work with spatial endpoints
#[derive(Clone, Debug)]
pub struct Task {
    pub name: String,
    /// Duration of the work itself, excluding any internal motion
    pub static_duration: f32,
    /// Desired trait vector of length `T`
    pub desired_traits: Vec<f32>,
    /// Where the coalition must be to start the task
    pub initial_configuration: Configuration,
    /// Where the coalition ends up when the task finishes
    pub terminal_configuration: Configuration,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        static_duration: f32,
        desired_traits: Vec<f32>,
        initial_configuration: Configuration,
        terminal_configuration: Configuration,
    ) -> Self {
        Self {
            name: name.into(),
            static_duration,
            desired_traits,
            initial_configuration,
            terminal_configuration,
        }
    }

    /// Full duration of this task for a coalition: the static duration plus
    /// the internal move from the initial to the terminal configuration.
    ///
    /// The internal path is planned for the widest robot in the coalition
    /// and traversed at the pace of the slowest.
    pub fn compute_duration(
        &self,
        coalition: &[&Robot],
        planners: &[Arc<MemoisingOracle>],
        budget: QueryBudget,
    ) -> Result<f32, OracleFailure> {
        if coalition.is_empty() || self.initial_configuration == self.terminal_configuration {
            return Ok(self.static_duration);
        }
        let widest = coalition
            .iter()
            .max_by(|a, b| {
                a.bounding_radius()
                    .partial_cmp(&b.bounding_radius())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty coalition");
        let slowest_speed = coalition
            .iter()
            .map(|r| r.speed())
            .fold(f32::INFINITY, f32::min);
        let oracle = &planners[widest.species.planner];
        let length = oracle.query(
            widest.bounding_radius(),
            &self.initial_configuration,
            &self.terminal_configuration,
            budget,
        )?;
        Ok(self.static_duration + length / slowest_speed)
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Knobs for one MILP scheduler invocation
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SchedulerParameters {
    /// Per-solve wall-clock limit in seconds
    pub timeout: f32,
    /// Worker threads the backend solver may use (0 = solver default)
    pub threads: u32,
    /// Relative optimality gap accepted by the backend
    pub mip_gap: f32,
    /// Lexicographic makespan-then-earliest-start objective
    pub use_hierarchical_objective: bool,
    /// Seed unmemoised transitions with euclidean underestimates, refined
    /// lazily after each solve; when disabled, every transition is planned
    /// for real before the first solve
    pub compute_transition_heuristics: bool,
}

impl Default for SchedulerParameters {
    fn default() -> Self {
        Self {
            timeout: 10.0,
            threads: 0,
            mip_gap: 0.1,
            use_hierarchical_objective: false,
            compute_transition_heuristics: true,
        }
    }
}

/// Knobs for one allocation search
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SearchParameters {
    /// Wall-clock budget in seconds; `None` searches to exhaustion
    pub timeout: Option<f32>,
    /// Retain closed nodes (required for repair)
    pub save_closed_nodes: bool,
    /// Retain pruned nodes (required for repair)
    pub save_pruned_nodes: bool,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            timeout: None,
            save_closed_nodes: true,
            save_pruned_nodes: true,
        }
    }
}

// ============================================================================
// Schedule (result)
// ============================================================================

/// A time-stamped schedule for one allocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Latest finish over all tasks
    pub makespan: f32,
    /// `(start, finish)` per task, indexed by task
    pub timepoints: Vec<(f32, f32)>,
    /// For each resolved mutex pair, the ordered `(first, second)` decision
    pub precedence_set_mutex_constraints: Vec<(TaskIndex, TaskIndex)>,
}

// ============================================================================
// Problem inputs
// ============================================================================

/// Everything a search needs, validated once and shared immutably.
///
/// `desired_traits` is `Y ∈ R^{M×T}` (row m = task m's desired traits) and
/// `team_traits` is `Q ∈ R^{N×T}` (row n = robot n's species traits); both
/// are derived from the task and robot lists during validation.
#[derive(Debug)]
pub struct ProblemInputs {
    pub species: Vec<Arc<Species>>,
    pub robots: Vec<Robot>,
    pub tasks: Vec<Task>,
    /// Precedence constraints as `(predecessor, successor)` pairs
    pub precedence: Vec<(TaskIndex, TaskIndex)>,
    pub desired_traits: Matrix,
    pub team_traits: Matrix,
    /// Convex weight between APR and NSQ in the search priority
    pub alpha: f32,
    /// Best achievable makespan (σ_best), used to normalise NSQ
    pub schedule_best_makespan: f32,
    /// Worst acceptable makespan (σ_worst), used to normalise NSQ
    pub schedule_worst_makespan: f32,
    pub reduction: TraitReduction,
    pub scheduler_parameters: SchedulerParameters,
    pub search_parameters: SearchParameters,
    pub planners: Vec<Arc<MemoisingOracle>>,
    pub query_budget: QueryBudget,
}

impl ProblemInputs {
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn num_robots(&self) -> usize {
        self.robots.len()
    }

    pub fn num_traits(&self) -> usize {
        self.desired_traits.cols()
    }

    pub fn robot(&self, index: RobotIndex) -> &Robot {
        &self.robots[index]
    }

    pub fn task(&self, index: TaskIndex) -> &Task {
        &self.tasks[index]
    }

    /// Whether a precedence constraint `pred -> succ` is declared
    pub fn has_precedence(&self, pred: TaskIndex, succ: TaskIndex) -> bool {
        self.precedence.iter().any(|&(p, s)| p == pred && s == succ)
    }

    /// The oracle serving a robot's species
    pub fn planner_for(&self, robot: &Robot) -> &Arc<MemoisingOracle> {
        &self.planners[robot.species.planner]
    }

    /// Raw path length between two configurations for one robot's species
    pub fn oracle_length(
        &self,
        robot: &Robot,
        from: &Configuration,
        to: &Configuration,
    ) -> Result<f32, OracleFailure> {
        self.planner_for(robot)
            .query(robot.bounding_radius(), from, to, self.query_budget)
    }

    /// Whether the oracle already holds a result for this pair
    pub fn oracle_memoised(&self, robot: &Robot, from: &Configuration, to: &Configuration) -> bool {
        self.planner_for(robot)
            .is_memoised(robot.bounding_radius(), from, to)
    }

    /// Total motion plans computed across all planners
    pub fn motion_plans_computed(&self) -> usize {
        self.planners.iter().map(|p| p.plans_computed()).sum()
    }

    /// Total motion-plan failures across all planners
    pub fn motion_plan_failures(&self) -> usize {
        self.planners.iter().map(|p| p.plan_failures()).sum()
    }

    /// Wall-clock time spent planning motion across all planners
    pub fn motion_planning_time(&self) -> std::time::Duration {
        self.planners.iter().map(|p| p.planning_time()).sum()
    }
}

/// Validation failures raised while building `ProblemInputs`
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("precedence constraint ({pred}, {succ}) references a task out of range (have {tasks})")]
    PrecedenceOutOfRange {
        pred: TaskIndex,
        succ: TaskIndex,
        tasks: usize,
    },

    #[error("task '{task}' declares {got} desired traits, expected {expected}")]
    TraitDimensionMismatch {
        task: String,
        got: usize,
        expected: usize,
    },

    #[error("species '{species}' declares {got} traits, expected {expected}")]
    SpeciesTraitMismatch {
        species: String,
        got: usize,
        expected: usize,
    },

    #[error("alpha must lie in [0, 1], got {0}")]
    AlphaOutOfRange(f32),

    #[error("best makespan {best} exceeds worst makespan {worst}")]
    MakespanBoundsInverted { best: f32, worst: f32 },

    #[error("infeasible team: even the all-ones allocation leaves a trait residual of {residual}")]
    InfeasibleTeam { residual: f32 },

    #[error("species '{species}' references motion planner {planner} but only {planners} exist")]
    UnknownPlanner {
        species: String,
        planner: usize,
        planners: usize,
    },

    #[error("task '{task}' has a negative duration {duration}")]
    NegativeDuration { task: String, duration: f32 },

    #[error("problem mixes configuration variants; one variant must be used throughout")]
    MixedConfigurationKinds,
}

/// Builder for validated `ProblemInputs`
#[derive(Default)]
pub struct ProblemBuilder {
    species: Vec<Arc<Species>>,
    robots: Vec<Robot>,
    tasks: Vec<Task>,
    precedence: Vec<(TaskIndex, TaskIndex)>,
    alpha: f32,
    best_makespan: f32,
    worst_makespan: f32,
    reduction: Option<TraitReduction>,
    scheduler_parameters: Option<SchedulerParameters>,
    search_parameters: Option<SearchParameters>,
    planners: Vec<Arc<MemoisingOracle>>,
    query_budget: Option<QueryBudget>,
}

impl ProblemBuilder {
    pub fn new() -> Self {
        Self {
            alpha: 0.5,
            ..Self::default()
        }
    }

    pub fn species(mut self, species: Arc<Species>) -> Self {
        self.species.push(species);
        self
    }

    pub fn robot(
        mut self,
        name: impl Into<String>,
        species: Arc<Species>,
        initial: Configuration,
    ) -> Self {
        self.robots.push(Robot::new(name, species, initial));
        self
    }

    pub fn task(
        mut self,
        name: impl Into<String>,
        duration: f32,
        desired_traits: Vec<f32>,
        initial: Configuration,
        terminal: Configuration,
    ) -> Self {
        self.tasks
            .push(Task::new(name, duration, desired_traits, initial, terminal));
        self
    }

    pub fn precedence(mut self, pred: TaskIndex, succ: TaskIndex) -> Self {
        self.precedence.push((pred, succ));
        self
    }

    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn makespan_bounds(mut self, best: f32, worst: f32) -> Self {
        self.best_makespan = best;
        self.worst_makespan = worst;
        self
    }

    pub fn reduction(mut self, reduction: TraitReduction) -> Self {
        self.reduction = Some(reduction);
        self
    }

    pub fn scheduler_parameters(mut self, parameters: SchedulerParameters) -> Self {
        self.scheduler_parameters = Some(parameters);
        self
    }

    pub fn search_parameters(mut self, parameters: SearchParameters) -> Self {
        self.search_parameters = Some(parameters);
        self
    }

    pub fn planner(mut self, planner: Arc<MemoisingOracle>) -> Self {
        self.planners.push(planner);
        self
    }

    pub fn query_budget(mut self, budget: QueryBudget) -> Self {
        self.query_budget = Some(budget);
        self
    }

    /// Validate and freeze the problem.
    ///
    /// Derives the desired-traits and team-traits matrices, then checks the
    /// structural invariants eagerly so the search can assume them.
    pub fn build(mut self) -> Result<Arc<ProblemInputs>, InputError> {
        // A planner-less problem still needs an oracle for heuristics.
        if self.planners.is_empty() {
            self.planners
                .push(Arc::new(MemoisingOracle::new(Environment::OpenSpace)));
        }

        let num_traits = self
            .tasks
            .first()
            .map(|t| t.desired_traits.len())
            .or_else(|| self.species.first().map(|s| s.traits.len()))
            .unwrap_or(0);

        for task in &self.tasks {
            if task.desired_traits.len() != num_traits {
                return Err(InputError::TraitDimensionMismatch {
                    task: task.name.clone(),
                    got: task.desired_traits.len(),
                    expected: num_traits,
                });
            }
            if task.static_duration < 0.0 {
                return Err(InputError::NegativeDuration {
                    task: task.name.clone(),
                    duration: task.static_duration,
                });
            }
        }
        for species in &self.species {
            if species.traits.len() != num_traits {
                return Err(InputError::SpeciesTraitMismatch {
                    species: species.name.clone(),
                    got: species.traits.len(),
                    expected: num_traits,
                });
            }
            if species.planner >= self.planners.len() {
                return Err(InputError::UnknownPlanner {
                    species: species.name.clone(),
                    planner: species.planner,
                    planners: self.planners.len(),
                });
            }
        }

        let num_tasks = self.tasks.len();
        for &(pred, succ) in &self.precedence {
            if pred >= num_tasks || succ >= num_tasks {
                return Err(InputError::PrecedenceOutOfRange {
                    pred,
                    succ,
                    tasks: num_tasks,
                });
            }
        }

        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(InputError::AlphaOutOfRange(self.alpha));
        }
        if self.best_makespan > self.worst_makespan {
            return Err(InputError::MakespanBoundsInverted {
                best: self.best_makespan,
                worst: self.worst_makespan,
            });
        }

        // All configurations must share one variant.
        {
            let mut kinds = self
                .robots
                .iter()
                .map(|r| &r.initial_configuration)
                .chain(
                    self.tasks
                        .iter()
                        .flat_map(|t| [&t.initial_configuration, &t.terminal_configuration]),
                );
            if let Some(first) = kinds.next() {
                if kinds.any(|c| !c.same_kind(first)) {
                    return Err(InputError::MixedConfigurationKinds);
                }
            }
        }

        // Y: one row per task.
        let mut desired_traits = Matrix::zeros(num_tasks, num_traits);
        for (m, task) in self.tasks.iter().enumerate() {
            desired_traits.set_row(m, &task.desired_traits);
        }
        // Q: one row per robot.
        let mut team_traits = Matrix::zeros(self.robots.len(), num_traits);
        for (n, robot) in self.robots.iter().enumerate() {
            team_traits.set_row(n, &robot.species.traits);
        }

        let reduction = self.reduction.unwrap_or_default();

        // Necessary feasibility: the whole team on every task must cover Y.
        let all_ones = Matrix::ones(num_tasks, self.robots.len());
        let residual =
            algebra::traits_mismatch_error(&reduction, &all_ones, &desired_traits, &team_traits);
        if residual > 0.0 {
            return Err(InputError::InfeasibleTeam { residual });
        }

        Ok(Arc::new(ProblemInputs {
            species: self.species,
            robots: self.robots,
            tasks: self.tasks,
            precedence: self.precedence,
            desired_traits,
            team_traits,
            alpha: self.alpha,
            schedule_best_makespan: self.best_makespan,
            schedule_worst_makespan: self.worst_makespan,
            reduction,
            scheduler_parameters: self.scheduler_parameters.unwrap_or_default(),
            search_parameters: self.search_parameters.unwrap_or_default(),
            planners: self.planners,
            query_budget: self.query_budget.unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rover(planner: usize) -> Arc<Species> {
        Arc::new(Species::new("rover", vec![1.0, 0.0], 0.5, 1.0, planner))
    }

    fn drone() -> Arc<Species> {
        Arc::new(Species::new("drone", vec![0.0, 1.0], 0.2, 2.0, 0))
    }

    fn origin() -> Configuration {
        Configuration::se2(0.0, 0.0, 0.0)
    }

    #[test]
    fn builder_produces_trait_matrices() {
        let inputs = ProblemBuilder::new()
            .species(rover(0))
            .species(drone())
            .robot("r0", rover(0), origin())
            .robot("d0", drone(), origin())
            .task("a", 1.0, vec![1.0, 0.0], origin(), origin())
            .task("b", 2.0, vec![0.0, 1.0], origin(), origin())
            .makespan_bounds(1.0, 10.0)
            .build()
            .unwrap();

        assert_eq!(inputs.desired_traits.rows(), 2);
        assert_eq!(inputs.desired_traits.cols(), 2);
        assert_eq!(inputs.desired_traits.row(0), &[1.0, 0.0]);
        assert_eq!(inputs.team_traits.row(1), &[0.0, 1.0]);
    }

    #[test]
    fn precedence_out_of_range_rejected() {
        let err = ProblemBuilder::new()
            .species(rover(0))
            .robot("r0", rover(0), origin())
            .task("a", 1.0, vec![1.0, 0.0], origin(), origin())
            .precedence(0, 3)
            .makespan_bounds(0.0, 1.0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            InputError::PrecedenceOutOfRange {
                pred: 0,
                succ: 3,
                tasks: 1
            }
        );
    }

    #[test]
    fn alpha_out_of_range_rejected() {
        let err = ProblemBuilder::new()
            .species(rover(0))
            .robot("r0", rover(0), origin())
            .task("a", 1.0, vec![1.0, 0.0], origin(), origin())
            .alpha(1.5)
            .makespan_bounds(0.0, 1.0)
            .build()
            .unwrap_err();
        assert_eq!(err, InputError::AlphaOutOfRange(1.5));
    }

    #[test]
    fn inverted_makespan_bounds_rejected() {
        let err = ProblemBuilder::new()
            .species(rover(0))
            .robot("r0", rover(0), origin())
            .task("a", 1.0, vec![1.0, 0.0], origin(), origin())
            .makespan_bounds(5.0, 1.0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            InputError::MakespanBoundsInverted {
                best: 5.0,
                worst: 1.0
            }
        );
    }

    #[test]
    fn infeasible_team_rejected() {
        // The task wants trait level 2 but the whole team only musters 1.
        let err = ProblemBuilder::new()
            .species(rover(0))
            .robot("r0", rover(0), origin())
            .task("heavy", 1.0, vec![2.0, 0.0], origin(), origin())
            .makespan_bounds(0.0, 1.0)
            .build()
            .unwrap_err();
        assert_eq!(err, InputError::InfeasibleTeam { residual: 1.0 });
    }

    #[test]
    fn trait_dimension_mismatch_rejected() {
        let err = ProblemBuilder::new()
            .species(rover(0))
            .robot("r0", rover(0), origin())
            .task("a", 1.0, vec![1.0, 0.0], origin(), origin())
            .task("b", 1.0, vec![1.0], origin(), origin())
            .makespan_bounds(0.0, 1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, InputError::TraitDimensionMismatch { .. }));
    }

    #[test]
    fn mixed_configuration_kinds_rejected() {
        let err = ProblemBuilder::new()
            .species(rover(0))
            .robot("r0", rover(0), origin())
            .task(
                "a",
                1.0,
                vec![1.0, 0.0],
                Configuration::graph(0, 0.0, 0.0),
                Configuration::graph(1, 1.0, 0.0),
            )
            .makespan_bounds(0.0, 1.0)
            .build()
            .unwrap_err();
        assert_eq!(err, InputError::MixedConfigurationKinds);
    }

    #[test]
    fn unknown_planner_rejected() {
        let err = ProblemBuilder::new()
            .species(rover(3))
            .robot("r0", rover(3), origin())
            .task("a", 1.0, vec![1.0, 0.0], origin(), origin())
            .makespan_bounds(0.0, 1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, InputError::UnknownPlanner { .. }));
    }

    #[test]
    fn task_duration_includes_internal_motion() {
        let species = rover(0);
        let robot = Robot::new("r0", species, origin());
        let planners = vec![Arc::new(MemoisingOracle::new(Environment::OpenSpace))];
        let task = Task::new(
            "haul",
            2.0,
            vec![1.0, 0.0],
            origin(),
            Configuration::se2(3.0, 4.0, 0.0),
        );
        let duration = task
            .compute_duration(&[&robot], &planners, QueryBudget::default())
            .unwrap();
        // 2.0 static + 5.0 length at speed 1.0
        assert_eq!(duration, 7.0);
    }

    #[test]
    fn task_duration_without_motion_is_static() {
        let species = rover(0);
        let robot = Robot::new("r0", species, origin());
        let planners = vec![Arc::new(MemoisingOracle::new(Environment::OpenSpace))];
        let task = Task::new("idle", 2.0, vec![1.0, 0.0], origin(), origin());
        let duration = task
            .compute_duration(&[&robot], &planners, QueryBudget::default())
            .unwrap();
        assert_eq!(duration, 2.0);
        // Same-configuration endpoints never touch the oracle.
        assert_eq!(planners[0].plans_computed(), 0);
    }
}
