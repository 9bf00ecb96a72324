//! MILP backend abstraction
//!
//! The scheduler formulates its model against the narrow [`MilpBackend`]
//! trait: continuous and binary variables, linear constraints, indicator
//! constraints, a max aggregate and a (possibly hierarchical) linear
//! objective. [`CpBackend`] implements the trait on top of the Pumpkin
//! constraint-programming solver:
//!
//! - continuous timepoints become fixed-point integer ticks
//!   (`TICKS_PER_UNIT` per time unit),
//! - indicator constraints become big-M linearisations over the bounded
//!   domains,
//! - the max aggregate becomes one lower bound per input, exact because the
//!   objective presses the aggregate down,
//! - a hierarchical objective becomes a phase per level, bounding each
//!   level at its optimum before minimising the next.
//!
//! The backend records the model declaratively and builds a fresh solver per
//! phase, which also gives the lazy-refinement loop cheap re-solves.

use pumpkin_solver::constraints as cp;
use pumpkin_solver::optimisation::linear_sat_unsat::LinearSatUnsat;
use pumpkin_solver::optimisation::OptimisationDirection;
use pumpkin_solver::results::{OptimisationResult, ProblemSolution};
use pumpkin_solver::termination::TimeBudget;
use pumpkin_solver::variables::{DomainId, TransformableVariable};
use pumpkin_solver::Solver;
use std::time::{Duration, Instant};

/// Fixed-point resolution: one time unit is this many solver ticks
const TICKS_PER_UNIT: f64 = 1000.0;

/// Handle to a model variable
pub type VarId = usize;

/// Direction of a linear constraint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintSense {
    LessOrEqual,
    GreaterOrEqual,
    Equal,
}

/// Direction of the objective
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectiveSense {
    Minimise,
    Maximise,
}

/// Outcome of a solve
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Suboptimal,
    Infeasible,
    Timeout,
}

/// Per-solve knobs handed through to the backend
#[derive(Clone, Copy, Debug)]
pub struct SolveOptions {
    pub timeout: Duration,
    /// Worker threads; the CP backend is single-threaded and ignores this
    pub threads: u32,
    /// Accepted relative gap; the CP backend proves optimality and ignores this
    pub mip_gap: f32,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            threads: 0,
            mip_gap: 0.0,
        }
    }
}

/// The capabilities a scheduler needs from a MILP engine
pub trait MilpBackend {
    fn add_continuous_var(&mut self, name: &str, lb: f64, ub: f64) -> VarId;

    fn add_binary_var(&mut self, name: &str) -> VarId;

    fn add_linear_constraint(
        &mut self,
        terms: &[(VarId, f64)],
        sense: ConstraintSense,
        rhs: f64,
        name: &str,
    );

    /// `indicator == value  =>  terms <sense> rhs`
    fn add_indicator_constraint(
        &mut self,
        indicator: VarId,
        value: bool,
        terms: &[(VarId, f64)],
        sense: ConstraintSense,
        rhs: f64,
        name: &str,
    );

    /// Constrain `var` to the maximum of `inputs` (exact under minimisation)
    fn add_max_aggregate(&mut self, var: VarId, inputs: &[VarId]);

    fn set_objective(&mut self, terms: &[(VarId, f64)], sense: ObjectiveSense);

    /// Strict lexicographic objective: earlier levels dominate later ones
    fn set_hierarchical_objective(&mut self, levels: &[Vec<(VarId, f64)>]);

    fn solve(&mut self, options: SolveOptions) -> SolveStatus;

    /// Value of `var` in the last solution; meaningless before a successful solve
    fn value(&self, var: VarId) -> f64;
}

// ============================================================================
// CP implementation
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VarKind {
    Continuous,
    Binary,
}

#[derive(Clone, Debug)]
struct VarSpec {
    kind: VarKind,
    lb_ticks: i64,
    ub_ticks: i64,
}

/// A constraint normalised to `Σ coef·var >= rhs` in tick space
#[derive(Clone, Debug)]
struct TickConstraint {
    terms: Vec<(VarId, i64)>,
    rhs: i64,
}

/// Pumpkin-backed [`MilpBackend`]
pub struct CpBackend {
    vars: Vec<VarSpec>,
    constraints: Vec<TickConstraint>,
    objective_levels: Vec<Vec<(VarId, i64)>>,
    minimise: bool,
    solution: Vec<i64>,
}

impl Default for CpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpBackend {
    pub fn new() -> Self {
        Self {
            vars: Vec::new(),
            constraints: Vec::new(),
            objective_levels: Vec::new(),
            minimise: true,
            solution: Vec::new(),
        }
    }

    fn to_ticks(value: f64) -> i64 {
        (value * TICKS_PER_UNIT).round() as i64
    }

    /// Convert a term list into tick space. Continuous variables already
    /// hold ticks, so their coefficients pass through; binary variables hold
    /// raw 0/1, so their coefficients pick up the scale factor.
    fn tick_terms(&self, terms: &[(VarId, f64)]) -> Vec<(VarId, i64)> {
        terms
            .iter()
            .map(|&(var, coef)| {
                let int_coef = match self.vars[var].kind {
                    VarKind::Continuous => coef.round() as i64,
                    VarKind::Binary => (coef * TICKS_PER_UNIT).round() as i64,
                };
                (var, int_coef)
            })
            .collect()
    }

    /// Append `terms >= rhs` (tick space), expanding Le/Eq into Ge form
    fn push_normalised(
        &mut self,
        terms: Vec<(VarId, i64)>,
        sense: ConstraintSense,
        rhs: i64,
    ) {
        match sense {
            ConstraintSense::GreaterOrEqual => {
                self.constraints.push(TickConstraint { terms, rhs });
            }
            ConstraintSense::LessOrEqual => {
                let negated = terms.iter().map(|&(v, c)| (v, -c)).collect();
                self.constraints.push(TickConstraint {
                    terms: negated,
                    rhs: -rhs,
                });
            }
            ConstraintSense::Equal => {
                self.push_normalised(terms.clone(), ConstraintSense::GreaterOrEqual, rhs);
                self.push_normalised(terms, ConstraintSense::LessOrEqual, rhs);
            }
        }
    }

    /// A big-M large enough to deactivate `terms >= rhs` over the recorded
    /// variable bounds.
    fn big_m(&self, terms: &[(VarId, i64)], rhs: i64) -> i64 {
        let mut m = rhs.abs() + 1;
        for &(var, coef) in terms {
            let spec = &self.vars[var];
            m += coef.abs() * spec.lb_ticks.abs().max(spec.ub_ticks.abs());
        }
        m
    }

    fn build_solver(&self, extra: &[TickConstraint]) -> (Solver, Vec<DomainId>) {
        let mut solver = Solver::default();
        let domains: Vec<_> = self
            .vars
            .iter()
            .map(|spec| solver.new_bounded_integer(spec.lb_ticks as i32, spec.ub_ticks as i32))
            .collect();

        let constraint_tag = solver.new_constraint_tag();
        for constraint in self.constraints.iter().chain(extra) {
            let views: Vec<_> = constraint
                .terms
                .iter()
                .map(|&(var, coef)| domains[var].scaled(coef as i32))
                .collect();
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(
                    views,
                    constraint.rhs as i32,
                    constraint_tag,
                ))
                .post();
        }
        (solver, domains)
    }

    /// Minimise one linear level, returning the status, the objective value
    /// and a full assignment.
    fn optimise_level(
        &self,
        level: &[(VarId, i64)],
        extra: &[TickConstraint],
        budget: Duration,
    ) -> (SolveStatus, Option<(i64, Vec<i64>)>) {
        let (mut solver, domains) = self.build_solver(extra);

        // The optimiser steers a single variable; aggregate multi-term
        // levels into an auxiliary equal to the level expression.
        let constraint_tag = solver.new_constraint_tag();
        let objective_domain = if level.len() == 1 && level[0].1 == 1 {
            domains[level[0].0]
        } else {
            let (mut lb, mut ub) = (0_i64, 0_i64);
            for &(var, coef) in level {
                let spec = &self.vars[var];
                let (a, b) = (coef * spec.lb_ticks, coef * spec.ub_ticks);
                lb += a.min(b);
                ub += a.max(b);
            }
            let aux = solver.new_bounded_integer(lb as i32, ub as i32);
            // aux == Σ level
            let mut forward: Vec<_> = vec![aux.scaled(1)];
            forward.extend(level.iter().map(|&(var, coef)| domains[var].scaled(-coef as i32)));
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(forward, 0, constraint_tag))
                .post();
            let mut backward: Vec<_> = vec![aux.scaled(-1)];
            backward.extend(level.iter().map(|&(var, coef)| domains[var].scaled(coef as i32)));
            let _ = solver
                .add_constraint(cp::greater_than_or_equals(backward, 0, constraint_tag))
                .post();
            aux
        };

        fn noop_callback<B>(
            _: &Solver,
            _: pumpkin_solver::results::SolutionReference,
            _: &B,
        ) {
        }

        let direction = if self.minimise {
            OptimisationDirection::Minimise
        } else {
            OptimisationDirection::Maximise
        };
        let mut brancher = solver.default_brancher();
        let mut termination = TimeBudget::starting_now(budget);
        let result = solver.optimise(
            &mut brancher,
            &mut termination,
            LinearSatUnsat::new(direction, objective_domain, noop_callback),
        );

        match result {
            OptimisationResult::Optimal(solution) => {
                let values: Vec<i64> = domains
                    .iter()
                    .map(|&d| solution.get_integer_value(d) as i64)
                    .collect();
                let objective = solution.get_integer_value(objective_domain) as i64;
                (SolveStatus::Optimal, Some((objective, values)))
            }
            OptimisationResult::Satisfiable(solution) => {
                let values: Vec<i64> = domains
                    .iter()
                    .map(|&d| solution.get_integer_value(d) as i64)
                    .collect();
                let objective = solution.get_integer_value(objective_domain) as i64;
                (SolveStatus::Suboptimal, Some((objective, values)))
            }
            OptimisationResult::Unsatisfiable => (SolveStatus::Infeasible, None),
            OptimisationResult::Unknown => (SolveStatus::Timeout, None),
        }
    }
}

impl MilpBackend for CpBackend {
    fn add_continuous_var(&mut self, _name: &str, lb: f64, ub: f64) -> VarId {
        self.vars.push(VarSpec {
            kind: VarKind::Continuous,
            lb_ticks: Self::to_ticks(lb),
            ub_ticks: Self::to_ticks(ub),
        });
        self.vars.len() - 1
    }

    fn add_binary_var(&mut self, _name: &str) -> VarId {
        self.vars.push(VarSpec {
            kind: VarKind::Binary,
            lb_ticks: 0,
            ub_ticks: 1,
        });
        self.vars.len() - 1
    }

    fn add_linear_constraint(
        &mut self,
        terms: &[(VarId, f64)],
        sense: ConstraintSense,
        rhs: f64,
        _name: &str,
    ) {
        let ticks = self.tick_terms(terms);
        self.push_normalised(ticks, sense, Self::to_ticks(rhs));
    }

    fn add_indicator_constraint(
        &mut self,
        indicator: VarId,
        value: bool,
        terms: &[(VarId, f64)],
        sense: ConstraintSense,
        rhs: f64,
        _name: &str,
    ) {
        debug_assert_eq!(self.vars[indicator].kind, VarKind::Binary);
        // Normalise the guarded constraint into >= form first, then relax it
        // with a big-M term that vanishes when the indicator takes `value`.
        let ticks = self.tick_terms(terms);
        let rhs_ticks = Self::to_ticks(rhs);
        let normalised: Vec<(Vec<(VarId, i64)>, i64)> = match sense {
            ConstraintSense::GreaterOrEqual => vec![(ticks, rhs_ticks)],
            ConstraintSense::LessOrEqual => vec![(
                ticks.iter().map(|&(v, c)| (v, -c)).collect(),
                -rhs_ticks,
            )],
            ConstraintSense::Equal => vec![
                (ticks.clone(), rhs_ticks),
                (ticks.iter().map(|&(v, c)| (v, -c)).collect(), -rhs_ticks),
            ],
        };
        for (mut terms, rhs) in normalised {
            let m = self.big_m(&terms, rhs);
            if value {
                // active when indicator = 1: terms - M·ind >= rhs - M
                terms.push((indicator, -m));
                self.constraints.push(TickConstraint { terms, rhs: rhs - m });
            } else {
                // active when indicator = 0: terms + M·ind >= rhs
                terms.push((indicator, m));
                self.constraints.push(TickConstraint { terms, rhs });
            }
        }
    }

    fn add_max_aggregate(&mut self, var: VarId, inputs: &[VarId]) {
        for &input in inputs {
            self.constraints.push(TickConstraint {
                terms: vec![(var, 1), (input, -1)],
                rhs: 0,
            });
        }
    }

    fn set_objective(&mut self, terms: &[(VarId, f64)], sense: ObjectiveSense) {
        self.minimise = sense == ObjectiveSense::Minimise;
        self.objective_levels = vec![self.tick_terms(terms)];
    }

    fn set_hierarchical_objective(&mut self, levels: &[Vec<(VarId, f64)>]) {
        self.minimise = true;
        self.objective_levels = levels.iter().map(|l| self.tick_terms(l)).collect();
    }

    fn solve(&mut self, options: SolveOptions) -> SolveStatus {
        let levels = if self.objective_levels.is_empty() {
            // No objective set: minimise a constant.
            vec![Vec::new()]
        } else {
            self.objective_levels.clone()
        };

        let deadline = Instant::now() + options.timeout;
        // Lower-priority levels must not degrade higher-priority ones, so
        // each phase pins the previous level at its optimum.
        let mut pinned: Vec<TickConstraint> = Vec::new();
        let mut final_status = SolveStatus::Optimal;
        for (index, level) in levels.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return SolveStatus::Timeout;
            }
            let (status, outcome) = self.optimise_level(level, &pinned, remaining);
            match (status, outcome) {
                (SolveStatus::Optimal, Some((best, values))) => {
                    self.solution = values;
                    // level <= best  =>  -level >= -best
                    pinned.push(TickConstraint {
                        terms: level.iter().map(|&(v, c)| (v, -c)).collect(),
                        rhs: -best,
                    });
                }
                (SolveStatus::Suboptimal, Some((_, values))) => {
                    // Keep the incumbent but stop refining lower levels.
                    self.solution = values;
                    final_status = SolveStatus::Suboptimal;
                    break;
                }
                (status, _) => {
                    tracing::debug!(?status, level = index, "backend solve failed");
                    return status;
                }
            }
        }
        final_status
    }

    fn value(&self, var: VarId) -> f64 {
        let raw = self.solution.get(var).copied().unwrap_or(0);
        match self.vars[var].kind {
            VarKind::Continuous => raw as f64 / TICKS_PER_UNIT,
            VarKind::Binary => raw as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SolveOptions {
        SolveOptions {
            timeout: Duration::from_secs(5),
            ..SolveOptions::default()
        }
    }

    #[test]
    fn minimises_a_chain_of_precedences() {
        let mut backend = CpBackend::new();
        let s0 = backend.add_continuous_var("s0", 0.0, 100.0);
        let s1 = backend.add_continuous_var("s1", 0.0, 100.0);
        let makespan = backend.add_continuous_var("makespan", 0.0, 100.0);

        // s1 >= s0 + 2, makespan >= s1 + 3
        backend.add_linear_constraint(
            &[(s1, 1.0), (s0, -1.0)],
            ConstraintSense::GreaterOrEqual,
            2.0,
            "pc",
        );
        backend.add_linear_constraint(
            &[(makespan, 1.0), (s1, -1.0)],
            ConstraintSense::GreaterOrEqual,
            3.0,
            "mk",
        );
        backend.set_objective(&[(makespan, 1.0)], ObjectiveSense::Minimise);

        assert_eq!(backend.solve(options()), SolveStatus::Optimal);
        assert!((backend.value(makespan) - 5.0).abs() < 1e-6);
        assert!((backend.value(s0) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn indicator_picks_the_cheaper_order() {
        // Two unit tasks sharing a robot: one binary decides the order, and
        // the asymmetric transition times make 0 -> 1 strictly cheaper.
        let mut backend = CpBackend::new();
        let s0 = backend.add_continuous_var("s0", 0.0, 100.0);
        let s1 = backend.add_continuous_var("s1", 0.0, 100.0);
        let makespan = backend.add_continuous_var("makespan", 0.0, 100.0);
        let order = backend.add_binary_var("p_01");

        // order = 1 => s1 >= s0 + 1 + 1 (duration 1, transition 1)
        backend.add_indicator_constraint(
            order,
            true,
            &[(s1, 1.0), (s0, -1.0)],
            ConstraintSense::GreaterOrEqual,
            2.0,
            "tc01",
        );
        // order = 0 => s0 >= s1 + 1 + 10
        backend.add_indicator_constraint(
            order,
            false,
            &[(s0, 1.0), (s1, -1.0)],
            ConstraintSense::GreaterOrEqual,
            11.0,
            "tc10",
        );
        backend.add_linear_constraint(
            &[(makespan, 1.0), (s0, -1.0)],
            ConstraintSense::GreaterOrEqual,
            1.0,
            "mk0",
        );
        backend.add_linear_constraint(
            &[(makespan, 1.0), (s1, -1.0)],
            ConstraintSense::GreaterOrEqual,
            1.0,
            "mk1",
        );
        backend.set_objective(&[(makespan, 1.0)], ObjectiveSense::Minimise);

        assert_eq!(backend.solve(options()), SolveStatus::Optimal);
        assert!((backend.value(order) - 1.0).abs() < 1e-6);
        assert!((backend.value(makespan) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn equality_constraint_fixes_duration() {
        let mut backend = CpBackend::new();
        let start = backend.add_continuous_var("s", 0.0, 50.0);
        let finish = backend.add_continuous_var("f", 0.0, 50.0);
        backend.add_linear_constraint(
            &[(finish, 1.0), (start, -1.0)],
            ConstraintSense::Equal,
            4.5,
            "dc",
        );
        backend.set_objective(&[(finish, 1.0)], ObjectiveSense::Minimise);

        assert_eq!(backend.solve(options()), SolveStatus::Optimal);
        assert!((backend.value(finish) - backend.value(start) - 4.5).abs() < 1e-6);
    }

    #[test]
    fn infeasible_model_reported() {
        let mut backend = CpBackend::new();
        let x = backend.add_continuous_var("x", 0.0, 10.0);
        backend.add_linear_constraint(&[(x, 1.0)], ConstraintSense::GreaterOrEqual, 5.0, "lo");
        backend.add_linear_constraint(&[(x, 1.0)], ConstraintSense::LessOrEqual, 2.0, "hi");
        backend.set_objective(&[(x, 1.0)], ObjectiveSense::Minimise);
        assert_eq!(backend.solve(options()), SolveStatus::Infeasible);
    }

    #[test]
    fn hierarchical_objective_breaks_ties_by_start_sum() {
        // Two independent unit tasks: makespan 1 regardless, but the
        // secondary level pushes both starts to zero.
        let mut backend = CpBackend::new();
        let s0 = backend.add_continuous_var("s0", 0.0, 20.0);
        let s1 = backend.add_continuous_var("s1", 0.0, 20.0);
        let makespan = backend.add_continuous_var("makespan", 0.0, 20.0);
        backend.add_linear_constraint(
            &[(makespan, 1.0), (s0, -1.0)],
            ConstraintSense::GreaterOrEqual,
            1.0,
            "mk0",
        );
        backend.add_linear_constraint(
            &[(makespan, 1.0), (s1, -1.0)],
            ConstraintSense::GreaterOrEqual,
            1.0,
            "mk1",
        );
        backend.set_hierarchical_objective(&[
            vec![(makespan, 1.0)],
            vec![(s0, 1.0), (s1, 1.0)],
        ]);

        assert_eq!(backend.solve(options()), SolveStatus::Optimal);
        assert!((backend.value(makespan) - 1.0).abs() < 1e-6);
        assert!(backend.value(s0).abs() < 1e-6);
        assert!(backend.value(s1).abs() < 1e-6);
    }

    #[test]
    fn max_aggregate_tracks_largest_input() {
        let mut backend = CpBackend::new();
        let a = backend.add_continuous_var("a", 3.0, 3.0);
        let b = backend.add_continuous_var("b", 7.0, 7.0);
        let top = backend.add_continuous_var("top", 0.0, 100.0);
        backend.add_max_aggregate(top, &[a, b]);
        backend.set_objective(&[(top, 1.0)], ObjectiveSense::Minimise);

        assert_eq!(backend.solve(options()), SolveStatus::Optimal);
        assert!((backend.value(top) - 7.0).abs() < 1e-6);
    }
}
