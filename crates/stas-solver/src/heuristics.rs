//! Search guidance
//!
//! The search priority of a node is TETAQ, a convex combination of two
//! signals computed from its allocation matrix:
//!
//! - **APR** (allocation percentage remaining): the fraction of desired
//!   traits still uncovered, `tme(A) / Σ Y`. Monotonically non-increasing
//!   along any path, zero exactly at goal nodes.
//! - **NSQ** (normalised schedule quality): the makespan of the node's
//!   schedule normalised into `[0, 1]` by the problem's best and worst
//!   makespan bounds. A node whose allocation cannot be scheduled gets
//!   `+inf` and is effectively dead.
//!
//! `tetaq = alpha * apr + (1 - alpha) * nsq`; lower is better.

use crate::context::SolverContext;
use crate::scheduler::MilpScheduler;
use stas_core::{
    algebra, Assignment, Matrix, ProblemInputs, Schedule,
};

/// The cached result of evaluating one node
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub apr: f32,
    pub nsq: f32,
    pub tetaq: f32,
    pub schedule: Option<Schedule>,
}

/// TETAQ evaluator bound to one problem
pub struct Tetaq<'a> {
    inputs: &'a ProblemInputs,
    context: &'a SolverContext,
    desired_sum: f32,
    use_quick_scheduler: bool,
}

impl<'a> Tetaq<'a> {
    pub fn new(inputs: &'a ProblemInputs, context: &'a SolverContext) -> Self {
        Self {
            inputs,
            context,
            desired_sum: inputs.desired_traits.sum(),
            use_quick_scheduler: false,
        }
    }

    /// Compute NSQ with the single-shot scheduler variant. Trades strict
    /// optimality for throughput; fine for guidance, not for final answers.
    pub fn with_quick_scheduler(mut self) -> Self {
        self.use_quick_scheduler = true;
        self
    }

    /// Allocation percentage remaining, in `[0, 1]`
    pub fn apr(&self, allocation: &Matrix) -> f32 {
        if self.desired_sum == 0.0 {
            return 0.0;
        }
        let error = algebra::traits_mismatch_error(
            &self.inputs.reduction,
            allocation,
            &self.inputs.desired_traits,
            &self.inputs.team_traits,
        );
        error / self.desired_sum
    }

    /// Normalised schedule quality plus the schedule it came from.
    ///
    /// Scheduling failure yields `(inf, None)`: the node stays in the open
    /// queue but sinks below every live node.
    pub fn nsq(&self, allocation: &Matrix) -> (f32, Option<Schedule>) {
        let mut scheduler = MilpScheduler::new(self.inputs, self.context, allocation);
        let solved = if self.use_quick_scheduler {
            scheduler.solve_quick()
        } else {
            scheduler.solve()
        };
        match solved {
            Ok(schedule) => {
                let denominator =
                    self.inputs.schedule_worst_makespan - self.inputs.schedule_best_makespan;
                let nsq = if denominator > 0.0 {
                    (schedule.makespan - self.inputs.schedule_best_makespan) / denominator
                } else {
                    0.0
                };
                (nsq, Some(schedule))
            }
            Err(failure) => {
                tracing::debug!(%failure, "allocation cannot be scheduled");
                (f32::INFINITY, None)
            }
        }
    }

    /// Full evaluation. When `alpha == 1` the NSQ weight is zero and the
    /// scheduler is skipped entirely; the goal node's schedule is computed
    /// on demand by the search instead.
    pub fn evaluate(&self, allocation: &Matrix) -> Evaluation {
        let apr = self.apr(allocation);
        let alpha = self.inputs.alpha;
        if alpha >= 1.0 {
            return Evaluation {
                apr,
                nsq: 0.0,
                tetaq: apr,
                schedule: None,
            };
        }
        let (nsq, schedule) = self.nsq(allocation);
        Evaluation {
            apr,
            nsq,
            tetaq: alpha * apr + (1.0 - alpha) * nsq,
            schedule,
        }
    }
}

/// Whether an allocation satisfies every desired trait.
///
/// Over-allocation (negative mismatch) counts as satisfied.
pub fn is_goal(inputs: &ProblemInputs, allocation: &Matrix) -> bool {
    !algebra::traits_mismatch_matrix(
        &inputs.reduction,
        allocation,
        &inputs.desired_traits,
        &inputs.team_traits,
    )
    .any_positive()
}

// ============================================================================
// Pruning
// ============================================================================

/// Decides whether a freshly generated child should be discarded before
/// evaluation
pub trait Pruner {
    fn prune(&self, inputs: &ProblemInputs, allocation: &Matrix, last: Assignment) -> bool;
}

/// Never prunes
pub struct NullPruner;

impl Pruner for NullPruner {
    fn prune(&self, _inputs: &ProblemInputs, _allocation: &Matrix, _last: Assignment) -> bool {
        false
    }
}

/// Prunes a child whose newest assignment did not strictly improve the
/// traits-mismatch error over its parent.
///
/// Safe: APR is non-increasing along any path, so a non-improving child can
/// never reach the goal ahead of an improving sibling. A goal child cannot
/// be pruned either — its error is zero, which would force the parent's
/// error to zero, and a goal parent would already have ended the search.
pub struct TraitImprovementPruner;

impl Pruner for TraitImprovementPruner {
    fn prune(&self, inputs: &ProblemInputs, allocation: &Matrix, last: Assignment) -> bool {
        let child_error = algebra::traits_mismatch_error(
            &inputs.reduction,
            allocation,
            &inputs.desired_traits,
            &inputs.team_traits,
        );
        let mut parent_allocation = allocation.clone();
        parent_allocation.set(last.task, last.robot, 0.0);
        let parent_error = algebra::traits_mismatch_error(
            &inputs.reduction,
            &parent_allocation,
            &inputs.desired_traits,
            &inputs.team_traits,
        );
        child_error >= parent_error
    }
}

/// Conjunction of pruners: a child is pruned only when *every* member votes
/// to prune (short-circuits on the first keeper). Empty conjunctions keep
/// everything.
pub struct AllOf {
    members: Vec<Box<dyn Pruner>>,
}

impl AllOf {
    pub fn new(members: Vec<Box<dyn Pruner>>) -> Self {
        Self { members }
    }
}

impl Pruner for AllOf {
    fn prune(&self, inputs: &ProblemInputs, allocation: &Matrix, last: Assignment) -> bool {
        !self.members.is_empty()
            && self
                .members
                .iter()
                .all(|member| member.prune(inputs, allocation, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stas_core::{Configuration, ProblemBuilder, Species};
    use std::sync::Arc;

    fn origin() -> Configuration {
        Configuration::se2(0.0, 0.0, 0.0)
    }

    fn scout() -> Arc<Species> {
        Arc::new(Species::new("scout", vec![1.0, 0.0], 0.3, 1.0, 0))
    }

    fn hauler() -> Arc<Species> {
        Arc::new(Species::new("hauler", vec![0.0, 1.0], 0.6, 0.5, 0))
    }

    fn two_task_inputs() -> Arc<ProblemInputs> {
        ProblemBuilder::new()
            .species(scout())
            .species(hauler())
            .robot("s0", scout(), origin())
            .robot("h0", hauler(), origin())
            .task("recon", 1.0, vec![1.0, 0.0], origin(), origin())
            .task("carry", 1.0, vec![0.0, 1.0], origin(), origin())
            .alpha(0.5)
            .makespan_bounds(1.0, 5.0)
            .build()
            .unwrap()
    }

    #[test]
    fn apr_spans_zero_to_one() {
        let inputs = two_task_inputs();
        let context = SolverContext::default();
        let tetaq = Tetaq::new(&inputs, &context);

        let empty = Matrix::zeros(2, 2);
        assert_eq!(tetaq.apr(&empty), 1.0);

        let mut full = Matrix::zeros(2, 2);
        full.set(0, 0, 1.0);
        full.set(1, 1, 1.0);
        assert_eq!(tetaq.apr(&full), 0.0);

        let mut half = Matrix::zeros(2, 2);
        half.set(0, 0, 1.0);
        assert_eq!(tetaq.apr(&half), 0.5);
    }

    #[test]
    fn apr_zero_iff_goal() {
        let inputs = two_task_inputs();
        let context = SolverContext::default();
        let tetaq = Tetaq::new(&inputs, &context);

        let mut allocation = Matrix::zeros(2, 2);
        assert!(!is_goal(&inputs, &allocation));
        allocation.set(0, 0, 1.0);
        allocation.set(1, 1, 1.0);
        assert!(is_goal(&inputs, &allocation));
        assert_eq!(tetaq.apr(&allocation), 0.0);
    }

    #[test]
    fn over_allocation_is_still_a_goal() {
        let inputs = two_task_inputs();
        let mut allocation = Matrix::ones(2, 2);
        allocation.set(0, 1, 1.0);
        assert!(is_goal(&inputs, &allocation));
    }

    #[test]
    fn nsq_normalises_makespan() {
        let inputs = two_task_inputs();
        let context = SolverContext::default();
        let tetaq = Tetaq::new(&inputs, &context);

        // Disjoint robots, co-located tasks: makespan 1, the best bound.
        let mut allocation = Matrix::zeros(2, 2);
        allocation.set(0, 0, 1.0);
        allocation.set(1, 1, 1.0);
        let (nsq, schedule) = tetaq.nsq(&allocation);
        assert!(schedule.is_some());
        assert!(nsq.abs() < 1e-3, "expected nsq 0, got {nsq}");
    }

    #[test]
    fn evaluation_combines_apr_and_nsq() {
        let inputs = two_task_inputs();
        let context = SolverContext::default();
        let tetaq = Tetaq::new(&inputs, &context);

        let mut allocation = Matrix::zeros(2, 2);
        allocation.set(0, 0, 1.0);
        allocation.set(1, 1, 1.0);
        let evaluation = tetaq.evaluate(&allocation);
        assert_eq!(evaluation.apr, 0.0);
        assert!(evaluation.nsq.abs() < 1e-3);
        assert!(evaluation.tetaq.abs() < 1e-3);
    }

    #[test]
    fn alpha_one_skips_the_scheduler() {
        let inputs = ProblemBuilder::new()
            .species(scout())
            .robot("s0", scout(), origin())
            .task("recon", 1.0, vec![1.0, 0.0], origin(), origin())
            .alpha(1.0)
            .makespan_bounds(1.0, 1.0)
            .build()
            .unwrap();
        let context = SolverContext::default();
        let tetaq = Tetaq::new(&inputs, &context);

        let allocation = Matrix::ones(1, 1);
        let evaluation = tetaq.evaluate(&allocation);
        assert_eq!(evaluation.tetaq, evaluation.apr);
        assert!(evaluation.schedule.is_none());
        assert_eq!(context.scheduling_iterations(), 0);
    }

    #[test]
    fn trait_improvement_pruner_rejects_redundant_assignment() {
        let inputs = two_task_inputs();
        let pruner = TraitImprovementPruner;

        // The hauler contributes nothing to recon: prune.
        let mut redundant = Matrix::zeros(2, 2);
        redundant.set(0, 1, 1.0);
        assert!(pruner.prune(
            &inputs,
            &redundant,
            Assignment { task: 0, robot: 1 }
        ));

        // The scout covers recon's desired trait: keep.
        let mut useful = Matrix::zeros(2, 2);
        useful.set(0, 0, 1.0);
        assert!(!pruner.prune(&inputs, &useful, Assignment { task: 0, robot: 0 }));
    }

    #[test]
    fn all_of_requires_unanimity() {
        let inputs = two_task_inputs();
        let mut useful = Matrix::zeros(2, 2);
        useful.set(0, 0, 1.0);
        let last = Assignment { task: 0, robot: 0 };

        struct Always(bool);
        impl Pruner for Always {
            fn prune(&self, _: &ProblemInputs, _: &Matrix, _: Assignment) -> bool {
                self.0
            }
        }

        let unanimous = AllOf::new(vec![Box::new(Always(true)), Box::new(Always(true))]);
        assert!(unanimous.prune(&inputs, &useful, last));

        let split = AllOf::new(vec![Box::new(Always(true)), Box::new(Always(false))]);
        assert!(!split.prune(&inputs, &useful, last));

        let empty = AllOf::new(Vec::new());
        assert!(!empty.prune(&inputs, &useful, last));
    }
}
