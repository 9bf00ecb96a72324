//! Deterministic MILP scheduler
//!
//! Given a fixed allocation, the scheduler assigns start and finish
//! timepoints that minimise makespan subject to task durations, declared
//! precedences, initial transitions and the mutual exclusion of tasks that
//! share robots.
//!
//! Motion plans are expensive, so the model is first solved with cheap
//! euclidean underestimates wherever the oracle has no memoised answer.
//! After each solve, the transitions robots actually realise (consecutive
//! tasks in start order) are queried for real; if any estimate was upgraded
//! the model is re-solved. The loop ends when an optimal solution rests
//! entirely on real transitions, or on the first oracle failure or solver
//! miss. With transition heuristics disabled there is no estimating at
//! all: every pair is planned for real before the first solve.
//!
//! A mutex pair drops out of the model when the oracle proves one direction
//! impossible: the surviving direction becomes a hard MP-induced precedence.
//! If both directions are impossible the allocation cannot be scheduled.

use crate::context::SolverContext;
use crate::milp::{
    ConstraintSense, CpBackend, MilpBackend, ObjectiveSense, SolveOptions, SolveStatus, VarId,
};
use stas_core::{Configuration, Matrix, ProblemInputs, RobotIndex, Schedule, TaskIndex};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a scheduling attempt failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SchedulerFailure {
    #[error("a motion plan required by the allocation cannot be computed")]
    InfeasibleTransition,
    #[error("the MILP solver ran out of time")]
    SolverTimeout,
    #[error("the MILP solver stopped on a non-optimal incumbent")]
    SolverSuboptimal,
    #[error("the MILP model is infeasible")]
    InfeasibleModel,
}

/// How a transition duration was obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionStatus {
    None,
    Heuristic,
    Success,
    Failed,
}

#[derive(Clone, Copy, Debug)]
struct RobotTransition {
    robot: RobotIndex,
    status: TransitionStatus,
    duration: f32,
}

impl RobotTransition {
    fn new(robot: RobotIndex) -> Self {
        Self {
            robot,
            status: TransitionStatus::None,
            duration: -1.0,
        }
    }
}

/// Variables of one task in the current model
struct TaskVars {
    start: VarId,
    finish: VarId,
}

/// One reduced-set mutex binary in the current model
struct MutexVar {
    task_i: TaskIndex,
    task_j: TaskIndex,
    variable: VarId,
}

/// MILP scheduler over one allocation
pub struct MilpScheduler<'a> {
    inputs: &'a ProblemInputs,
    context: &'a SolverContext,
    allocation: &'a Matrix,
    coalitions: Vec<Vec<RobotIndex>>,
    task_durations: Vec<f32>,
    /// `transitions[i][j]`: one entry per robot in both coalitions
    transitions: Vec<Vec<Vec<RobotTransition>>>,
    /// `initial_transitions[i]`: one entry per robot in task i's coalition
    initial_transitions: Vec<Vec<RobotTransition>>,
    /// Unordered same-coalition pairs still undecided (i < j)
    mutex_candidates: Vec<(TaskIndex, TaskIndex)>,
    /// Precedences forced by one-directional oracle failures
    mp_induced: BTreeSet<(TaskIndex, TaskIndex)>,
}

impl<'a> MilpScheduler<'a> {
    pub fn new(inputs: &'a ProblemInputs, context: &'a SolverContext, allocation: &'a Matrix) -> Self {
        let num_tasks = inputs.num_tasks();
        let num_robots = inputs.num_robots();

        let coalitions: Vec<Vec<RobotIndex>> = (0..num_tasks)
            .map(|m| {
                (0..num_robots)
                    .filter(|&n| allocation.get(m, n) != 0.0)
                    .collect()
            })
            .collect();

        let mut transitions = Vec::with_capacity(num_tasks);
        for i in 0..num_tasks {
            let mut row = Vec::with_capacity(num_tasks);
            for j in 0..num_tasks {
                let shared: Vec<RobotTransition> = if i == j {
                    Vec::new()
                } else {
                    coalitions[i]
                        .iter()
                        .filter(|r| coalitions[j].contains(r))
                        .map(|&r| RobotTransition::new(r))
                        .collect()
                };
                row.push(shared);
            }
            transitions.push(row);
        }

        let initial_transitions: Vec<Vec<RobotTransition>> = coalitions
            .iter()
            .map(|coalition| coalition.iter().map(|&r| RobotTransition::new(r)).collect())
            .collect();

        // Reduced mutex candidates: same-coalition pairs without a declared
        // precedence in either direction.
        let mut mutex_candidates = Vec::new();
        for i in 0..num_tasks {
            for j in (i + 1)..num_tasks {
                if transitions[i][j].is_empty() {
                    continue;
                }
                if inputs.has_precedence(i, j) || inputs.has_precedence(j, i) {
                    continue;
                }
                mutex_candidates.push((i, j));
            }
        }

        Self {
            inputs,
            context,
            allocation,
            coalitions,
            task_durations: vec![-1.0; num_tasks],
            transitions,
            initial_transitions,
            mutex_candidates,
            mp_induced: BTreeSet::new(),
        }
    }

    /// Solve to optimality with lazy transition refinement
    pub fn solve(&mut self) -> Result<Schedule, SchedulerFailure> {
        let started = Instant::now();
        let result = self.solve_inner(false);
        self.context.add_scheduling_time(started.elapsed());
        result
    }

    /// Single-shot variant: accept the first MILP solution and patch start
    /// times forward with realised transitions. Faster but only valid for
    /// heuristic guidance.
    pub fn solve_quick(&mut self) -> Result<Schedule, SchedulerFailure> {
        let started = Instant::now();
        let result = self.solve_inner(true);
        self.context.add_scheduling_time(started.elapsed());
        result
    }

    fn solve_inner(&mut self, quick: bool) -> Result<Schedule, SchedulerFailure> {
        self.compute_task_durations()?;
        // Every transition entry is seeded before the first solve: with
        // euclidean estimates standing in for unmemoised pairs when
        // heuristics are on, with real oracle plans for everything when
        // they are off. The model never sees an unseeded bound.
        self.seed_initial_transitions()?;
        self.seed_transitions();

        loop {
            self.context.record_scheduling_iteration();
            let mut backend = CpBackend::new();
            let (task_vars, makespan, mutex_vars) = self.build_model(&mut backend)?;

            let parameters = &self.inputs.scheduler_parameters;
            let status = backend.solve(SolveOptions {
                timeout: Duration::from_secs_f32(parameters.timeout.max(0.0)),
                threads: parameters.threads,
                mip_gap: parameters.mip_gap,
            });
            match status {
                SolveStatus::Optimal => {}
                SolveStatus::Timeout => {
                    self.context.record_scheduling_failure();
                    return Err(SchedulerFailure::SolverTimeout);
                }
                SolveStatus::Suboptimal => {
                    self.context.record_scheduling_failure();
                    return Err(SchedulerFailure::SolverSuboptimal);
                }
                SolveStatus::Infeasible => {
                    self.context.record_scheduling_failure();
                    return Err(SchedulerFailure::InfeasibleModel);
                }
            }

            if quick {
                return self.patch_quick_schedule(&backend, &task_vars, &mutex_vars);
            }

            let refined = self.refine_transitions(&backend, &task_vars)?;
            if !refined {
                return Ok(self.extract_schedule(&backend, &task_vars, makespan, &mutex_vars));
            }
        }
    }

    // ========================================================================
    // Durations and transition seeding
    // ========================================================================

    fn compute_task_durations(&mut self) -> Result<(), SchedulerFailure> {
        for m in 0..self.inputs.num_tasks() {
            let coalition: Vec<&stas_core::Robot> = self.coalitions[m]
                .iter()
                .map(|&n| self.inputs.robot(n))
                .collect();
            let duration = self
                .inputs
                .task(m)
                .compute_duration(&coalition, &self.inputs.planners, self.inputs.query_budget)
                .map_err(|failure| {
                    tracing::debug!(task = m, %failure, "task duration cannot be computed");
                    self.context.record_scheduling_failure();
                    SchedulerFailure::InfeasibleTransition
                })?;
            self.task_durations[m] = duration;
        }
        Ok(())
    }

    /// The duration of one robot's move between two configurations.
    ///
    /// Memoised pairs always use the oracle. Unmemoised pairs use the
    /// euclidean underestimate when transition heuristics are enabled and
    /// are planned for real, immediately, when they are not.
    fn seeded_duration(
        &self,
        robot_index: RobotIndex,
        from: &Configuration,
        to: &Configuration,
    ) -> (TransitionStatus, f32) {
        let robot = self.inputs.robot(robot_index);
        let use_heuristics = self.inputs.scheduler_parameters.compute_transition_heuristics;
        if use_heuristics && !self.inputs.oracle_memoised(robot, from, to) {
            let estimate = from.euclidean_distance(to) / robot.speed();
            return (TransitionStatus::Heuristic, estimate);
        }
        match self.inputs.oracle_length(robot, from, to) {
            Ok(length) => (TransitionStatus::Success, length / robot.speed()),
            Err(_) => (TransitionStatus::Failed, -1.0),
        }
    }

    fn seed_initial_transitions(&mut self) -> Result<(), SchedulerFailure> {
        for m in 0..self.inputs.num_tasks() {
            let to = self.inputs.task(m).initial_configuration;
            for slot in 0..self.initial_transitions[m].len() {
                let robot_index = self.initial_transitions[m][slot].robot;
                let from = self.inputs.robot(robot_index).initial_configuration;
                let (status, duration) = self.seeded_duration(robot_index, &from, &to);
                if status == TransitionStatus::Failed {
                    // The robot can never reach the task at all.
                    self.context.record_scheduling_failure();
                    return Err(SchedulerFailure::InfeasibleTransition);
                }
                let entry = &mut self.initial_transitions[m][slot];
                entry.status = status;
                entry.duration = duration;
            }
        }
        Ok(())
    }

    fn seed_transitions(&mut self) {
        for i in 0..self.inputs.num_tasks() {
            for j in 0..self.inputs.num_tasks() {
                if i == j {
                    continue;
                }
                let from = self.inputs.task(i).terminal_configuration;
                let to = self.inputs.task(j).initial_configuration;
                for slot in 0..self.transitions[i][j].len() {
                    let robot_index = self.transitions[i][j][slot].robot;
                    let (status, duration) = self.seeded_duration(robot_index, &from, &to);
                    let entry = &mut self.transitions[i][j][slot];
                    entry.status = status;
                    entry.duration = duration;
                }
            }
        }
    }

    /// The transition lower bound between two tasks: the slowest shared
    /// robot. `Err(())` when any shared robot's transition is impossible.
    fn transition_bound(&self, i: TaskIndex, j: TaskIndex) -> Result<f32, ()> {
        let mut bound = 0.0_f32;
        for entry in &self.transitions[i][j] {
            match entry.status {
                TransitionStatus::Failed => return Err(()),
                TransitionStatus::Heuristic | TransitionStatus::Success => {
                    bound = bound.max(entry.duration);
                }
                TransitionStatus::None => {}
            }
        }
        Ok(bound)
    }

    // ========================================================================
    // Model construction
    // ========================================================================

    /// A safe upper bound on any reasonable schedule: every task run
    /// serially with its worst incoming transition.
    fn horizon(&self) -> f64 {
        let mut horizon = 1.0_f64;
        for m in 0..self.inputs.num_tasks() {
            let worst_incoming = (0..self.inputs.num_tasks())
                .filter(|&i| i != m)
                .flat_map(|i| self.transitions[i][m].iter())
                .chain(self.initial_transitions[m].iter())
                .filter(|t| {
                    matches!(
                        t.status,
                        TransitionStatus::Heuristic | TransitionStatus::Success
                    )
                })
                .map(|t| t.duration)
                .fold(0.0_f32, f32::max);
            horizon += f64::from(self.task_durations[m]) + f64::from(worst_incoming);
        }
        horizon
    }

    fn build_model(
        &mut self,
        backend: &mut CpBackend,
    ) -> Result<(Vec<TaskVars>, VarId, Vec<MutexVar>), SchedulerFailure> {
        let num_tasks = self.inputs.num_tasks();
        let horizon = self.horizon();

        // Timepoint variables and duration constraints.
        let task_vars: Vec<TaskVars> = (0..num_tasks)
            .map(|m| {
                let start = backend.add_continuous_var(&format!("ts_{m}"), 0.0, horizon);
                let finish = backend.add_continuous_var(&format!("tf_{m}"), 0.0, horizon);
                backend.add_linear_constraint(
                    &[(finish, 1.0), (start, -1.0)],
                    ConstraintSense::Equal,
                    f64::from(self.task_durations[m]),
                    &format!("dc_{m}"),
                );
                TaskVars { start, finish }
            })
            .collect();

        // Declared precedence constraints.
        for &(pred, succ) in &self.inputs.precedence {
            let bound = self.transition_bound(pred, succ).map_err(|()| {
                tracing::debug!(pred, succ, "transition under a declared precedence failed");
                self.context.record_scheduling_failure();
                SchedulerFailure::InfeasibleTransition
            })?;
            backend.add_linear_constraint(
                &[(task_vars[succ].start, 1.0), (task_vars[pred].finish, -1.0)],
                ConstraintSense::GreaterOrEqual,
                f64::from(bound),
                &format!("pc_({pred},{succ})"),
            );
        }

        // Precedences the oracle forced in earlier iterations.
        for &(pred, succ) in &self.mp_induced {
            let bound = self.transition_bound(pred, succ).map_err(|()| {
                self.context.record_scheduling_failure();
                SchedulerFailure::InfeasibleTransition
            })?;
            backend.add_linear_constraint(
                &[(task_vars[succ].start, 1.0), (task_vars[pred].finish, -1.0)],
                ConstraintSense::GreaterOrEqual,
                f64::from(bound),
                &format!("mpc_({pred},{succ})"),
            );
        }

        // Mutex pairs: resolve oracle-forced directions, binaries for the rest.
        let mut mutex_vars = Vec::new();
        let mut still_open = Vec::new();
        for &(i, j) in &self.mutex_candidates {
            let i_to_j = self.transition_bound(i, j);
            let j_to_i = self.transition_bound(j, i);
            match (i_to_j, j_to_i) {
                (Err(()), Err(())) => {
                    // A robot allocated to both tasks cannot move either way.
                    tracing::debug!(i, j, "both mutex directions are impossible");
                    self.context.record_scheduling_failure();
                    return Err(SchedulerFailure::InfeasibleTransition);
                }
                (Err(()), Ok(bound)) => {
                    // i -> j impossible: j must precede i.
                    backend.add_linear_constraint(
                        &[(task_vars[i].start, 1.0), (task_vars[j].finish, -1.0)],
                        ConstraintSense::GreaterOrEqual,
                        f64::from(bound),
                        &format!("mpc_({j},{i})"),
                    );
                    self.mp_induced.insert((j, i));
                }
                (Ok(bound), Err(())) => {
                    backend.add_linear_constraint(
                        &[(task_vars[j].start, 1.0), (task_vars[i].finish, -1.0)],
                        ConstraintSense::GreaterOrEqual,
                        f64::from(bound),
                        &format!("mpc_({i},{j})"),
                    );
                    self.mp_induced.insert((i, j));
                }
                (Ok(i_to_j), Ok(j_to_i)) => {
                    let variable = backend.add_binary_var(&format!("p_({i},{j})"));
                    // p = 1: i runs first.
                    backend.add_indicator_constraint(
                        variable,
                        true,
                        &[(task_vars[j].start, 1.0), (task_vars[i].finish, -1.0)],
                        ConstraintSense::GreaterOrEqual,
                        f64::from(i_to_j),
                        &format!("tc_({i},{j})"),
                    );
                    // p = 0: j runs first.
                    backend.add_indicator_constraint(
                        variable,
                        false,
                        &[(task_vars[i].start, 1.0), (task_vars[j].finish, -1.0)],
                        ConstraintSense::GreaterOrEqual,
                        f64::from(j_to_i),
                        &format!("tc_({j},{i})"),
                    );
                    mutex_vars.push(MutexVar {
                        task_i: i,
                        task_j: j,
                        variable,
                    });
                    still_open.push((i, j));
                }
            }
        }
        self.mutex_candidates = still_open;

        // Initial transitions: a task cannot start before its whole
        // coalition has arrived.
        for (m, vars) in task_vars.iter().enumerate() {
            let earliest = self.initial_transitions[m]
                .iter()
                .filter(|t| {
                    matches!(
                        t.status,
                        TransitionStatus::Heuristic | TransitionStatus::Success
                    )
                })
                .map(|t| t.duration)
                .fold(0.0_f32, f32::max);
            backend.add_linear_constraint(
                &[(vars.start, 1.0)],
                ConstraintSense::GreaterOrEqual,
                f64::from(earliest),
                &format!("itc_{m}"),
            );
        }

        // Makespan and objective.
        let makespan = backend.add_continuous_var("makespan", 0.0, horizon);
        let finishes: Vec<VarId> = task_vars.iter().map(|v| v.finish).collect();
        backend.add_max_aggregate(makespan, &finishes);
        if self.inputs.scheduler_parameters.use_hierarchical_objective {
            let starts: Vec<(VarId, f64)> = task_vars.iter().map(|v| (v.start, 1.0)).collect();
            backend.set_hierarchical_objective(&[vec![(makespan, 1.0)], starts]);
        } else {
            backend.set_objective(&[(makespan, 1.0)], ObjectiveSense::Minimise);
        }

        Ok((task_vars, makespan, mutex_vars))
    }

    // ========================================================================
    // Lazy refinement
    // ========================================================================

    /// Tasks of the current solution in ascending start order
    fn realised_order(&self, backend: &CpBackend, task_vars: &[TaskVars]) -> Vec<TaskIndex> {
        let mut order: Vec<TaskIndex> = (0..self.inputs.num_tasks()).collect();
        order.sort_by(|&a, &b| {
            backend
                .value(task_vars[a].start)
                .partial_cmp(&backend.value(task_vars[b].start))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        order
    }

    /// Replace estimates on realised consecutive transitions with real
    /// oracle answers. Returns whether anything was upgraded.
    fn refine_transitions(
        &mut self,
        backend: &CpBackend,
        task_vars: &[TaskVars],
    ) -> Result<bool, SchedulerFailure> {
        let order = self.realised_order(backend, task_vars);
        let num_robots = self.inputs.num_robots();
        let mut previous_task: Vec<Option<TaskIndex>> = vec![None; num_robots];
        let mut previous_config: Vec<Configuration> = (0..num_robots)
            .map(|n| self.inputs.robot(n).initial_configuration)
            .collect();

        let mut refined = false;
        for &task in &order {
            let coalition = self.coalitions[task].clone();
            let arrival = self.inputs.task(task).initial_configuration;
            for robot_index in coalition {
                let slot_status = {
                    let table = match previous_task[robot_index] {
                        None => &self.initial_transitions[task],
                        Some(prev) => &self.transitions[prev][task],
                    };
                    table
                        .iter()
                        .find(|t| t.robot == robot_index)
                        .map(|t| t.status)
                };
                match slot_status {
                    Some(TransitionStatus::None | TransitionStatus::Heuristic) => {
                        let robot = self.inputs.robot(robot_index);
                        let length = self
                            .inputs
                            .oracle_length(robot, &previous_config[robot_index], &arrival)
                            .map_err(|failure| {
                                tracing::debug!(
                                    task,
                                    robot = robot_index,
                                    %failure,
                                    "realised transition cannot be planned"
                                );
                                self.context.record_scheduling_failure();
                                SchedulerFailure::InfeasibleTransition
                            })?;
                        let duration = length / robot.speed();
                        let table = match previous_task[robot_index] {
                            None => &mut self.initial_transitions[task],
                            Some(prev) => &mut self.transitions[prev][task],
                        };
                        if let Some(entry) = table.iter_mut().find(|t| t.robot == robot_index) {
                            entry.status = TransitionStatus::Success;
                            entry.duration = duration;
                        }
                        refined = true;
                    }
                    Some(TransitionStatus::Failed) => {
                        // A failed pair can never be realised: the model
                        // ordered around it or already gave up.
                        self.context.record_scheduling_failure();
                        return Err(SchedulerFailure::InfeasibleTransition);
                    }
                    Some(TransitionStatus::Success) | None => {}
                }
                previous_config[robot_index] = self.inputs.task(task).terminal_configuration;
                previous_task[robot_index] = Some(task);
            }
        }
        Ok(refined)
    }

    // ========================================================================
    // Schedule extraction
    // ========================================================================

    fn mutex_decisions(&self, backend: &CpBackend, mutex_vars: &[MutexVar]) -> Vec<(TaskIndex, TaskIndex)> {
        let mut decisions: Vec<(TaskIndex, TaskIndex)> = mutex_vars
            .iter()
            .map(|mv| {
                if backend.value(mv.variable) > 0.5 {
                    (mv.task_i, mv.task_j)
                } else {
                    (mv.task_j, mv.task_i)
                }
            })
            .collect();
        decisions.extend(self.mp_induced.iter().copied());
        decisions
    }

    fn extract_schedule(
        &self,
        backend: &CpBackend,
        task_vars: &[TaskVars],
        makespan: VarId,
        mutex_vars: &[MutexVar],
    ) -> Schedule {
        let timepoints = task_vars
            .iter()
            .map(|vars| {
                (
                    backend.value(vars.start) as f32,
                    backend.value(vars.finish) as f32,
                )
            })
            .collect();
        Schedule {
            makespan: backend.value(makespan) as f32,
            timepoints,
            precedence_set_mutex_constraints: self.mutex_decisions(backend, mutex_vars),
        }
    }

    /// Quick-variant extraction: keep the MILP's ordering decisions but walk
    /// the realised robot chains with real transitions, pushing starts
    /// forward where the estimates were optimistic.
    fn patch_quick_schedule(
        &mut self,
        backend: &CpBackend,
        task_vars: &[TaskVars],
        mutex_vars: &[MutexVar],
    ) -> Result<Schedule, SchedulerFailure> {
        let order = self.realised_order(backend, task_vars);
        let num_robots = self.inputs.num_robots();
        let mut previous_task: Vec<Option<TaskIndex>> = vec![None; num_robots];
        let mut previous_config: Vec<Configuration> = (0..num_robots)
            .map(|n| self.inputs.robot(n).initial_configuration)
            .collect();

        let mut timepoints: Vec<(f32, f32)> = task_vars
            .iter()
            .map(|vars| {
                (
                    backend.value(vars.start) as f32,
                    backend.value(vars.finish) as f32,
                )
            })
            .collect();

        for &task in &order {
            let arrival = self.inputs.task(task).initial_configuration;
            let mut start = timepoints[task].0;
            for &robot_index in &self.coalitions[task].clone() {
                let robot = self.inputs.robot(robot_index);
                let length = self
                    .inputs
                    .oracle_length(robot, &previous_config[robot_index], &arrival)
                    .map_err(|_| {
                        self.context.record_scheduling_failure();
                        SchedulerFailure::InfeasibleTransition
                    })?;
                let transition = length / robot.speed();
                let available = match previous_task[robot_index] {
                    None => transition,
                    Some(prev) => timepoints[prev].1 + transition,
                };
                start = start.max(available);
                previous_config[robot_index] = self.inputs.task(task).terminal_configuration;
                previous_task[robot_index] = Some(task);
            }
            timepoints[task] = (start, start + self.task_durations[task]);
        }

        let makespan = timepoints.iter().map(|&(_, f)| f).fold(0.0_f32, f32::max);
        Ok(Schedule {
            makespan,
            timepoints,
            precedence_set_mutex_constraints: self.mutex_decisions(backend, mutex_vars),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stas_core::{
        Configuration, Environment, MemoisingOracle, OracleFailure, ProblemBuilder, Species,
    };
    use std::sync::Arc;

    fn origin() -> Configuration {
        Configuration::se2(0.0, 0.0, 0.0)
    }

    fn worker() -> Arc<Species> {
        Arc::new(Species::new("worker", vec![1.0], 0.5, 1.0, 0))
    }

    #[test]
    fn single_task_single_robot() {
        let inputs = ProblemBuilder::new()
            .species(worker())
            .robot("r0", worker(), origin())
            .task("only", 1.0, vec![1.0], origin(), origin())
            .alpha(1.0)
            .makespan_bounds(1.0, 1.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(1, 1);
        let context = SolverContext::default();

        let schedule = MilpScheduler::new(&inputs, &context, &allocation)
            .solve()
            .unwrap();
        assert!((schedule.makespan - 1.0).abs() < 1e-3);
        assert!((schedule.timepoints[0].0 - 0.0).abs() < 1e-3);
        assert!((schedule.timepoints[0].1 - 1.0).abs() < 1e-3);
        assert_eq!(context.scheduling_iterations(), 1);
        // Everything is co-located: no oracle calls at all.
        assert_eq!(inputs.motion_plans_computed(), 0);
    }

    #[test]
    fn strict_precedence_chain() {
        let inputs = ProblemBuilder::new()
            .species(worker())
            .robot("r0", worker(), origin())
            .task("first", 1.0, vec![1.0], origin(), origin())
            .task("second", 1.0, vec![1.0], origin(), origin())
            .precedence(0, 1)
            .makespan_bounds(2.0, 4.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(2, 1);
        let context = SolverContext::default();

        let schedule = MilpScheduler::new(&inputs, &context, &allocation)
            .solve()
            .unwrap();
        assert!((schedule.timepoints[0].0 - 0.0).abs() < 1e-3);
        assert!((schedule.timepoints[0].1 - 1.0).abs() < 1e-3);
        assert!(schedule.timepoints[1].0 >= 1.0 - 1e-3);
        assert!(schedule.timepoints[1].1 >= 2.0 - 1e-3);
        assert!((schedule.makespan - 2.0).abs() < 1e-3);
        // The declared precedence removes the pair from the mutex set.
        assert!(schedule.precedence_set_mutex_constraints.is_empty());
    }

    #[test]
    fn mutex_pair_orders_shared_robot() {
        let a = Configuration::se2(0.0, 0.0, 0.0);
        let b = Configuration::se2(3.0, 0.0, 0.0);
        let inputs = ProblemBuilder::new()
            .species(worker())
            .robot("r0", worker(), a)
            .task("here", 1.0, vec![1.0], a, a)
            .task("there", 1.0, vec![1.0], b, b)
            .makespan_bounds(0.0, 10.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(2, 1);
        let context = SolverContext::default();

        let schedule = MilpScheduler::new(&inputs, &context, &allocation)
            .solve()
            .unwrap();
        // One mutex decision, and the tasks cannot overlap.
        assert_eq!(schedule.precedence_set_mutex_constraints.len(), 1);
        let (first, second) = schedule.precedence_set_mutex_constraints[0];
        assert!(
            schedule.timepoints[second].0 >= schedule.timepoints[first].1 - 1e-3,
            "mutex order violated"
        );
        // Starting at the co-located task is cheaper.
        assert_eq!((first, second), (0, 1));
        // 1.0 (here) + 3.0 travel + 1.0 (there)
        assert!((schedule.makespan - 5.0).abs() < 1e-3);
    }

    #[test]
    fn oracle_failure_in_one_direction_forces_precedence() {
        let a = Configuration::se2(0.0, 0.0, 0.0);
        let b = Configuration::se2(2.0, 0.0, 0.0);
        let oracle = Arc::new(MemoisingOracle::new(Environment::OpenSpace));
        // Going back from task 1 to task 0 is impossible; 0 -> 1 costs 10.
        oracle.seed(0.5, b, a, Err(OracleFailure::Unreachable));
        oracle.seed(0.5, a, b, Ok(10.0));

        let inputs = ProblemBuilder::new()
            .planner(oracle)
            .species(worker())
            .robot("r0", worker(), a)
            .task("alpha", 1.0, vec![1.0], a, a)
            .task("beta", 1.0, vec![1.0], b, b)
            .makespan_bounds(0.0, 20.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(2, 1);
        let context = SolverContext::default();

        let mut scheduler = MilpScheduler::new(&inputs, &context, &allocation);
        let schedule = scheduler.solve().unwrap();
        // No binary was created; the order was forced 0 -> 1.
        assert_eq!(schedule.precedence_set_mutex_constraints, vec![(0, 1)]);
        assert!(schedule.timepoints[1].0 >= schedule.timepoints[0].1 + 10.0 - 1e-3);
    }

    #[test]
    fn oracle_failure_in_both_directions_is_fatal() {
        let a = Configuration::se2(0.0, 0.0, 0.0);
        let b = Configuration::se2(2.0, 0.0, 0.0);
        let oracle = Arc::new(MemoisingOracle::new(Environment::OpenSpace));
        oracle.seed(0.5, b, a, Err(OracleFailure::Unreachable));
        oracle.seed(0.5, a, b, Err(OracleFailure::Unreachable));

        let inputs = ProblemBuilder::new()
            .planner(oracle)
            .species(worker())
            .robot("r0", worker(), a)
            .task("alpha", 1.0, vec![1.0], a, a)
            .task("beta", 1.0, vec![1.0], b, b)
            .makespan_bounds(0.0, 20.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(2, 1);
        let context = SolverContext::default();

        let result = MilpScheduler::new(&inputs, &context, &allocation).solve();
        assert_eq!(result, Err(SchedulerFailure::InfeasibleTransition));
        assert_eq!(context.scheduling_failures(), 1);
    }

    #[test]
    fn refinement_upgrades_heuristic_transitions() {
        // Travel between distinct, unmemoised configurations forces at
        // least one refinement round before convergence.
        let a = Configuration::se2(0.0, 0.0, 0.0);
        let b = Configuration::se2(4.0, 0.0, 0.0);
        let inputs = ProblemBuilder::new()
            .species(worker())
            .robot("r0", worker(), a)
            .task("near", 1.0, vec![1.0], a, a)
            .task("far", 1.0, vec![1.0], b, b)
            .makespan_bounds(0.0, 20.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(2, 1);
        let context = SolverContext::default();

        let schedule = MilpScheduler::new(&inputs, &context, &allocation)
            .solve()
            .unwrap();
        assert!(context.scheduling_iterations() >= 2);
        assert!(inputs.motion_plans_computed() > 0);
        // In open space the heuristic equals the real length, so the
        // makespan is the serial chain: 1 + 4 + 1.
        assert!((schedule.makespan - 6.0).abs() < 1e-3);
    }

    #[test]
    fn disabled_heuristics_plan_transitions_eagerly() {
        // Three sites in a line, one robot, no heuristic seeding: every
        // transition is planned for real before the first solve, so the
        // model converges in a single iteration on true bounds.
        let a = Configuration::se2(0.0, 0.0, 0.0);
        let b = Configuration::se2(3.0, 0.0, 0.0);
        let c = Configuration::se2(6.0, 0.0, 0.0);
        let inputs = ProblemBuilder::new()
            .species(worker())
            .robot("r0", worker(), a)
            .task("at-a", 1.0, vec![1.0], a, a)
            .task("at-b", 1.0, vec![1.0], b, b)
            .task("at-c", 1.0, vec![1.0], c, c)
            .scheduler_parameters(stas_core::SchedulerParameters {
                compute_transition_heuristics: false,
                ..stas_core::SchedulerParameters::default()
            })
            .makespan_bounds(0.0, 30.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(3, 1);
        let context = SolverContext::default();

        let schedule = MilpScheduler::new(&inputs, &context, &allocation)
            .solve()
            .unwrap();
        // Serial sweep down the line: 1 + 3 + 1 + 3 + 1.
        assert!((schedule.makespan - 9.0).abs() < 1e-3);
        assert_eq!(context.scheduling_iterations(), 1);
        // All six ordered site pairs were planned up front.
        assert!(inputs.motion_plans_computed() >= 6);
        // Non-adjacent pairs carry real bounds too: whichever task runs
        // between the other two, its neighbours stay fully separated.
        for &(first, second) in &schedule.precedence_set_mutex_constraints {
            assert!(
                schedule.timepoints[second].0 >= schedule.timepoints[first].1 - 1e-3,
                "mutex decision ({first}, {second}) violated"
            );
        }
    }

    #[test]
    fn disabled_heuristics_still_force_mp_induced_precedence() {
        let a = Configuration::se2(0.0, 0.0, 0.0);
        let b = Configuration::se2(2.0, 0.0, 0.0);
        let oracle = Arc::new(MemoisingOracle::new(Environment::OpenSpace));
        oracle.seed(0.5, b, a, Err(OracleFailure::Unreachable));
        oracle.seed(0.5, a, b, Ok(10.0));

        let inputs = ProblemBuilder::new()
            .planner(oracle)
            .species(worker())
            .robot("r0", worker(), a)
            .task("alpha", 1.0, vec![1.0], a, a)
            .task("beta", 1.0, vec![1.0], b, b)
            .scheduler_parameters(stas_core::SchedulerParameters {
                compute_transition_heuristics: false,
                ..stas_core::SchedulerParameters::default()
            })
            .makespan_bounds(0.0, 20.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(2, 1);
        let context = SolverContext::default();

        let schedule = MilpScheduler::new(&inputs, &context, &allocation)
            .solve()
            .unwrap();
        // The impossible return leg still forces the 0 -> 1 ordering.
        assert_eq!(schedule.precedence_set_mutex_constraints, vec![(0, 1)]);
        assert!(schedule.timepoints[1].0 >= schedule.timepoints[0].1 + 10.0 - 1e-3);
        assert_eq!(context.scheduling_iterations(), 1);
    }

    #[test]
    fn quick_variant_matches_ordering_decisions() {
        let a = Configuration::se2(0.0, 0.0, 0.0);
        let b = Configuration::se2(3.0, 0.0, 0.0);
        let inputs = ProblemBuilder::new()
            .species(worker())
            .robot("r0", worker(), a)
            .task("here", 1.0, vec![1.0], a, a)
            .task("there", 1.0, vec![1.0], b, b)
            .makespan_bounds(0.0, 10.0)
            .build()
            .unwrap();
        let allocation = Matrix::ones(2, 1);
        let context = SolverContext::default();

        let quick = MilpScheduler::new(&inputs, &context, &allocation)
            .solve_quick()
            .unwrap();
        assert_eq!(quick.precedence_set_mutex_constraints.len(), 1);
        // The patched schedule still respects the realised transition.
        let (first, second) = quick.precedence_set_mutex_constraints[0];
        assert!(quick.timepoints[second].0 >= quick.timepoints[first].1 - 1e-3);
        assert!((quick.makespan - 5.0).abs() < 1e-3);
    }

    #[test]
    fn disjoint_coalitions_run_in_parallel() {
        let species = worker();
        let inputs = ProblemBuilder::new()
            .species(species.clone())
            .robot("r0", species.clone(), origin())
            .robot("r1", species, origin())
            .task("left", 2.0, vec![1.0], origin(), origin())
            .task("right", 2.0, vec![1.0], origin(), origin())
            .makespan_bounds(0.0, 10.0)
            .build()
            .unwrap();
        let mut allocation = Matrix::zeros(2, 2);
        allocation.set(0, 0, 1.0);
        allocation.set(1, 1, 1.0);
        let context = SolverContext::default();

        let schedule = MilpScheduler::new(&inputs, &context, &allocation)
            .solve()
            .unwrap();
        assert!((schedule.makespan - 2.0).abs() < 1e-3);
        assert!(schedule.precedence_set_mutex_constraints.is_empty());
    }
}
