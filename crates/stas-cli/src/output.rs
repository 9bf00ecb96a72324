//! Solution document emission
//!
//! Mirrors the problem document: the winning allocation, per-task
//! timepoints and coalitions, per-robot ordered plans with transition
//! records, and the search statistics block.

use crate::input::ConfigurationDoc;
use serde::{Deserialize, Serialize};
use stas_core::ProblemInputs;
use stas_solver::{SearchOutcome, SearchSolution};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskOut {
    pub id: usize,
    pub name: String,
    pub start: f32,
    pub finish: f32,
    pub coalition: Vec<usize>,
    pub execution_motion_plan: MotionPlanOut,
}

/// The in-task move from the initial to the terminal configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotionPlanOut {
    pub start_configuration: ConfigurationDoc,
    pub end_configuration: ConfigurationDoc,
    /// Motion share of the task duration (total minus static work)
    pub duration: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_task: Option<usize>,
    pub to_task: usize,
    pub duration: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobotOut {
    pub id: usize,
    pub name: String,
    /// Task ids in execution order
    pub individual_plan: Vec<usize>,
    pub transitions: Vec<TransitionOut>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatisticsOut {
    pub nodes_generated: usize,
    pub nodes_expanded: usize,
    pub nodes_evaluated: usize,
    pub nodes_pruned: usize,
    pub nodes_deadend: usize,
    pub total_time: f32,
    pub task_allocation_time: f32,
    pub scheduling_time: f32,
    pub motion_planning_time: f32,
    pub num_motion_plans: usize,
    pub num_motion_plan_failures: usize,
    pub num_scheduling_failures: usize,
    pub num_scheduling_iterations: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolutionDoc {
    pub allocation: Vec<Vec<u8>>,
    pub makespan: f32,
    pub tasks: Vec<TaskOut>,
    pub robots: Vec<RobotOut>,
    pub precedence_constraints: Vec<(usize, usize)>,
    pub precedence_set_mutex_constraints: Vec<(usize, usize)>,
    pub statistics: StatisticsOut,
}

impl SolutionDoc {
    pub fn build(
        inputs: &ProblemInputs,
        solution: &SearchSolution,
        outcome: &SearchOutcome,
        num_scheduling_failures: usize,
        num_scheduling_iterations: usize,
    ) -> Self {
        let schedule = &solution.schedule;
        let allocation: Vec<Vec<u8>> = (0..inputs.num_tasks())
            .map(|m| {
                (0..inputs.num_robots())
                    .map(|n| u8::from(solution.allocation.get(m, n) != 0.0))
                    .collect()
            })
            .collect();

        // Per-robot plans ordered by realised start time.
        let mut individual_plans: Vec<Vec<usize>> = vec![Vec::new(); inputs.num_robots()];
        let mut task_order: Vec<usize> = (0..inputs.num_tasks()).collect();
        task_order.sort_by(|&a, &b| {
            schedule.timepoints[a]
                .0
                .partial_cmp(&schedule.timepoints[b].0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        for &task in &task_order {
            for robot in 0..inputs.num_robots() {
                if solution.allocation.get(task, robot) != 0.0 {
                    individual_plans[robot].push(task);
                }
            }
        }

        let tasks = (0..inputs.num_tasks())
            .map(|m| {
                let task = inputs.task(m);
                let coalition: Vec<usize> = (0..inputs.num_robots())
                    .filter(|&n| solution.allocation.get(m, n) != 0.0)
                    .collect();
                let (start, finish) = schedule.timepoints[m];
                let motion = (finish - start - task.static_duration).max(0.0);
                TaskOut {
                    id: m,
                    name: task.name.clone(),
                    start,
                    finish,
                    coalition,
                    execution_motion_plan: MotionPlanOut {
                        start_configuration: (&task.initial_configuration).into(),
                        end_configuration: (&task.terminal_configuration).into(),
                        duration: motion,
                    },
                }
            })
            .collect();

        let robots = (0..inputs.num_robots())
            .map(|n| {
                let robot = inputs.robot(n);
                let plan = &individual_plans[n];
                let mut transitions = Vec::with_capacity(plan.len());
                let mut previous: Option<usize> = None;
                let mut from_config = robot.initial_configuration;
                for &task in plan {
                    let to_config = inputs.task(task).initial_configuration;
                    // Realised transitions were planned during scheduling,
                    // so this is a cache hit; fall back to the euclidean
                    // estimate if it somehow is not.
                    let duration = inputs
                        .oracle_length(robot, &from_config, &to_config)
                        .map_or_else(
                            |_| from_config.euclidean_distance(&to_config) / robot.speed(),
                            |length| length / robot.speed(),
                        );
                    transitions.push(TransitionOut {
                        from_task: previous,
                        to_task: task,
                        duration,
                    });
                    previous = Some(task);
                    from_config = inputs.task(task).terminal_configuration;
                }
                RobotOut {
                    id: n,
                    name: robot.name.clone(),
                    individual_plan: plan.clone(),
                    transitions,
                }
            })
            .collect();

        let stats = &outcome.statistics;
        Self {
            allocation,
            makespan: schedule.makespan,
            tasks,
            robots,
            precedence_constraints: inputs.precedence.clone(),
            precedence_set_mutex_constraints: schedule.precedence_set_mutex_constraints.clone(),
            statistics: StatisticsOut {
                nodes_generated: stats.nodes_generated,
                nodes_expanded: stats.nodes_expanded,
                nodes_evaluated: stats.nodes_evaluated,
                nodes_pruned: stats.nodes_pruned,
                nodes_deadend: stats.nodes_deadend,
                total_time: stats.total_time.as_secs_f32(),
                task_allocation_time: stats.task_allocation_time.as_secs_f32(),
                scheduling_time: stats.scheduling_time.as_secs_f32(),
                motion_planning_time: stats.motion_planning_time.as_secs_f32(),
                num_motion_plans: inputs.motion_plans_computed(),
                num_motion_plan_failures: inputs.motion_plan_failures(),
                num_scheduling_failures,
                num_scheduling_iterations,
            },
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
