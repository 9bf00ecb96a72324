//! Search repair after incremental problem changes
//!
//! A finished (or timed-out) search holds open, closed and pruned sets that
//! are far cheaper to refresh than to rebuild. `repair` swaps in new
//! problem inputs, diffs them against the old ones into an explicit change
//! delta, and then:
//!
//! - drops every node whose path assigns a robot that no longer exists,
//!   remapping the survivors onto the new robot columns,
//! - re-injects the previous best solution into the open queue, so the
//!   repaired search can only match or improve it,
//! - marks APRs and NSQs stale per the delta and refreshes open-queue
//!   entries (NSQ by a cheap schedule patch where possible, full MILP
//!   otherwise),
//! - promotes closed and pruned nodes that became goals when coverage
//!   improved,
//! - spawns fresh root children for every (task, new-robot) pair,
//! - resumes the ordinary search loop.
//!
//! Tasks may be appended but not removed or reordered; a mismatched task
//! list degenerates into a fresh search from the new inputs.

use crate::context::SolverContext;
use crate::heuristics::is_goal;
use crate::node::{allocation_hash, AllocationNode, NodeStatus};
use crate::search::{Archives, ItagsSearch, NodeRecord, SearchOutcome};
use stas_core::{
    Assignment, Matrix, MutablePriorityQueue, ProblemInputs, RobotIndex, Schedule, TaskIndex,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What changed between two problem versions, derived by diffing
#[derive(Clone, Debug, Default)]
pub struct ProblemDelta {
    /// Robot indices of the old problem that no longer exist
    pub lost_robots: Vec<RobotIndex>,
    /// Old robot index -> new robot index for survivors
    pub robot_remap: HashMap<RobotIndex, RobotIndex>,
    /// New-problem indices of robots that did not exist before
    pub new_robots: Vec<RobotIndex>,
    pub tasks_added: bool,
    /// Desired traits dropped or team traits rose: closed nodes may be goals
    pub coverage_improved: bool,
    /// Desired traits rose or team traits dropped: open APRs are stale
    pub coverage_worsened: bool,
    /// Durations, precedence or the map changed: NSQs are stale
    pub schedules_stale: bool,
    /// The task list is not an extension of the old one
    pub incompatible: bool,
}

impl ProblemDelta {
    /// Diff two problem versions. Robots are matched by name; tasks must
    /// keep their order and may only be appended.
    pub fn between(old: &ProblemInputs, new: &ProblemInputs, map_changed: bool) -> Self {
        let mut delta = Self::default();

        // Task lists: the old must be a prefix of the new.
        if old.num_tasks() > new.num_tasks()
            || !old
                .tasks
                .iter()
                .zip(&new.tasks)
                .all(|(a, b)| a.name == b.name)
        {
            delta.incompatible = true;
            return delta;
        }
        delta.tasks_added = new.num_tasks() > old.num_tasks();

        // Robots matched by name.
        let new_by_name: HashMap<&str, RobotIndex> = new
            .robots
            .iter()
            .enumerate()
            .map(|(index, robot)| (robot.name.as_str(), index))
            .collect();
        let mut matched_new: HashSet<RobotIndex> = HashSet::new();
        for (old_index, robot) in old.robots.iter().enumerate() {
            match new_by_name.get(robot.name.as_str()) {
                Some(&new_index) => {
                    delta.robot_remap.insert(old_index, new_index);
                    matched_new.insert(new_index);
                }
                None => delta.lost_robots.push(old_index),
            }
        }
        delta.new_robots = (0..new.num_robots())
            .filter(|index| !matched_new.contains(index))
            .collect();

        // Coverage direction over the matched prefix.
        for m in 0..old.num_tasks() {
            for t in 0..old.num_traits().min(new.num_traits()) {
                let before = old.desired_traits.get(m, t);
                let after = new.desired_traits.get(m, t);
                if after < before {
                    delta.coverage_improved = true;
                } else if after > before {
                    delta.coverage_worsened = true;
                }
            }
        }
        for (&old_index, &new_index) in &delta.robot_remap {
            for t in 0..old.num_traits().min(new.num_traits()) {
                let before = old.team_traits.get(old_index, t);
                let after = new.team_traits.get(new_index, t);
                if after > before {
                    delta.coverage_improved = true;
                } else if after < before {
                    delta.coverage_worsened = true;
                }
            }
        }
        if delta.tasks_added {
            delta.coverage_worsened = true;
        }
        if !delta.lost_robots.is_empty() {
            delta.coverage_worsened = true;
        }
        if !delta.new_robots.is_empty() {
            delta.coverage_improved = true;
        }

        // Schedule staleness.
        let durations_changed = old
            .tasks
            .iter()
            .zip(&new.tasks)
            .any(|(a, b)| a.static_duration != b.static_duration);
        let precedence_changed = {
            let old_set: HashSet<_> = old.precedence.iter().copied().collect();
            let new_set: HashSet<_> = new.precedence.iter().copied().collect();
            old_set != new_set
        };
        delta.schedules_stale = durations_changed
            || precedence_changed
            || map_changed
            || delta.tasks_added
            || !delta.lost_robots.is_empty();

        delta
    }
}

impl ItagsSearch {
    /// Fully independent duplicate of this search state
    pub fn deep_copy(&self) -> Self {
        Self {
            inputs: Arc::clone(&self.inputs),
            context: Arc::new(SolverContext::new()),
            open: self.open.clone(),
            closed_ids: self.closed_ids.clone(),
            pruned_ids: self.pruned_ids.clone(),
            closed: self.closed.clone(),
            pruned: self.pruned.clone(),
            shared_archives: self.shared_archives.clone(),
            root: Arc::clone(&self.root),
            statistics: self.statistics.clone(),
            best_solution: self.best_solution.clone(),
            use_quick_nsq: self.use_quick_nsq,
        }
    }

    /// Cheap duplicate sharing this search's closed and pruned records.
    ///
    /// The records are frozen into a shared archive both searches read
    /// through, so the copy stays valid however long it outlives its
    /// parent.
    pub fn shallow_copy(&mut self) -> Self {
        if !self.closed.is_empty() || !self.pruned.is_empty() {
            let archive = Archives {
                closed: std::mem::take(&mut self.closed),
                pruned: std::mem::take(&mut self.pruned),
                parent: self.shared_archives.take(),
            };
            self.shared_archives = Some(Arc::new(archive));
        }
        Self {
            inputs: Arc::clone(&self.inputs),
            context: Arc::new(SolverContext::new()),
            open: self.open.clone(),
            closed_ids: self.closed_ids.clone(),
            pruned_ids: self.pruned_ids.clone(),
            closed: Vec::new(),
            pruned: Vec::new(),
            shared_archives: self.shared_archives.clone(),
            root: Arc::clone(&self.root),
            statistics: self.statistics.clone(),
            best_solution: self.best_solution.clone(),
            use_quick_nsq: self.use_quick_nsq,
        }
    }

    /// Every retired record reachable from this search: its own sets plus
    /// the shared archive chain.
    fn archived_records(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = Vec::new();
        records.extend(self.closed.iter().cloned());
        records.extend(self.pruned.iter().cloned());
        let mut archive = self.shared_archives.clone();
        while let Some(current) = archive {
            records.extend(current.closed.iter().cloned());
            records.extend(current.pruned.iter().cloned());
            archive = current.parent.clone();
        }
        records
    }

    /// Swap in changed problem inputs, refresh the retained state, and
    /// resume the search.
    pub fn repair(&mut self, new_inputs: Arc<ProblemInputs>, map_changed: bool) -> SearchOutcome {
        let old_inputs = std::mem::replace(&mut self.inputs, new_inputs);
        let delta = ProblemDelta::between(&old_inputs, &self.inputs, map_changed);

        if delta.incompatible {
            tracing::warn!("task list changed shape; repairing by fresh search");
            self.reset();
            return self.search();
        }

        // A changed map invalidates every cached motion plan.
        if map_changed {
            for planner in &self.inputs.planners {
                planner.invalidate();
            }
        }

        // New dimensions take effect at the root.
        self.root = AllocationNode::root(self.inputs.num_tasks(), self.inputs.num_robots());

        let needs_rebuild = self.inputs.num_tasks() != old_inputs.num_tasks()
            || self.inputs.num_robots() != old_inputs.num_robots()
            || !delta.lost_robots.is_empty();

        // Collect the retained state and rebuild it against the new
        // problem: survivors are remapped, the rest dropped.
        let open_entries: Vec<NodeRecord> = std::mem::take(&mut self.open)
            .into_sorted()
            .into_iter()
            .map(|(_, _, record)| record)
            .collect();
        let archived = self.archived_records();
        self.closed.clear();
        self.pruned.clear();
        self.shared_archives = None;
        self.closed_ids.clear();
        self.pruned_ids.clear();

        let mut reinjected: HashSet<u64> = HashSet::new();

        // Previous best solution first: the repaired search can only match
        // or improve it.
        if let Some(best) = self.best_solution.take() {
            if let Some(mut record) = self.rebuild_record(&best, &delta, needs_rebuild) {
                self.mark_stale(&mut record, &delta);
                self.refresh_record(&mut record);
                record.status = NodeStatus::Open;
                reinjected.insert(record.hash);
                self.open.push(record.hash, record.priority(), record);
            }
        }

        // Open queue survivors.
        for record in open_entries {
            let Some(mut record) = self.rebuild_record(&record, &delta, needs_rebuild) else {
                continue;
            };
            if reinjected.contains(&record.hash) {
                continue;
            }
            self.mark_stale(&mut record, &delta);
            self.refresh_record(&mut record);
            record.status = NodeStatus::Open;
            reinjected.insert(record.hash);
            self.open.push(record.hash, record.priority(), record);
        }

        // Closed and pruned survivors: retire again, but promote any that
        // became goals now that coverage improved.
        for record in archived {
            let was_pruned = record.status == NodeStatus::Pruned;
            let Some(mut record) = self.rebuild_record(&record, &delta, needs_rebuild) else {
                continue;
            };
            if reinjected.contains(&record.hash) {
                continue;
            }
            self.mark_stale(&mut record, &delta);
            if delta.coverage_improved && is_goal(&self.inputs, &record.allocation) {
                self.refresh_record(&mut record);
                record.status = NodeStatus::Open;
                reinjected.insert(record.hash);
                self.open.push(record.hash, record.priority(), record);
                continue;
            }
            if was_pruned {
                self.pruned_ids.insert(record.hash);
                if self.inputs.search_parameters.save_pruned_nodes {
                    self.pruned.push(record);
                }
            } else {
                self.closed_ids.insert(record.hash);
                if self.inputs.search_parameters.save_closed_nodes {
                    self.closed.push(record);
                }
            }
        }

        // Fresh columns: seed single-assignment children for each new robot.
        if !delta.new_robots.is_empty() {
            let root_record = NodeRecord::unevaluated(Arc::clone(&self.root));
            for &robot in &delta.new_robots {
                for task in 0..self.inputs.num_tasks() {
                    let assignment = Assignment { task, robot };
                    let node = AllocationNode::child(&self.root, assignment);
                    let mut allocation = root_record.allocation.clone();
                    allocation.set(task, robot, 1.0);
                    let hash = allocation_hash(&allocation);
                    if self.closed_ids.contains(&hash)
                        || self.pruned_ids.contains(&hash)
                        || self.open.contains(&hash)
                    {
                        continue;
                    }
                    self.statistics.nodes_generated += 1;
                    let mut record = NodeRecord {
                        node,
                        allocation,
                        hash,
                        status: NodeStatus::New,
                        apr: None,
                        nsq: None,
                        tetaq: None,
                        schedule: None,
                        apr_stale: false,
                        nsq_stale: false,
                    };
                    self.evaluate_record(&mut record);
                    record.status = NodeStatus::Open;
                    self.open.push(hash, record.priority(), record);
                }
            }
        }

        if self.open.is_empty() {
            self.push_root();
        }

        self.search()
    }

    fn reset(&mut self) {
        self.open = MutablePriorityQueue::new();
        self.closed_ids.clear();
        self.pruned_ids.clear();
        self.closed.clear();
        self.pruned.clear();
        self.shared_archives = None;
        self.best_solution = None;
        self.root = AllocationNode::root(self.inputs.num_tasks(), self.inputs.num_robots());
        self.push_root();
    }

    /// Rebuild one record against the new problem dimensions. `None` when
    /// the node's path touches a lost robot.
    fn rebuild_record(
        &self,
        record: &NodeRecord,
        delta: &ProblemDelta,
        needs_rebuild: bool,
    ) -> Option<NodeRecord> {
        if record.node.touches_robot(&delta.lost_robots) {
            return None;
        }
        if !needs_rebuild {
            return Some(record.clone());
        }

        // Replay the assignment path onto the new root with remapped
        // robot columns (oldest first so the chain reads naturally).
        let mut node = Arc::clone(&self.root);
        let mut assignments = record.node.assignments();
        assignments.reverse();
        for assignment in assignments {
            let robot = *delta.robot_remap.get(&assignment.robot)?;
            node = AllocationNode::child(
                &node,
                Assignment {
                    task: assignment.task,
                    robot,
                },
            );
        }
        let mut rebuilt = NodeRecord::unevaluated(node);
        rebuilt.status = record.status;
        rebuilt.apr = record.apr;
        rebuilt.nsq = record.nsq;
        rebuilt.tetaq = record.tetaq;
        rebuilt.schedule = record.schedule.clone();
        rebuilt.apr_stale = record.apr_stale;
        rebuilt.nsq_stale = record.nsq_stale;
        Some(rebuilt)
    }

    fn mark_stale(&self, record: &mut NodeRecord, delta: &ProblemDelta) {
        if delta.coverage_improved || delta.coverage_worsened {
            record.apr_stale = true;
        }
        if delta.schedules_stale {
            record.nsq_stale = true;
        }
    }

    /// Refresh a stale record in place: APR from cheap algebra, NSQ by a
    /// schedule patch when possible and the full evaluator otherwise.
    fn refresh_record(&mut self, record: &mut NodeRecord) {
        if !record.apr_stale && !record.nsq_stale && record.tetaq.is_some() {
            return;
        }
        if record.nsq_stale {
            if let Some(old_schedule) = record.schedule.take() {
                if let Some(patched) =
                    patch_schedule(&self.inputs, &record.allocation, &old_schedule)
                {
                    let denominator = self.inputs.schedule_worst_makespan
                        - self.inputs.schedule_best_makespan;
                    let nsq = if denominator > 0.0 {
                        (patched.makespan - self.inputs.schedule_best_makespan) / denominator
                    } else {
                        0.0
                    };
                    let evaluator = crate::heuristics::Tetaq::new(&self.inputs, &self.context);
                    let apr = evaluator.apr(&record.allocation);
                    record.apr = Some(apr);
                    record.nsq = Some(nsq);
                    record.tetaq =
                        Some(self.inputs.alpha * apr + (1.0 - self.inputs.alpha) * nsq);
                    record.schedule = Some(patched);
                    record.apr_stale = false;
                    record.nsq_stale = false;
                    return;
                }
            }
        }
        self.evaluate_record(record);
    }
}

/// Shift an existing schedule onto changed durations without re-solving the
/// MILP: keep the realised task order, recompute durations, and push starts
/// forward along declared precedences and per-robot chains. O(tasks²).
///
/// Returns `None` when the old ordering cannot be replayed (a declared
/// predecessor now sorts later, an oracle query fails, or the schedule does
/// not cover every allocated task) — callers then fall back to the MILP.
pub(crate) fn patch_schedule(
    inputs: &ProblemInputs,
    allocation: &Matrix,
    old_schedule: &Schedule,
) -> Option<Schedule> {
    let num_tasks = inputs.num_tasks();
    if old_schedule.timepoints.len() < num_tasks {
        // Added tasks have no old timepoints to replay.
        return None;
    }

    let mut order: Vec<TaskIndex> = (0..num_tasks).collect();
    order.sort_by(|&a, &b| {
        old_schedule.timepoints[a]
            .0
            .partial_cmp(&old_schedule.timepoints[b].0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let coalitions: Vec<Vec<RobotIndex>> = (0..num_tasks)
        .map(|m| {
            (0..inputs.num_robots())
                .filter(|&n| allocation.get(m, n) != 0.0)
                .collect()
        })
        .collect();

    let mut durations = vec![0.0_f32; num_tasks];
    for m in 0..num_tasks {
        let coalition: Vec<&stas_core::Robot> =
            coalitions[m].iter().map(|&n| inputs.robot(n)).collect();
        durations[m] = inputs
            .task(m)
            .compute_duration(&coalition, &inputs.planners, inputs.query_budget)
            .ok()?;
    }

    let mut timepoints = vec![(0.0_f32, 0.0_f32); num_tasks];
    let mut done = vec![false; num_tasks];
    let mut robot_finish = vec![0.0_f32; inputs.num_robots()];
    let mut robot_config: Vec<_> = (0..inputs.num_robots())
        .map(|n| inputs.robot(n).initial_configuration)
        .collect();

    for &task in &order {
        let mut start = 0.0_f32;

        // Declared predecessors must already be placed.
        for &(pred, succ) in &inputs.precedence {
            if succ != task {
                continue;
            }
            if !done[pred] {
                return None;
            }
            start = start.max(timepoints[pred].1);
        }

        // Robot availability and travel.
        let arrival = inputs.task(task).initial_configuration;
        for &robot_index in &coalitions[task] {
            let robot = inputs.robot(robot_index);
            let length = inputs
                .oracle_length(robot, &robot_config[robot_index], &arrival)
                .ok()?;
            let transition = length / robot.speed();
            start = start.max(robot_finish[robot_index] + transition);
        }

        let finish = start + durations[task];
        timepoints[task] = (start, finish);
        done[task] = true;
        for &robot_index in &coalitions[task] {
            robot_finish[robot_index] = finish;
            robot_config[robot_index] = inputs.task(task).terminal_configuration;
        }
    }

    let makespan = timepoints.iter().map(|&(_, f)| f).fold(0.0_f32, f32::max);
    Some(Schedule {
        makespan,
        timepoints,
        precedence_set_mutex_constraints: old_schedule.precedence_set_mutex_constraints.clone(),
    })
}
