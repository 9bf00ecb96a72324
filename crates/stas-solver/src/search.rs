//! Incremental task allocation graph search
//!
//! Greedy best-first search over incremental allocation matrices. Each
//! expansion adds one robot-to-task assignment; children are deduplicated
//! by allocation hash, pre-pruned when the new assignment does not improve
//! trait coverage, evaluated with TETAQ and pushed into a key-indexed open
//! queue. The first popped node covering every desired trait wins.
//!
//! The search space is a finite DAG (every path strictly extends the
//! matrix), so with hash deduplication the loop always terminates.

use crate::context::SolverContext;
use crate::heuristics::{is_goal, Pruner, Tetaq, TraitImprovementPruner};
use crate::node::{allocation_hash, AllocationNode, NodeStatus};
use crate::scheduler::MilpScheduler;
use stas_core::{
    algebra, Assignment, Matrix, MutablePriorityQueue, ProblemInputs, Schedule,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Node counters and phase timings for one search
#[derive(Clone, Debug, Default)]
pub struct SearchStatistics {
    pub nodes_generated: usize,
    pub nodes_expanded: usize,
    pub nodes_evaluated: usize,
    pub nodes_pruned: usize,
    pub nodes_deadend: usize,
    pub total_time: Duration,
    pub task_allocation_time: Duration,
    pub scheduling_time: Duration,
    pub motion_planning_time: Duration,
}

/// One node together with everything the search learned about it
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub node: Arc<AllocationNode>,
    pub allocation: Matrix,
    pub hash: u64,
    pub status: NodeStatus,
    pub apr: Option<f32>,
    pub nsq: Option<f32>,
    pub tetaq: Option<f32>,
    pub schedule: Option<Schedule>,
    /// Repair marked the APR as needing a lazy refresh
    pub apr_stale: bool,
    /// Repair marked the NSQ as needing a lazy refresh
    pub nsq_stale: bool,
}

impl NodeRecord {
    pub(crate) fn unevaluated(node: Arc<AllocationNode>) -> Self {
        let allocation = node.allocation();
        let hash = allocation_hash(&allocation);
        Self {
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
        }
    }

    pub(crate) fn priority(&self) -> f32 {
        self.tetaq.unwrap_or(f32::INFINITY)
    }
}

/// Closed and pruned records frozen by a shallow repair copy.
///
/// Child searches read these through a chain of shared references, so a
/// repair copy can never outlive the data it borrows from.
#[derive(Debug)]
pub struct Archives {
    pub closed: Vec<NodeRecord>,
    pub pruned: Vec<NodeRecord>,
    pub parent: Option<Arc<Archives>>,
}

/// A goal allocation with its schedule
#[derive(Clone, Debug)]
pub struct SearchSolution {
    pub node: Arc<AllocationNode>,
    pub allocation: Matrix,
    pub schedule: Schedule,
    pub apr: f32,
    pub nsq: Option<f32>,
}

/// What a search run produced
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub solution: Option<SearchSolution>,
    pub statistics: SearchStatistics,
    pub timed_out: bool,
}

/// The ITAGS search state. Survives across `search()` calls so a finished
/// search can be repaired and resumed.
pub struct ItagsSearch {
    pub(crate) inputs: Arc<ProblemInputs>,
    pub(crate) context: Arc<SolverContext>,
    pub(crate) open: MutablePriorityQueue<u64, f32, NodeRecord>,
    pub(crate) closed_ids: HashSet<u64>,
    pub(crate) pruned_ids: HashSet<u64>,
    pub(crate) closed: Vec<NodeRecord>,
    pub(crate) pruned: Vec<NodeRecord>,
    pub(crate) shared_archives: Option<Arc<Archives>>,
    pub(crate) root: Arc<AllocationNode>,
    pub(crate) statistics: SearchStatistics,
    pub(crate) best_solution: Option<NodeRecord>,
    pub(crate) use_quick_nsq: bool,
}

impl ItagsSearch {
    pub fn new(inputs: Arc<ProblemInputs>) -> Self {
        let root = AllocationNode::root(inputs.num_tasks(), inputs.num_robots());
        let mut search = Self {
            inputs,
            context: Arc::new(SolverContext::new()),
            open: MutablePriorityQueue::new(),
            closed_ids: HashSet::new(),
            pruned_ids: HashSet::new(),
            closed: Vec::new(),
            pruned: Vec::new(),
            shared_archives: None,
            root,
            statistics: SearchStatistics::default(),
            best_solution: None,
            use_quick_nsq: false,
        };
        search.push_root();
        search
    }

    /// Use the single-shot scheduler for NSQ evaluations
    pub fn with_quick_nsq(mut self) -> Self {
        self.use_quick_nsq = true;
        self
    }

    pub fn inputs(&self) -> &Arc<ProblemInputs> {
        &self.inputs
    }

    pub fn context(&self) -> &Arc<SolverContext> {
        &self.context
    }

    pub fn statistics(&self) -> &SearchStatistics {
        &self.statistics
    }

    /// Whether the whole team together could ever satisfy every task
    pub fn is_allocatable(&self) -> bool {
        let all_ones = Matrix::ones(self.inputs.num_tasks(), self.inputs.num_robots());
        algebra::traits_mismatch_error(
            &self.inputs.reduction,
            &all_ones,
            &self.inputs.desired_traits,
            &self.inputs.team_traits,
        ) == 0.0
    }

    fn evaluator(&self) -> Tetaq<'_> {
        let tetaq = Tetaq::new(&self.inputs, &self.context);
        if self.use_quick_nsq {
            tetaq.with_quick_scheduler()
        } else {
            tetaq
        }
    }

    pub(crate) fn push_root(&mut self) {
        let mut record = NodeRecord::unevaluated(Arc::clone(&self.root));
        self.statistics.nodes_generated += 1;
        self.evaluate_record(&mut record);
        record.status = NodeStatus::Open;
        self.open.push(record.hash, record.priority(), record);
    }

    pub(crate) fn evaluate_record(&mut self, record: &mut NodeRecord) {
        let evaluation = self.evaluator().evaluate(&record.allocation);
        record.apr = Some(evaluation.apr);
        record.nsq = Some(evaluation.nsq);
        record.tetaq = Some(evaluation.tetaq);
        record.schedule = evaluation.schedule;
        record.apr_stale = false;
        record.nsq_stale = false;
        self.statistics.nodes_evaluated += 1;
    }

    /// Whether a hash is closed or pruned, in this search or any archive a
    /// shallow copy reads through
    fn is_retired(&self, hash: u64) -> bool {
        self.closed_ids.contains(&hash) || self.pruned_ids.contains(&hash)
    }

    /// Run the search loop until a goal, exhaustion, or timeout
    pub fn search(&mut self) -> SearchOutcome {
        let started = Instant::now();
        let timeout = self.inputs.search_parameters.timeout.map(Duration::from_secs_f32);

        loop {
            if let Some(budget) = timeout {
                if started.elapsed() >= budget {
                    tracing::debug!("search wall-clock budget exhausted");
                    break self.finish(None, true, started);
                }
            }

            let Some((hash, _, mut record)) = self.open.pop() else {
                break self.finish(None, false, started);
            };

            // Close before the goal check so repair can later promote the
            // node out of the closed set.
            record.status = NodeStatus::Closed;
            self.closed_ids.insert(hash);

            if is_goal(&self.inputs, &record.allocation) {
                match self.finalise_goal(&mut record) {
                    Some(solution) => {
                        if self.inputs.search_parameters.save_closed_nodes {
                            self.closed.push(record.clone());
                        }
                        self.best_solution = Some(record);
                        break self.finish(Some(solution), false, started);
                    }
                    None => {
                        // The covering allocation cannot be scheduled.
                        record.status = NodeStatus::DeadEnd;
                        self.statistics.nodes_deadend += 1;
                        if self.inputs.search_parameters.save_closed_nodes {
                            self.closed.push(record);
                        }
                        continue;
                    }
                }
            }

            if self.inputs.search_parameters.save_closed_nodes {
                self.closed.push(record.clone());
            }

            self.expand(&record);
        }
    }

    /// Generate, filter, evaluate and enqueue the children of one record
    pub(crate) fn expand(&mut self, record: &NodeRecord) {
        let (num_tasks, num_robots) = (self.inputs.num_tasks(), self.inputs.num_robots());
        let prepruner = TraitImprovementPruner;
        let mut any_child = false;

        // Deterministic successor order: row-major over (task, robot).
        for task in 0..num_tasks {
            for robot in 0..num_robots {
                if record.allocation.get(task, robot) != 0.0 {
                    continue;
                }
                any_child = true;
                self.statistics.nodes_generated += 1;

                let assignment = Assignment { task, robot };
                let node = AllocationNode::child(&record.node, assignment);
                let mut allocation = record.allocation.clone();
                allocation.set(task, robot, 1.0);
                let hash = allocation_hash(&allocation);

                if self.is_retired(hash) || self.open.contains(&hash) {
                    continue;
                }

                if prepruner.prune(&self.inputs, &allocation, assignment) {
                    self.statistics.nodes_pruned += 1;
                    self.pruned_ids.insert(hash);
                    if self.inputs.search_parameters.save_pruned_nodes {
                        self.pruned.push(NodeRecord {
                            node,
                            allocation,
                            hash,
                            status: NodeStatus::Pruned,
                            apr: None,
                            nsq: None,
                            tetaq: None,
                            schedule: None,
                            apr_stale: false,
                            nsq_stale: false,
                        });
                    }
                    continue;
                }

                let mut child = NodeRecord {
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
                self.evaluate_record(&mut child);
                child.status = NodeStatus::Open;
                self.open.push(hash, child.priority(), child);
            }
        }

        self.statistics.nodes_expanded += 1;
        if !any_child {
            self.statistics.nodes_deadend += 1;
        }
    }

    /// Make sure a goal record carries a schedule; `None` when the
    /// allocation cannot be scheduled after all.
    fn finalise_goal(&mut self, record: &mut NodeRecord) -> Option<SearchSolution> {
        if record.schedule.is_none() {
            let mut scheduler =
                MilpScheduler::new(&self.inputs, &self.context, &record.allocation);
            match scheduler.solve() {
                Ok(schedule) => record.schedule = Some(schedule),
                Err(failure) => {
                    tracing::debug!(%failure, "goal allocation cannot be scheduled");
                    return None;
                }
            }
        }
        Some(SearchSolution {
            node: Arc::clone(&record.node),
            allocation: record.allocation.clone(),
            schedule: record.schedule.clone().expect("schedule just ensured"),
            apr: record.apr.unwrap_or(0.0),
            nsq: record.nsq,
        })
    }

    fn finish(
        &mut self,
        solution: Option<SearchSolution>,
        timed_out: bool,
        started: Instant,
    ) -> SearchOutcome {
        self.statistics.total_time += started.elapsed();
        self.statistics.scheduling_time = self.context.scheduling_time();
        self.statistics.motion_planning_time = self.inputs.motion_planning_time();
        self.statistics.task_allocation_time = self
            .statistics
            .total_time
            .saturating_sub(self.statistics.scheduling_time);
        SearchOutcome {
            solution,
            statistics: self.statistics.clone(),
            timed_out,
        }
    }
}

/// Build a search for `inputs` and run it to completion
pub fn solve(inputs: Arc<ProblemInputs>) -> SearchOutcome {
    ItagsSearch::new(inputs).search()
}
