//! Motion-planning oracle
//!
//! The allocation search and the scheduler never plan motion themselves;
//! they ask an oracle for the length of a collision-free path between two
//! configurations. Planning is expensive, so results — including failures —
//! are memoised. Robots of the same species share cache entries: a path is
//! valid for every robot with the same bounding radius.
//!
//! The cache is the only writer-mutable shared state in the engine and is
//! guarded at species granularity: callers planning for distinct radii
//! proceed concurrently, callers for the same radius serialise.

use crate::config::{Configuration, VertexId};
use crate::queue::MutablePriorityQueue;
use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Why a motion-plan query failed.
///
/// Failures are cached: a pair that cannot be planned once cannot be
/// planned again for the same problem instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OracleFailure {
    #[error("no collision-free path exists between the configurations")]
    Unreachable,
    #[error("planner budget exhausted before a path was found")]
    BudgetExhausted,
}

/// Per-query resource bound standing in for an external planner's timeout
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QueryBudget {
    /// Maximum search-node expansions before the planner gives up
    pub max_expansions: usize,
}

impl Default for QueryBudget {
    fn default() -> Self {
        Self {
            max_expansions: 100_000,
        }
    }
}

/// The oracle contract used by schedulers and heuristics.
///
/// `query` returns the raw path *length* for the given bounding radius;
/// callers divide by robot or coalition speed to obtain durations.
/// Successful results are monotonic: repeated queries return identical
/// values.
pub trait MotionOracle: Send + Sync {
    fn query(
        &self,
        bounding_radius: f32,
        from: &Configuration,
        to: &Configuration,
        budget: QueryBudget,
    ) -> Result<f32, OracleFailure>;

    fn is_memoised(&self, bounding_radius: f32, from: &Configuration, to: &Configuration)
        -> bool;
}

// ============================================================================
// Environments
// ============================================================================

/// A roadmap graph with embedded vertices
#[derive(Clone, Debug)]
pub struct GraphEnvironment {
    graph: UnGraph<VertexId, f32>,
    nodes: HashMap<VertexId, NodeIndex>,
}

impl GraphEnvironment {
    /// Build a roadmap from embedded vertices and edges.
    ///
    /// An edge without an explicit weight gets the euclidean distance
    /// between its endpoints. Edges naming unknown vertices are dropped.
    pub fn new(
        vertices: &[(VertexId, f32, f32)],
        edges: &[(VertexId, VertexId, Option<f32>)],
    ) -> Self {
        let mut graph = UnGraph::default();
        let mut nodes = HashMap::new();
        let mut coords = HashMap::new();
        for &(id, x, y) in vertices {
            let idx = graph.add_node(id);
            nodes.insert(id, idx);
            coords.insert(id, (x, y));
        }
        for &(a, b, weight) in edges {
            let (Some(&na), Some(&nb)) = (nodes.get(&a), nodes.get(&b)) else {
                continue;
            };
            let w = weight.unwrap_or_else(|| {
                let (ax, ay) = coords[&a];
                let (bx, by) = coords[&b];
                ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
            });
            graph.add_edge(na, nb, w);
        }
        Self { graph, nodes }
    }

    fn shortest_path(&self, from: VertexId, to: VertexId) -> Result<f32, OracleFailure> {
        let (Some(&start), Some(&goal)) = (self.nodes.get(&from), self.nodes.get(&to)) else {
            return Err(OracleFailure::Unreachable);
        };
        let distances = dijkstra(&self.graph, start, Some(goal), |e| *e.weight());
        distances
            .get(&goal)
            .copied()
            .ok_or(OracleFailure::Unreachable)
    }
}

/// An occupancy grid over the plane
#[derive(Clone, Debug)]
pub struct GridEnvironment {
    width: i32,
    height: i32,
    cell_size: f32,
    obstacles: Vec<(i32, i32)>,
}

impl GridEnvironment {
    pub fn new(width: u32, height: u32, cell_size: f32, obstacles: Vec<(i32, i32)>) -> Self {
        Self {
            width: width as i32,
            height: height as i32,
            cell_size,
            obstacles,
        }
    }

    fn cell_of(&self, x: f32, y: f32) -> (i32, i32) {
        ((x / self.cell_size).floor() as i32, (y / self.cell_size).floor() as i32)
    }

    /// 8-connected A* between two planar positions.
    ///
    /// Obstacles are inflated by the bounding radius so a wide robot cannot
    /// squeeze through a gap a narrow one can.
    fn plan(
        &self,
        bounding_radius: f32,
        from: (f32, f32),
        to: (f32, f32),
        budget: QueryBudget,
    ) -> Result<f32, OracleFailure> {
        let inflate = (bounding_radius / self.cell_size).ceil() as i32;
        let mut blocked = std::collections::HashSet::new();
        for &(ox, oy) in &self.obstacles {
            for dx in -inflate..=inflate {
                for dy in -inflate..=inflate {
                    blocked.insert((ox + dx, oy + dy));
                }
            }
        }

        let start = self.cell_of(from.0, from.1);
        let goal = self.cell_of(to.0, to.1);
        let in_bounds =
            |(x, y): (i32, i32)| x >= 0 && y >= 0 && x < self.width && y < self.height;
        if !in_bounds(start) || !in_bounds(goal) || blocked.contains(&start) || blocked.contains(&goal)
        {
            return Err(OracleFailure::Unreachable);
        }
        if start == goal {
            return Ok(0.0);
        }

        let heuristic = |(x, y): (i32, i32)| {
            (((x - goal.0).pow(2) + (y - goal.1).pow(2)) as f32).sqrt() * self.cell_size
        };

        const DIAGONAL: f32 = std::f32::consts::SQRT_2;
        let mut open: MutablePriorityQueue<(i32, i32), f32, f32> = MutablePriorityQueue::new();
        let mut best: HashMap<(i32, i32), f32> = HashMap::new();
        open.push(start, heuristic(start), 0.0);
        best.insert(start, 0.0);

        let mut expansions = 0_usize;
        while let Some((cell, _, g)) = open.pop() {
            if cell == goal {
                return Ok(g);
            }
            expansions += 1;
            if expansions > budget.max_expansions {
                return Err(OracleFailure::BudgetExhausted);
            }
            for dx in -1..=1_i32 {
                for dy in -1..=1_i32 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let next = (cell.0 + dx, cell.1 + dy);
                    if !in_bounds(next) || blocked.contains(&next) {
                        continue;
                    }
                    let step = if dx != 0 && dy != 0 { DIAGONAL } else { 1.0 } * self.cell_size;
                    let tentative = g + step;
                    if best.get(&next).map_or(true, |&known| tentative < known) {
                        best.insert(next, tentative);
                        open.push(next, tentative + heuristic(next), tentative);
                    }
                }
            }
        }
        Err(OracleFailure::Unreachable)
    }
}

/// The planning backend behind one oracle
#[derive(Clone, Debug)]
pub enum Environment {
    /// Obstacle-free space: path length equals euclidean distance
    OpenSpace,
    /// Shortest paths over a roadmap graph
    Graph(GraphEnvironment),
    /// A* over an occupancy grid
    Grid(GridEnvironment),
}

impl Environment {
    fn plan(
        &self,
        bounding_radius: f32,
        from: &Configuration,
        to: &Configuration,
        budget: QueryBudget,
    ) -> Result<f32, OracleFailure> {
        match self {
            Self::OpenSpace => {
                let d = from.euclidean_distance(to);
                if d.is_finite() {
                    Ok(d)
                } else {
                    Err(OracleFailure::Unreachable)
                }
            }
            Self::Graph(env) => match (from, to) {
                (
                    Configuration::Graph { vertex: a, .. },
                    Configuration::Graph { vertex: b, .. },
                ) => env.shortest_path(*a, *b),
                _ => Err(OracleFailure::Unreachable),
            },
            Self::Grid(env) => match (from, to) {
                (
                    Configuration::Se2 { x: ax, y: ay, .. },
                    Configuration::Se2 { x: bx, y: by, .. },
                ) => env.plan(bounding_radius, (*ax, *ay), (*bx, *by), budget),
                _ => Err(OracleFailure::Unreachable),
            },
        }
    }
}

// ============================================================================
// Memoising oracle
// ============================================================================

type PairCache = HashMap<(Configuration, Configuration), Result<f32, OracleFailure>>;

/// A memoised, radius-keyed oracle over one environment.
///
/// Cache entries are shared by every robot with the same bounding radius
/// (i.e. the same species). Failure results are cached like successes.
#[derive(Debug)]
pub struct MemoisingOracle {
    environment: Environment,
    caches: Mutex<HashMap<u32, Arc<Mutex<PairCache>>>>,
    plans_computed: AtomicUsize,
    plan_failures: AtomicUsize,
    planning_nanos: AtomicU64,
}

impl MemoisingOracle {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            caches: Mutex::new(HashMap::new()),
            plans_computed: AtomicUsize::new(0),
            plan_failures: AtomicUsize::new(0),
            planning_nanos: AtomicU64::new(0),
        }
    }

    /// Number of planner invocations so far (cache hits excluded)
    pub fn plans_computed(&self) -> usize {
        self.plans_computed.load(Ordering::Relaxed)
    }

    /// Number of planner invocations that failed
    pub fn plan_failures(&self) -> usize {
        self.plan_failures.load(Ordering::Relaxed)
    }

    /// Wall-clock time spent inside the planners
    pub fn planning_time(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.planning_nanos.load(Ordering::Relaxed))
    }

    /// Prime the cache with a known result, e.g. replaying a previously
    /// computed plan or forcing a failure a coarser planner has proven.
    pub fn seed(
        &self,
        bounding_radius: f32,
        from: Configuration,
        to: Configuration,
        result: Result<f32, OracleFailure>,
    ) {
        let cache = self.species_cache(bounding_radius);
        cache
            .lock()
            .expect("species cache lock poisoned")
            .insert((from, to), result);
    }

    /// Drop every cached result. Used when the map changes under repair:
    /// previously-computed paths may no longer exist and previously-failed
    /// pairs may have become plannable.
    pub fn invalidate(&self) {
        self.caches
            .lock()
            .expect("oracle cache lock poisoned")
            .clear();
    }

    fn species_cache(&self, bounding_radius: f32) -> Arc<Mutex<PairCache>> {
        let mut outer = self.caches.lock().expect("oracle cache lock poisoned");
        outer
            .entry(bounding_radius.to_bits())
            .or_default()
            .clone()
    }
}

impl MotionOracle for MemoisingOracle {
    fn query(
        &self,
        bounding_radius: f32,
        from: &Configuration,
        to: &Configuration,
        budget: QueryBudget,
    ) -> Result<f32, OracleFailure> {
        // Zero-length paths need no planner.
        if from == to {
            return Ok(0.0);
        }
        let cache = self.species_cache(bounding_radius);
        let mut cache = cache.lock().expect("species cache lock poisoned");
        if let Some(cached) = cache.get(&(*from, *to)) {
            return *cached;
        }

        let started = std::time::Instant::now();
        let result = self.environment.plan(bounding_radius, from, to, budget);
        self.planning_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.plans_computed.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.plan_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?from, ?to, bounding_radius, "motion plan failed");
        }
        cache.insert((*from, *to), result);
        result
    }

    fn is_memoised(
        &self,
        bounding_radius: f32,
        from: &Configuration,
        to: &Configuration,
    ) -> bool {
        if from == to {
            return true;
        }
        let cache = self.species_cache(bounding_radius);
        let cache = cache.lock().expect("species cache lock poisoned");
        cache.contains_key(&(*from, *to))
    }
}
