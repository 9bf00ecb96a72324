//! Incremental allocation nodes
//!
//! The search explores allocation matrices incrementally: each node adds one
//! `(task, robot)` assignment on top of its parent, so a node is just a
//! parent pointer plus the newest cell. The full matrix is materialised on
//! demand by walking the chain. Nodes are immutable; evaluation state lives
//! in the search's records.

use stas_core::{Assignment, Matrix};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Lifecycle of a node inside the search
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    New,
    Open,
    Closed,
    DeadEnd,
    Pruned,
}

/// One node of the allocation DAG.
///
/// The root carries the matrix dimensions explicitly; every other node
/// inherits them through its parent chain.
#[derive(Debug)]
pub struct AllocationNode {
    parent: Option<Arc<AllocationNode>>,
    last_assignment: Option<Assignment>,
    dimensions: Option<(usize, usize)>,
}

impl AllocationNode {
    /// The root node: the all-zero `tasks x robots` matrix
    pub fn root(tasks: usize, robots: usize) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            last_assignment: None,
            dimensions: Some((tasks, robots)),
        })
    }

    /// A child extending `parent` with one more assignment
    pub fn child(parent: &Arc<Self>, assignment: Assignment) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(parent)),
            last_assignment: Some(assignment),
            dimensions: None,
        })
    }

    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    pub fn last_assignment(&self) -> Option<Assignment> {
        self.last_assignment
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// `(tasks, robots)` inherited from the root
    pub fn dimensions(&self) -> (usize, usize) {
        let mut node = self;
        loop {
            if let Some(dims) = node.dimensions {
                return dims;
            }
            node = node
                .parent
                .as_deref()
                .expect("non-root nodes always have a parent");
        }
    }

    /// Number of assignments along the path to the root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self;
        while let Some(parent) = node.parent.as_deref() {
            if node.last_assignment.is_some() {
                depth += 1;
            }
            node = parent;
        }
        depth
    }

    /// Assignments along the path, newest first
    pub fn assignments(&self) -> Vec<Assignment> {
        let mut out = Vec::new();
        let mut node = self;
        loop {
            if let Some(assignment) = node.last_assignment {
                out.push(assignment);
            }
            match node.parent.as_deref() {
                Some(parent) => node = parent,
                None => return out,
            }
        }
    }

    /// Whether any assignment on the path touches one of `robots`
    pub fn touches_robot(&self, robots: &[usize]) -> bool {
        let mut node = self;
        loop {
            if let Some(assignment) = node.last_assignment {
                if robots.contains(&assignment.robot) {
                    return true;
                }
            }
            match node.parent.as_deref() {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Materialise the dense allocation matrix. O(depth); callers needing it
    /// repeatedly should materialise once and keep it.
    pub fn allocation(&self) -> Matrix {
        let (tasks, robots) = self.dimensions();
        let mut matrix = Matrix::zeros(tasks, robots);
        let mut node = self;
        loop {
            if let Some(Assignment { task, robot }) = node.last_assignment {
                matrix.set(task, robot, 1.0);
            }
            match node.parent.as_deref() {
                Some(parent) => node = parent,
                None => return matrix,
            }
        }
    }
}

/// Hash of an allocation matrix, used as the memoisation key.
///
/// Two nodes with equal matrices hash equal regardless of the order their
/// assignments were made in (the weak contract; the cell set determines the
/// hash).
pub fn allocation_hash(allocation: &Matrix) -> u64 {
    let mut hasher = DefaultHasher::new();
    allocation.rows().hash(&mut hasher);
    allocation.cols().hash(&mut hasher);
    for (row, col, value) in allocation.entries() {
        if value != 0.0 {
            (row, col).hash(&mut hasher);
        }
    }
    hasher.finish()
}
