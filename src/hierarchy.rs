//! Worker hierarchy queries
//!
//! The tree is owned by the workers themselves (each parent owns its
//! children), so these are read-only walks over it plus a mutable lookup
//! used to route pause and resume requests.

use crate::protocol::{WorkerId, WorkerSnapshot, WorkerStatus};
use crate::worker::Worker;

/// Borrowed view of a worker tree
#[derive(Debug, Clone, Copy)]
pub struct Hierarchy<'a> {
    root: &'a Worker,
}

impl<'a> Hierarchy<'a> {
    pub fn new(root: &'a Worker) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &'a Worker {
        self.root
    }

    /// Visit every worker in pre-order together with its depth.
    pub fn visit(&self, mut f: impl FnMut(&'a Worker, usize)) {
        fn walk<'w>(worker: &'w Worker, depth: usize, f: &mut impl FnMut(&'w Worker, usize)) {
            f(worker, depth);
            for child in worker.children() {
                walk(child, depth + 1, f);
            }
        }
        walk(self.root, 0, &mut f);
    }

    /// Get total worker count
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.visit(|_, _| count += 1);
        count
    }

    /// A tree always holds its root
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn find(&self, id: WorkerId) -> Option<&'a Worker> {
        let mut found = None;
        self.visit(|worker, _| {
            if found.is_none() && worker.id() == id {
                found = Some(worker);
            }
        });
        found
    }

    pub fn parent(&self, id: WorkerId) -> Option<&'a Worker> {
        let parent_id = self.find(id)?.parent_id()?;
        self.find(parent_id)
    }

    /// Children of a worker; empty when the worker is unknown
    pub fn children(&self, id: WorkerId) -> &'a [Worker] {
        self.find(id).map(Worker::children).unwrap_or_default()
    }

    /// Distance from the root, or `None` if the worker is not in the tree
    pub fn depth(&self, id: WorkerId) -> Option<usize> {
        let mut depth = None;
        self.visit(|worker, d| {
            if depth.is_none() && worker.id() == id {
                depth = Some(d);
            }
        });
        depth
    }

    pub fn workers_at_depth(&self, depth: usize) -> Vec<&'a Worker> {
        let mut workers = Vec::new();
        self.visit(|worker, d| {
            if d == depth {
                workers.push(worker);
            }
        });
        workers
    }

    /// Sum of every worker's own cost
    pub fn total_cost(&self) -> f64 {
        let mut total = 0.0;
        self.visit(|worker, _| total += worker.cost());
        total
    }

    /// Root first, then down through the first child still owed a reply
    /// at each level.
    pub fn active_path(&self) -> Vec<&'a Worker> {
        let mut path = vec![self.root];
        let mut current = self.root;
        while current.status() == WorkerStatus::Waiting {
            let next = current.active_children().iter().find_map(|id| {
                current.children().iter().find(|c| c.id() == *id)
            });
            match next {
                Some(child) => {
                    path.push(child);
                    current = child;
                }
                None => break,
            }
        }
        path
    }

    /// The worker currently doing the tree's work, if any
    pub fn executing_leaf(&self) -> Option<&'a Worker> {
        self.active_path()
            .last()
            .copied()
            .filter(|w| w.status().is_executing())
    }

    pub fn paused_workers(&self) -> Vec<&'a Worker> {
        let mut paused = Vec::new();
        self.visit(|worker, _| {
            if worker.status() == WorkerStatus::Paused {
                paused.push(worker);
            }
        });
        paused
    }

    /// Snapshot of the whole tree for display
    pub fn to_tree(&self) -> WorkerSnapshot {
        build_tree_node(self.root)
    }
}

fn build_tree_node(worker: &Worker) -> WorkerSnapshot {
    WorkerSnapshot {
        id: worker.id(),
        name: worker.name().to_string(),
        role: worker.role().id.clone(),
        status: worker.status(),
        cost: worker.cost(),
        context_used: worker.context_used(),
        max_context: worker.role().context_window,
        iteration_count: worker.iteration_count(),
        todo_count: worker.todos().len(),
        children: worker.children().iter().map(build_tree_node).collect(),
    }
}

/// Apply `f` to every worker under `root`, pre-order.
pub fn visit_mut(root: &mut Worker, f: &mut impl FnMut(&mut Worker)) {
    f(root);
    for child in root.children_mut() {
        visit_mut(child, f);
    }
}

/// Mutable lookup of a worker anywhere under `root`
pub fn find_mut(root: &mut Worker, id: WorkerId) -> Option<&mut Worker> {
    if root.id() == id {
        return Some(root);
    }
    root.children_mut()
        .iter_mut()
        .find_map(|child| find_mut(child, id))
}
