//! Dependency graph and per-frame run order.
//!
//! Systems declare the system types they depend on. The graph is kept
//! acyclic: a registration that would close a cycle is rejected before
//! anything is recorded. Each frame, [`DependencyGraph::resolve`] computes
//! which due systems may run and in what order:
//!
//! 1. A system is *resolvable* iff it is due and every registered
//!    dependency is resolvable. Unregistered dependencies are vacuously
//!    satisfied.
//! 2. Resolvable systems run dependencies-first; independent systems keep
//!    registration order.

use std::collections::{HashMap, HashSet};

use crate::system::SystemId;

/// The registered systems and their declared dependencies.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Registration order.
    order: Vec<SystemId>,
    edges: HashMap<SystemId, Vec<SystemId>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, id: SystemId) -> bool {
        self.edges.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Systems in registration order.
    #[must_use]
    pub fn systems(&self) -> &[SystemId] {
        &self.order
    }

    #[must_use]
    pub fn dependencies(&self, id: SystemId) -> &[SystemId] {
        self.edges.get(&id).map_or(&[], Vec::as_slice)
    }

    /// The cycle that registering `id` with `deps` would close, as a path
    /// starting and ending at `id`.
    #[must_use]
    pub fn find_cycle(&self, id: SystemId, deps: &[SystemId]) -> Option<Vec<SystemId>> {
        for &dep in deps {
            let mut path = vec![id];
            let mut visited = HashSet::new();
            if self.reaches(dep, id, &mut path, &mut visited) {
                return Some(path);
            }
        }
        None
    }

    /// Depth-first search from `from` to `target` along registered edges,
    /// recording the path.
    fn reaches(
        &self,
        from: SystemId,
        target: SystemId,
        path: &mut Vec<SystemId>,
        visited: &mut HashSet<SystemId>,
    ) -> bool {
        path.push(from);
        if from == target {
            return true;
        }
        if visited.insert(from) {
            for &next in self.dependencies(from) {
                if self.reaches(next, target, path, visited) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    /// Record a system. The caller has already checked for duplicates and
    /// cycles.
    pub fn insert(&mut self, id: SystemId, deps: Vec<SystemId>) {
        self.order.push(id);
        self.edges.insert(id, deps);
    }

    pub fn remove(&mut self, id: SystemId) -> bool {
        self.order.retain(|&s| s != id);
        self.edges.remove(&id).is_some()
    }

    /// The run order for this frame, given the set of due systems.
    #[must_use]
    pub fn resolve(&self, due: &HashSet<SystemId>) -> Vec<SystemId> {
        let mut memo = HashMap::new();
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for &id in &self.order {
            if self.resolvable(id, due, &mut memo) {
                self.visit(id, &mut visited, &mut order);
            }
        }
        order
    }

    fn resolvable(
        &self,
        id: SystemId,
        due: &HashSet<SystemId>,
        memo: &mut HashMap<SystemId, bool>,
    ) -> bool {
        let Some(deps) = self.edges.get(&id) else {
            return true;
        };
        if let Some(&known) = memo.get(&id) {
            return known;
        }
        let result = due.contains(&id) && deps.iter().all(|&dep| self.resolvable(dep, due, memo));
        memo.insert(id, result);
        result
    }

    /// Post-order walk: registered dependencies first. Only called on
    /// resolvable systems, whose registered dependencies are resolvable too.
    fn visit(&self, id: SystemId, visited: &mut HashSet<SystemId>, order: &mut Vec<SystemId>) {
        if !visited.insert(id) {
            return;
        }
        for &dep in self.dependencies(id) {
            if self.contains(dep) {
                self.visit(dep, visited, order);
            }
        }
        order.push(id);
    }
}
