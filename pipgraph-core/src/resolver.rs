//! Effective upstream dependencies of a project.
//!
//! With transitive references disabled a project depends on its direct
//! references. With them enabled it depends on everything reachable, and the
//! reachable sets are memoized per project so shared subgraphs are walked
//! once per construction.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{ProjectGraph, ProjectId};

/// Memoizing dependency resolver, owned by one construction session.
pub struct DependencyResolver<'g> {
    graph: &'g ProjectGraph,
    transitive: bool,
    /// Unfiltered reachable set per project. Entries are inserted complete.
    memo: RwLock<HashMap<ProjectId, Arc<BTreeSet<ProjectId>>>>,
}

impl<'g> DependencyResolver<'g> {
    pub fn new(graph: &'g ProjectGraph, transitive: bool) -> Self {
        Self {
            graph,
            transitive,
            memo: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_transitive(&self) -> bool {
        self.transitive
    }

    /// Projects whose outputs `project` consumes, sorted by id.
    ///
    /// Projects with no predicted targets are never scheduled and are left out.
    pub fn effective_dependencies(&self, project: ProjectId) -> Vec<ProjectId> {
        if !self.transitive {
            let direct: BTreeSet<ProjectId> = self
                .graph
                .get(project)
                .references
                .iter()
                .copied()
                .filter(|r| self.graph.get(*r).has_targets())
                .collect();
            return direct.into_iter().collect();
        }

        self.reachable(project)
            .iter()
            .copied()
            .filter(|r| self.graph.get(*r).has_targets())
            .collect()
    }

    /// Everything reachable from `project` through references, excluding itself.
    fn reachable(&self, project: ProjectId) -> Arc<BTreeSet<ProjectId>> {
        if let Some(hit) = self.lookup(project) {
            return hit;
        }

        let mut result = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut worklist: Vec<ProjectId> = self.graph.get(project).references.clone();

        while let Some(current) = worklist.pop() {
            if !visited.insert(current) {
                continue;
            }
            result.insert(current);

            // A memoized descendant already carries its whole closure
            if let Some(known) = self.lookup(current) {
                for id in known.iter() {
                    if visited.insert(*id) {
                        result.insert(*id);
                    }
                }
                continue;
            }
            worklist.extend(self.graph.get(current).references.iter().copied());
        }

        let mut memo = self.memo.write().unwrap_or_else(PoisonError::into_inner);
        memo.entry(project)
            .or_insert_with(|| Arc::new(result))
            .clone()
    }

    fn lookup(&self, project: ProjectId) -> Option<Arc<BTreeSet<ProjectId>>> {
        self.memo
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&project)
            .cloned()
    }
}
