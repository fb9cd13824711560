//! Published outputs of scheduled projects.
//!
//! Once a project's pip is in the graph its sealed output directories and
//! cache artifact are published here, exactly once. Dependents read them to
//! declare their inputs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::GraphError;
use crate::pip::{DirectoryArtifact, FileArtifact};
use crate::types::{ProjectGraph, ProjectId};

/// What one project hands to its dependents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsBuildProjectOutputs {
    pub output_directories: Vec<DirectoryArtifact>,
    pub cache_artifact: Option<FileArtifact>,
}

impl MsBuildProjectOutputs {
    pub fn builds_in_isolation(&self) -> bool {
        self.cache_artifact.is_some()
    }
}

/// Publish-once map from project to its outputs.
#[derive(Default)]
pub struct OutputsRegistry {
    entries: RwLock<HashMap<ProjectId, Arc<MsBuildProjectOutputs>>>,
}

impl OutputsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the outputs of `project`. A second publication is rejected.
    pub fn publish(
        &self,
        graph: &ProjectGraph,
        project: ProjectId,
        outputs: MsBuildProjectOutputs,
    ) -> Result<Arc<MsBuildProjectOutputs>, GraphError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&project) {
            return Err(GraphError::DuplicatePublication {
                project: graph.get(project).full_path.display().to_string(),
            });
        }
        let outputs = Arc::new(outputs);
        entries.insert(project, outputs.clone());
        Ok(outputs)
    }

    pub fn get(&self, project: ProjectId) -> Option<Arc<MsBuildProjectOutputs>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&project)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
