//! Data model for predicted projects.
//!
//! A `Project` is one predicted build-tool invocation: the project file, the
//! global properties it is evaluated under, and what the prediction engine
//! expects it to read, write and build. Projects are immutable and supplied
//! externally; references between them are indices into a `ProjectGraph`.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ProjectGraphError;

/// Global property injected into every evaluation of a static graph build.
pub const GRAPH_DISCRIMINATOR_PROPERTY: &str = "IsGraphBuild";

/// Index of a project inside its `ProjectGraph`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub usize);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn default_true() -> bool {
    true
}

/// One predicted project evaluation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Project {
    /// Absolute path of the project file.
    pub full_path: PathBuf,

    /// Global properties of this evaluation, including the graph discriminator.
    #[serde(default)]
    pub global_properties: BTreeMap<String, String>,

    /// Files the prediction engine expects the project to read.
    #[serde(default)]
    pub predicted_inputs: BTreeSet<PathBuf>,

    /// Folders the prediction engine expects the project to write into.
    #[serde(default)]
    pub predicted_output_folders: BTreeSet<PathBuf>,

    /// Referenced projects.
    #[serde(default)]
    pub references: Vec<ProjectId>,

    /// Targets predicted to be built for this evaluation.
    #[serde(default)]
    pub predicted_targets: Vec<String>,

    /// Whether the default targets were appended because nothing was predicted.
    #[serde(default)]
    pub is_default_target_appended: bool,

    /// Whether the project follows the cross-project reference protocol.
    #[serde(default = "default_true")]
    pub implements_target_protocol: bool,
}

impl Project {
    /// Create a project with the graph discriminator set and nothing predicted.
    pub fn new(full_path: impl Into<PathBuf>) -> Self {
        let mut global_properties = BTreeMap::new();
        global_properties.insert(GRAPH_DISCRIMINATOR_PROPERTY.to_string(), "true".to_string());
        Self {
            full_path: full_path.into(),
            global_properties,
            implements_target_protocol: true,
            ..Self::default()
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predicted_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_reference(mut self, reference: ProjectId) -> Self {
        self.references.push(reference);
        self
    }

    /// File name of the project without its extension.
    pub fn name(&self) -> String {
        self.full_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.full_path.to_string_lossy().to_string())
    }

    /// Directory containing the project file.
    pub fn directory(&self) -> &Path {
        self.full_path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Projects with no predicted targets are never scheduled.
    pub fn has_targets(&self) -> bool {
        !self.predicted_targets.is_empty()
    }

    /// Global properties other than the graph discriminator, in key order.
    pub fn non_default_properties(&self) -> impl Iterator<Item = (&String, &String)> {
        self.global_properties
            .iter()
            .filter(|(key, _)| key.as_str() != GRAPH_DISCRIMINATOR_PROPERTY)
    }

    /// Human-readable symbol distinguishing evaluations of the same project.
    ///
    /// The project name, followed by the canonical `key=value` list of its
    /// non-default global properties when there are any.
    pub fn symbol(&self) -> String {
        let properties: Vec<String> = self
            .non_default_properties()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        if properties.is_empty() {
            self.name()
        } else {
            format!("{}[{}]", self.name(), properties.join(";"))
        }
    }
}

/// The externally predicted, verified-acyclic set of projects.
#[derive(Clone, Debug, Default)]
pub struct ProjectGraph {
    projects: Vec<Project>,
    order: Vec<ProjectId>,
}

impl ProjectGraph {
    /// Validate references and acyclicity, and compute a dependency-first order.
    ///
    /// The graph discriminator is added to any project that lacks it.
    pub fn new(mut projects: Vec<Project>) -> Result<Self, ProjectGraphError> {
        for project in &mut projects {
            project
                .global_properties
                .entry(GRAPH_DISCRIMINATOR_PROPERTY.to_string())
                .or_insert_with(|| "true".to_string());
        }

        let mut graph: DiGraph<ProjectId, ()> = DiGraph::with_capacity(projects.len(), 0);
        let indices: Vec<NodeIndex> = (0..projects.len())
            .map(|i| graph.add_node(ProjectId(i)))
            .collect();

        for (i, project) in projects.iter().enumerate() {
            for reference in &project.references {
                let target = indices.get(reference.0).ok_or_else(|| {
                    ProjectGraphError::DanglingReference {
                        project: project.full_path.display().to_string(),
                        reference: reference.0,
                    }
                })?;
                // Edge from dependency to dependent so the topological order is dependency-first
                graph.add_edge(*target, indices[i], ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| ProjectGraphError::Cycle {
                project: projects[graph[cycle.node_id()].0]
                    .full_path
                    .display()
                    .to_string(),
            })?
            .into_iter()
            .map(|idx| graph[idx])
            .collect();

        Ok(Self { projects, order })
    }

    /// Decode a JSON array of projects and validate it.
    pub fn from_json(json: &str) -> Result<Self, ProjectGraphError> {
        let projects: Vec<Project> = serde_json::from_str(json)?;
        Self::new(projects)
    }

    pub fn get(&self, id: ProjectId) -> &Project {
        &self.projects[id.0]
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn projects(&self) -> impl Iterator<Item = (ProjectId, &Project)> {
        self.projects
            .iter()
            .enumerate()
            .map(|(i, project)| (ProjectId(i), project))
    }

    /// Every project, dependencies before dependents.
    pub fn topological_order(&self) -> &[ProjectId] {
        &self.order
    }
}
