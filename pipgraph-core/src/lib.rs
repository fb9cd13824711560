//! pipgraph core: predicted MSBuild projects in, sandboxable pip graph out.
//!
//! This crate turns a set of externally predicted build-tool invocations
//! ("projects") into a dependency-ordered graph of pips, each carrying a
//! deterministic identity and a complete argument, environment and I/O
//! contract. The sealed graph is handed to `pipgraph-store` for persistence.
//!
//! # Pipeline
//!
//! ```text
//! ProjectGraph -> DependencyResolver -> PipBuilder (collapses outputs)
//!              -> GraphAssembler -> PipGraph
//! ```
//!
//! `GraphConstruction` drives the pipeline in dependency waves on a rayon pool.
//!
//! # Usage
//!
//! ```no_run
//! use pipgraph_core::{GraphConstruction, ProjectGraph, ResolverSettings};
//!
//! let projects = ProjectGraph::from_json(&std::fs::read_to_string("projects.json")?)?;
//! let settings = ResolverSettings::with_root("/src/repo");
//! let outcome = GraphConstruction::new(&projects, &settings).construct(Some(4))?;
//! println!("{} pips", outcome.graph.node_count());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod collapse;
pub mod construction;
pub mod error;
pub mod graph;
pub mod hashing;
pub mod mount;
pub mod outputs;
pub mod pip;
pub mod resolver;
pub mod settings;
pub mod types;

pub use builder::{LogVerbosity, PipBuilder};
pub use collapse::collapse_output_directories;
pub use construction::{ConstructionOutcome, GraphConstruction, ProjectFailure};
pub use error::{ConstructionError, GraphError, PipBuildError, ProjectGraphError, SchedulingError};
pub use graph::{GraphAssembler, PipGraph, PipGraphInfo, PipNode, ProcessNode, ScheduledProcess};
pub use mount::{MountPathExpander, SemanticPathFlags, SemanticPathInfo};
pub use outputs::{MsBuildProjectOutputs, OutputsRegistry};
pub use pip::{DirectoryArtifact, DoubleWritePolicy, FileArtifact, Pip, PipId, PipType};
pub use resolver::DependencyResolver;
pub use settings::ResolverSettings;
pub use types::{Project, ProjectGraph, ProjectId, GRAPH_DISCRIMINATOR_PROPERTY};
