//! Error types for pipgraph-core.
//!
//! Failures are local to one project unless they are contract violations:
//! those mean the caller broke the dependency-order guarantee and the whole
//! construction is abandoned.

use std::path::PathBuf;
use thiserror::Error;

use crate::pip::PipId;

/// Errors detected while loading or validating the predicted project graph.
#[derive(Error, Debug)]
pub enum ProjectGraphError {
    /// A project reference points outside the project list.
    #[error("Project {project} references unknown project index {reference}")]
    DanglingReference {
        /// Path of the referencing project.
        project: String,
        /// The offending index.
        reference: usize,
    },

    /// The reference graph is not acyclic.
    #[error("Project reference cycle detected at {project}")]
    Cycle {
        /// A project that participates in the cycle.
        project: String,
    },

    /// The project list could not be decoded.
    #[error("Failed to parse project graph: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced while translating one project into a pip.
#[derive(Error, Debug)]
pub enum PipBuildError {
    /// Invalid resolver configuration, e.g. an unknown log verbosity.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The project has nothing to build.
    #[error("Project {project} has no predicted targets")]
    NoTargets {
        /// Path of the project.
        project: String,
    },

    /// A resolved dependency has not published its outputs yet.
    #[error("Outputs of dependency {dependency} are not published (required by {project})")]
    MissingDependencyOutputs {
        /// Path of the project being built.
        project: String,
        /// Path of the dependency whose outputs are missing.
        dependency: String,
    },

    /// Anything else that went wrong during construction.
    #[error("Unexpected failure constructing {project}: {message}")]
    Unexpected {
        /// Path of the project being built.
        project: String,
        /// Full description of the failure.
        message: String,
    },
}

impl PipBuildError {
    /// Whether this error means the caller violated the dependency-order contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, PipBuildError::MissingDependencyOutputs { .. })
    }
}

/// Errors raised by the graph assembler or the outputs registry.
#[derive(Error, Debug)]
pub enum GraphError {
    /// An input was declared before anything produced it.
    #[error("{pip}: input {path} has no registered producer")]
    MissingProducer {
        /// Symbol of the rejected pip.
        pip: String,
        /// The unproduced input.
        path: PathBuf,
    },

    /// An output file is already produced and the pip forbids double writes.
    #[error("{pip}: {path} is already produced by {producer}")]
    DoubleWrite {
        /// Symbol of the rejected pip.
        pip: String,
        /// The contested output.
        path: PathBuf,
        /// The pip that already produces it.
        producer: PipId,
    },

    /// A project's outputs were published twice.
    #[error("Outputs for {project} were already published")]
    DuplicatePublication {
        /// Path of the project.
        project: String,
    },
}

impl GraphError {
    /// Whether this error means the caller violated the dependency-order contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            GraphError::MissingProducer { .. } | GraphError::DuplicatePublication { .. }
        )
    }
}

/// Error scheduling a single project: building its pip or adding it to the graph.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error(transparent)]
    Build(#[from] PipBuildError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl SchedulingError {
    pub fn is_contract_violation(&self) -> bool {
        match self {
            SchedulingError::Build(e) => e.is_contract_violation(),
            SchedulingError::Graph(e) => e.is_contract_violation(),
        }
    }
}

/// Fatal errors that abort a whole graph construction.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error(transparent)]
    ProjectGraph(#[from] ProjectGraphError),

    /// A contract violation surfaced while scheduling a project.
    #[error("Contract violation while scheduling {project}: {source}")]
    ContractViolation {
        /// Path of the project being scheduled.
        project: String,
        /// The underlying violation.
        #[source]
        source: SchedulingError,
    },

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
