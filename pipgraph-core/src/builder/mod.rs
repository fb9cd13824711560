//! Pip construction: one project plus its built dependencies become one pip.
//!
//! The builder is pure with respect to the graph. It reads the published
//! outputs of dependencies from the registry and never mutates shared state,
//! so any number of projects of the same wave can be built concurrently.

mod arguments;
mod environment;
mod io;

pub use arguments::{LogFiles, LogVerbosity, RESPONSE_FILE_THRESHOLD};
pub use environment::{
    ASYNC_LOGGING_VARIABLE, DEBUG_ENGINE_VARIABLE, DEBUG_PATH_VARIABLE, HELPER_ENDPOINT_VARIABLE,
};

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::PipBuildError;
use crate::hashing::{identity_token, short_token};
use crate::mount::MountPathExpander;
use crate::outputs::OutputsRegistry;
use crate::pip::{ContainerIsolation, FileArtifact, FileOutput, OutputExistence, Pip, PipProvenance};
use crate::settings::ResolverSettings;
use crate::types::{ProjectGraph, ProjectId};

use arguments::{apply_response_file, build_arguments, IsolationArguments};
use environment::build_environment;
use io::{classify_inputs, output_directories, UntrackedLocations};

/// Builds pips for one resolver configuration.
pub struct PipBuilder<'s> {
    settings: &'s ResolverSettings,
    untracked: UntrackedLocations,
    mounts: MountPathExpander,
}

impl<'s> PipBuilder<'s> {
    pub fn new(settings: &'s ResolverSettings) -> Self {
        let has_git = settings.root.join(".git").exists();
        Self {
            settings,
            untracked: UntrackedLocations::from_settings(settings, has_git),
            mounts: MountPathExpander::from_settings(settings),
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        self.settings
    }

    /// Per-project directory name: `<stem>_<16 hex digits of the identity token>`.
    fn unique_directory_name(stem: &str, token: u64) -> String {
        format!("{}_{}", stem, short_token(token))
    }

    /// Build the pip of `id`.
    ///
    /// `dependencies` are the effective dependencies from the resolver; all of
    /// them must already have published outputs.
    pub fn build(
        &self,
        graph: &ProjectGraph,
        id: ProjectId,
        dependencies: &[ProjectId],
        registry: &OutputsRegistry,
    ) -> Result<Pip, PipBuildError> {
        let project = graph.get(id);
        let project_path = project.full_path.display().to_string();

        if !project.has_targets() {
            return Err(PipBuildError::NoTargets {
                project: project_path,
            });
        }
        let verbosity = LogVerbosity::parse(self.settings.log_verbosity.as_deref())?;

        let stem = project
            .full_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PipBuildError::Unexpected {
                project: project_path.clone(),
                message: "project path has no file name".to_string(),
            })?;
        let token = identity_token(project);
        let unique_name = Self::unique_directory_name(stem, token);

        let logs = LogFiles::new(
            self.settings.log_root().join(&unique_name),
            self.settings.enable_binary_log,
        );
        let builds_in_isolation = self.settings.builds_in_isolation(project);
        let cache_path = builds_in_isolation.then(|| {
            self.settings
                .object_root()
                .join(&unique_name)
                .join("msbuild.cache")
        });
        let engine_directory = self
            .settings
            .enable_engine_tracing
            .then(|| logs.directory.join("engine"));

        // Dependency consumption
        let mut directory_inputs = BTreeSet::new();
        let mut cache_inputs: Vec<FileArtifact> = Vec::new();
        let mut excluded_folders = project.predicted_output_folders.clone();
        for dep in dependencies {
            let outputs = registry.get(*dep).ok_or_else(|| {
                PipBuildError::MissingDependencyOutputs {
                    project: project_path.clone(),
                    dependency: graph.get(*dep).full_path.display().to_string(),
                }
            })?;
            directory_inputs.extend(outputs.output_directories.iter().cloned());
            if let Some(cache) = &outputs.cache_artifact {
                cache_inputs.push(cache.clone());
            }
            excluded_folders.extend(graph.get(*dep).predicted_output_folders.iter().cloned());
        }

        let inputs = classify_inputs(
            project,
            &excluded_folders,
            &self.untracked,
            &self.settings.generated_metadata_folder,
        );
        let mut file_inputs = inputs.declared;
        file_inputs.extend(cache_inputs.iter().cloned());

        let mut untracked_paths = self.untracked.paths.clone();
        untracked_paths.extend(inputs.untracked);

        // Outputs
        let directory_outputs = output_directories(project, self.settings, engine_directory.clone());
        for dir in &directory_outputs {
            if !self.mounts.is_writable(dir) {
                warn!(
                    "{}: output directory {} is not under a writable mount",
                    project.symbol(),
                    dir.display()
                );
            }
        }
        let mut file_outputs: Vec<FileOutput> = logs
            .all()
            .map(|path| FileOutput {
                artifact: FileArtifact::output(path.clone()),
                existence: OutputExistence::Optional,
            })
            .collect();
        let cache_artifact = cache_path.as_ref().map(|p| FileArtifact::output(p.clone()));
        if let Some(cache) = &cache_artifact {
            file_outputs.push(FileOutput {
                artifact: cache.clone(),
                existence: OutputExistence::Required,
            });
        }

        // Command line
        let isolation = IsolationArguments {
            input_caches: cache_inputs.iter().map(|c| c.path.as_path()).collect(),
            output_cache: cache_path.as_deref(),
        };
        let arguments = build_arguments(project, &logs, verbosity, &isolation);
        let (arguments, response_file) =
            apply_response_file(arguments, logs.directory.join("msbuild.rsp"));

        let environment = build_environment(project, self.settings, engine_directory.as_deref());

        debug!(
            "Built pip for {} ({} inputs, {} dependency directories, {} outputs)",
            project.symbol(),
            file_inputs.len(),
            directory_inputs.len(),
            directory_outputs.len()
        );

        Ok(Pip {
            executable: self.settings.msbuild_executable.clone(),
            working_directory: project.directory().to_path_buf(),
            arguments,
            response_file,
            environment,
            file_inputs,
            directory_inputs,
            file_outputs,
            directory_outputs,
            untracked_scopes: self.untracked.scopes.clone(),
            untracked_paths,
            cache_artifact,
            container_isolation: self
                .settings
                .run_in_container
                .then_some(ContainerIsolation::IsolateAllOutputs),
            double_write_policy: self.settings.double_write_policy,
            provenance: PipProvenance {
                spec_path: project.full_path.clone(),
                module: self.settings.module_name.clone(),
                symbol: project.symbol(),
            },
            identity_token: token,
        })
    }

    /// Log directory of a project, as used by `build`.
    pub fn log_directory(&self, graph: &ProjectGraph, id: ProjectId) -> Option<PathBuf> {
        let project = graph.get(id);
        let stem = project.full_path.file_stem()?.to_str()?;
        Some(
            self.settings
                .log_root()
                .join(Self::unique_directory_name(stem, identity_token(project))),
        )
    }
}
