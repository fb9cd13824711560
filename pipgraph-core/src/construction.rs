//! Construction session: drives every project through the pipeline.
//!
//! Projects are scheduled in dependency waves. A wave holds the projects
//! whose references all sit in earlier waves, so its members can be built in
//! parallel on the rayon pool while everything they consume is already
//! published. Failures stay local to their project; dependents of a failed
//! project are skipped. Contract violations abort the whole session.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use crate::builder::PipBuilder;
use crate::error::{ConstructionError, SchedulingError};
use crate::graph::{GraphAssembler, PipGraph, ScheduledProcess};
use crate::mount::MountPathExpander;
use crate::outputs::{MsBuildProjectOutputs, OutputsRegistry};
use crate::pip::PipId;
use crate::resolver::DependencyResolver;
use crate::settings::ResolverSettings;
use crate::types::{ProjectGraph, ProjectId};

/// A project whose pip could not be constructed.
#[derive(Clone, Debug)]
pub struct ProjectFailure {
    pub project: ProjectId,
    pub path: PathBuf,
    pub message: String,
}

/// Everything a finished session produced.
pub struct ConstructionOutcome {
    pub graph: PipGraph,
    /// Process pip of every successfully scheduled project.
    pub scheduled: BTreeMap<ProjectId, PipId>,
    pub failures: Vec<ProjectFailure>,
    /// Projects not attempted because a dependency failed.
    pub skipped: Vec<ProjectId>,
}

impl ConstructionOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

enum WaveResult {
    Scheduled(ScheduledProcess),
    Failed(SchedulingError),
    Panicked(String),
}

/// One construction over one project graph.
pub struct GraphConstruction<'a> {
    graph: &'a ProjectGraph,
    settings: &'a ResolverSettings,
    resolver: DependencyResolver<'a>,
    builder: PipBuilder<'a>,
    registry: OutputsRegistry,
    assembler: GraphAssembler,
}

impl<'a> GraphConstruction<'a> {
    pub fn new(graph: &'a ProjectGraph, settings: &'a ResolverSettings) -> Self {
        Self {
            graph,
            settings,
            resolver: DependencyResolver::new(graph, settings.enable_transitive_project_references),
            builder: PipBuilder::new(settings),
            registry: OutputsRegistry::new(),
            assembler: GraphAssembler::new(MountPathExpander::from_settings(settings)),
        }
    }

    /// Outputs published so far.
    pub fn registry(&self) -> &OutputsRegistry {
        &self.registry
    }

    /// Build every project and freeze the graph.
    ///
    /// `num_threads` of `None` or zero uses the global rayon pool.
    pub fn construct(self, num_threads: Option<usize>) -> Result<ConstructionOutcome, ConstructionError> {
        let pool = match num_threads {
            Some(n) if n > 0 => Some(rayon::ThreadPoolBuilder::new().num_threads(n).build()?),
            _ => None,
        };

        let module = self
            .assembler
            .add_module(&self.settings.module_name, &self.settings.root);
        for (_, project) in self.graph.projects() {
            self.assembler.add_spec_file(&project.full_path, module);
        }

        let waves = self.waves();
        tracing::info!(
            "Constructing {} projects in {} waves",
            self.graph.len(),
            waves.len()
        );

        let mut scheduled = BTreeMap::new();
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        let mut unavailable: BTreeSet<ProjectId> = BTreeSet::new();

        for wave in waves {
            let mut runnable = Vec::with_capacity(wave.len());
            for id in wave {
                let deps = self.resolver.effective_dependencies(id);
                if deps.iter().any(|d| unavailable.contains(d)) {
                    tracing::warn!(
                        "Skipping {}: a dependency failed",
                        self.graph.get(id).full_path.display()
                    );
                    unavailable.insert(id);
                    skipped.push(id);
                } else {
                    runnable.push((id, deps));
                }
            }

            let run = |(id, deps): &(ProjectId, Vec<ProjectId>)| {
                (*id, isolate(|| self.schedule_project(*id, deps)))
            };
            let results: Vec<(ProjectId, WaveResult)> = match &pool {
                Some(pool) => pool.install(|| runnable.par_iter().map(run).collect()),
                None => runnable.par_iter().map(run).collect(),
            };

            for (id, result) in results {
                let path = self.graph.get(id).full_path.clone();
                match result {
                    WaveResult::Scheduled(process) => {
                        scheduled.insert(id, process.id);
                    }
                    WaveResult::Failed(e) if e.is_contract_violation() => {
                        return Err(ConstructionError::ContractViolation {
                            project: path.display().to_string(),
                            source: e,
                        });
                    }
                    WaveResult::Failed(e) => {
                        tracing::error!("Failed to construct pip for {}: {:?}", path.display(), e);
                        unavailable.insert(id);
                        failures.push(ProjectFailure {
                            project: id,
                            path,
                            message: e.to_string(),
                        });
                    }
                    WaveResult::Panicked(message) => {
                        tracing::error!(
                            "Unexpected failure constructing pip for {}: {}",
                            path.display(),
                            message
                        );
                        unavailable.insert(id);
                        failures.push(ProjectFailure {
                            project: id,
                            path,
                            message,
                        });
                    }
                }
            }
        }

        let graph = self.assembler.seal();
        tracing::info!(
            "Scheduled {} projects ({} failed, {} skipped)",
            scheduled.len(),
            failures.len(),
            skipped.len()
        );

        Ok(ConstructionOutcome {
            graph,
            scheduled,
            failures,
            skipped,
        })
    }

    /// Schedulable projects grouped by dependency depth.
    fn waves(&self) -> Vec<Vec<ProjectId>> {
        let mut depth: BTreeMap<ProjectId, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<ProjectId>> = Vec::new();

        for &id in self.graph.topological_order() {
            let project = self.graph.get(id);
            let level = project
                .references
                .iter()
                .filter_map(|r| depth.get(r))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id, level);

            if !project.has_targets() {
                tracing::debug!("{} has no predicted targets, not scheduled", project.full_path.display());
                continue;
            }
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(id);
        }

        waves.retain(|wave| !wave.is_empty());
        waves
    }

    fn schedule_project(&self, id: ProjectId, deps: &[ProjectId]) -> Result<ScheduledProcess, SchedulingError> {
        let pip = self.builder.build(self.graph, id, deps, &self.registry)?;
        let process = self.assembler.add_process(pip)?;
        self.registry.publish(
            self.graph,
            id,
            MsBuildProjectOutputs {
                output_directories: process.outputs.directories.clone(),
                cache_artifact: process.outputs.cache_artifact.clone(),
            },
        )?;
        Ok(process)
    }
}

/// Run one scheduling step, turning a panic into a local failure.
fn isolate<F>(step: F) -> WaveResult
where
    F: FnOnce() -> Result<ScheduledProcess, SchedulingError>,
{
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(process)) => WaveResult::Scheduled(process),
        Ok(Err(e)) => WaveResult::Failed(e),
        Err(payload) => WaveResult::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pip::DoubleWritePolicy;
    use crate::types::Project;

    fn chain() -> ProjectGraph {
        ProjectGraph::new(vec![
            Project::new("/repo/src/a/a.csproj").with_targets(["Build"]),
            Project::new("/repo/src/b/b.csproj")
                .with_targets(["Build"])
                .with_reference(ProjectId(0)),
            Project::new("/repo/src/c/c.csproj")
                .with_targets(["Build"])
                .with_reference(ProjectId(1)),
            Project::new("/repo/src/d/d.csproj").with_targets(["Build"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_waves_follow_dependency_depth() {
        let graph = chain();
        let settings = ResolverSettings::with_root("/repo");
        let session = GraphConstruction::new(&graph, &settings);
        let mut waves = session.waves();
        assert_eq!(waves.len(), 3);
        waves[0].sort();
        assert_eq!(waves[0], vec![ProjectId(0), ProjectId(3)]);
        assert_eq!(waves[1], vec![ProjectId(1)]);
        assert_eq!(waves[2], vec![ProjectId(2)]);
    }

    #[test]
    fn test_construct_chain() {
        let graph = chain();
        let settings = ResolverSettings::with_root("/repo");
        let outcome = GraphConstruction::new(&graph, &settings)
            .construct(Some(2))
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.scheduled.len(), 4);
        // Module, four spec files, four processes
        assert_eq!(outcome.graph.node_count(), 9);

        let c = outcome.scheduled[&ProjectId(2)];
        let b = outcome.scheduled[&ProjectId(1)];
        assert!(outcome.graph.upstream(c).contains(&b));
    }

    #[test]
    fn test_local_failure_skips_dependents_only() {
        let graph = chain();
        let settings = ResolverSettings {
            log_verbosity: Some("loud".into()),
            ..ResolverSettings::with_root("/repo")
        };
        let outcome = GraphConstruction::new(&graph, &settings)
            .construct(None)
            .unwrap();
        // Every root fails on the bad verbosity, their dependents are skipped
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.skipped, vec![ProjectId(1), ProjectId(2)]);
        assert!(outcome.scheduled.is_empty());
    }

    #[test]
    fn test_local_failure_leaves_siblings_scheduled() {
        let graph = ProjectGraph::new(vec![
            // No file name to derive the log directory from
            Project::new("/").with_targets(["Build"]),
            Project::new("/repo/src/b/b.csproj").with_targets(["Build"]),
            Project::new("/repo/src/c/c.csproj")
                .with_targets(["Build"])
                .with_reference(ProjectId(0)),
        ])
        .unwrap();
        let settings = ResolverSettings::with_root("/repo");
        let outcome = GraphConstruction::new(&graph, &settings)
            .construct(Some(2))
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].project, ProjectId(0));
        assert!(outcome.failures[0].message.contains("no file name"));
        assert_eq!(outcome.skipped, vec![ProjectId(2)]);
        assert_eq!(outcome.scheduled.keys().copied().collect::<Vec<_>>(), vec![ProjectId(1)]);
    }

    #[test]
    fn test_double_write_is_local_failure() {
        let a = Project::new("/repo/src/a/a.csproj").with_targets(["Build"]);
        let graph = ProjectGraph::new(vec![
            a.clone(),
            a,
            Project::new("/repo/src/b/b.csproj").with_targets(["Build"]),
        ])
        .unwrap();
        let settings = ResolverSettings {
            double_write_policy: DoubleWritePolicy::DoubleWritesAreErrors,
            ..ResolverSettings::with_root("/repo")
        };
        let outcome = GraphConstruction::new(&graph, &settings)
            .construct(None)
            .unwrap();

        // The identical evaluations write the same log files; one of them loses
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.scheduled.len(), 2);
        assert!(outcome.scheduled.contains_key(&ProjectId(2)));
    }

    #[test]
    fn test_isolate_catches_panics() {
        let result = isolate(|| panic!("evaluation exploded"));
        match result {
            WaveResult::Panicked(message) => assert_eq!(message, "evaluation exploded"),
            _ => panic!("expected a caught panic"),
        }

        let result = isolate(|| {
            Err(SchedulingError::Build(crate::error::PipBuildError::NoTargets {
                project: "/repo/a.csproj".to_string(),
            }))
        });
        assert!(matches!(result, WaveResult::Failed(_)));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
