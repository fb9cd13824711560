//! Build command - construct the pip graph for a project set and persist it.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use pipgraph_core::hashing::short_token;
use pipgraph_core::{ConstructionOutcome, GraphConstruction, ProjectGraph};
use pipgraph_store::PersistentGraphStore;

use crate::config::PipgraphConfig;
use crate::output::{render, OutputFormat, TableDisplay};

/// Arguments of one `pipgraph build` invocation.
pub struct BuildArgs {
    pub projects: PathBuf,
    pub root: PathBuf,
    pub store: Option<PathBuf>,
    pub threads: Option<usize>,
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct ScheduledRow {
    pub project: String,
    pub symbol: String,
    pub pip: String,
}

#[derive(Debug, Serialize)]
pub struct FailureRow {
    pub project: String,
    pub message: String,
}

/// Result of a build
#[derive(Debug, Serialize)]
pub struct BuildResult {
    pub success: bool,
    pub root_path: String,
    pub graph_id: String,
    pub fingerprint: String,
    pub project_count: usize,
    pub scheduled: usize,
    pub node_count: usize,
    pub pips: Vec<ScheduledRow>,
    pub failures: Vec<FailureRow>,
    pub skipped: Vec<String>,
    pub store_path: Option<String>,
    pub records_written: Option<usize>,
    pub duration_ms: u64,
}

impl TableDisplay for BuildResult {
    fn to_table(&self) -> String {
        let mut output = String::new();

        if self.success {
            output.push_str(&format!(
                "{} Pip graph constructed\n",
                "SUCCESS:".green().bold()
            ));
        } else {
            output.push_str(&format!(
                "{} {} project(s) failed, {} skipped\n",
                "ERROR:".red().bold(),
                self.failures.len(),
                self.skipped.len()
            ));
        }

        output.push_str(&format!("\n{}\n", "Summary".cyan().bold()));
        output.push_str(&format!("  Root:        {}\n", self.root_path));
        output.push_str(&format!("  Graph:       {}\n", self.graph_id));
        output.push_str(&format!("  Fingerprint: {}\n", self.fingerprint));
        output.push_str(&format!(
            "  Duration:    {}ms\n",
            self.duration_ms.to_string().yellow()
        ));

        output.push_str(&format!("\n{}\n", "Graph".cyan().bold()));
        output.push_str(&format!("  Projects:  {}\n", self.project_count));
        output.push_str(&format!(
            "  Scheduled: {}\n",
            self.scheduled.to_string().green()
        ));
        output.push_str(&format!("  Pips:      {}\n", self.node_count));

        if let (Some(path), Some(records)) = (&self.store_path, self.records_written) {
            output.push_str(&format!("\n{}\n", "Store".cyan().bold()));
            output.push_str(&format!("  Path:    {}\n", path));
            output.push_str(&format!("  Records: {}\n", records.to_string().green()));
        }

        if !self.failures.is_empty() {
            output.push_str(&format!("\n{}\n", "Failures".red().bold()));
            for failure in &self.failures {
                output.push_str(&format!("  {}: {}\n", failure.project, failure.message));
            }
        }
        if !self.skipped.is_empty() {
            output.push_str(&format!("\n{}\n", "Skipped".yellow().bold()));
            for project in &self.skipped {
                output.push_str(&format!("  {}\n", project));
            }
        }

        output
    }
}

pub fn run(args: BuildArgs, config: &PipgraphConfig, format: OutputFormat) -> Result<()> {
    let start = Instant::now();

    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("Build root does not exist: {}", args.root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("Build root is not a directory: {}", root.display());
    }

    let json = fs::read_to_string(&args.projects)
        .with_context(|| format!("Failed to read {}", args.projects.display()))?;
    let projects = ProjectGraph::from_json(&json)
        .with_context(|| format!("Invalid project graph in {}", args.projects.display()))?;
    tracing::info!("Loaded {} projects from {:?}", projects.len(), args.projects);

    let settings = config.resolver_settings(&root);
    let threads = args.threads.or(config.build.threads);
    let outcome = GraphConstruction::new(&projects, &settings).construct(threads)?;

    let store_path = if args.dry_run {
        None
    } else {
        Some(
            args.store
                .clone()
                .unwrap_or_else(|| config.store_path(&root)),
        )
    };

    // An incomplete graph is never persisted.
    let records_written = match &store_path {
        Some(path) if outcome.is_success() => Some(persist(&outcome, path, args.force)?),
        _ => None,
    };

    let result = summarize(
        &root,
        &projects,
        &outcome,
        store_path.filter(|_| records_written.is_some()),
        records_written,
        start.elapsed().as_millis() as u64,
    );
    println!("{}", render(&result, format)?);

    if !result.success {
        anyhow::bail!(
            "Graph construction failed for {} project(s)",
            result.failures.len() + result.skipped.len()
        );
    }
    Ok(())
}

fn persist(outcome: &ConstructionOutcome, path: &Path, force: bool) -> Result<usize> {
    if path.exists() {
        if !force {
            anyhow::bail!(
                "Graph store already exists: {}. Use --force to replace it.",
                path.display()
            );
        }
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        let wal = wal_path(path);
        if wal.exists() {
            fs::remove_file(&wal)
                .with_context(|| format!("Failed to remove {}", wal.display()))?;
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = PersistentGraphStore::create(path)?;
    store.write(&outcome.graph)
}

fn wal_path(path: &Path) -> PathBuf {
    let mut wal = path.as_os_str().to_owned();
    wal.push(".wal");
    PathBuf::from(wal)
}

fn summarize(
    root: &Path,
    projects: &ProjectGraph,
    outcome: &ConstructionOutcome,
    store_path: Option<PathBuf>,
    records_written: Option<usize>,
    duration_ms: u64,
) -> BuildResult {
    BuildResult {
        success: outcome.is_success(),
        root_path: root.display().to_string(),
        graph_id: outcome.graph.graph_id().to_string(),
        fingerprint: short_token(outcome.graph.fingerprint()),
        project_count: projects.len(),
        scheduled: outcome.scheduled.len(),
        node_count: outcome.graph.node_count(),
        pips: outcome
            .scheduled
            .iter()
            .map(|(project, pip)| {
                let project = projects.get(*project);
                ScheduledRow {
                    project: project.full_path.display().to_string(),
                    symbol: project.symbol(),
                    pip: pip.to_string(),
                }
            })
            .collect(),
        failures: outcome
            .failures
            .iter()
            .map(|f| FailureRow {
                project: f.path.display().to_string(),
                message: f.message.clone(),
            })
            .collect(),
        skipped: outcome
            .skipped
            .iter()
            .map(|id| projects.get(*id).full_path.display().to_string())
            .collect(),
        store_path: store_path.map(|p| p.display().to_string()),
        records_written,
        duration_ms,
    }
}
