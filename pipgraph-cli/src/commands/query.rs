//! Query command - point lookups against a persisted pip graph.
//!
//! Opens the store read-only, so any number of queries can run next to each
//! other.
//!
//! Examples:
//!   pipgraph query info
//!   pipgraph query producer out/bin/a/a.dll
//!   pipgraph query consumers src/a/a.cs
//!   pipgraph query directory out/bin/a --seal 3
//!   pipgraph query pip Pip00000004
//!   pipgraph query hash 9c2f6a1e0b7d4c35

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pipgraph_core::hashing::short_token;
use pipgraph_core::{DirectoryArtifact, FileArtifact, PipId, PipNode};
use pipgraph_store::{PersistentGraphStore, META_POPULATED_AT};

use crate::output::{key_value_table, list_table, render, OutputFormat, TableDisplay};

#[derive(Subcommand, Debug)]
pub enum QueryTarget {
    /// Graph id, fingerprint, spec files and modules
    Info,

    /// Named roots and their semantic flags
    Mounts,

    /// One pip, by id (decimal or PipXXXXXXXX)
    Pip { id: String },

    /// Pips sharing a semistable hash (hex)
    Hash { hash: String },

    /// Every pip that writes a file, by rewrite count
    Producer { path: PathBuf },

    /// Pips that read a file
    Consumers {
        path: PathBuf,

        /// Only this version of the file (0 for a source file)
        #[arg(long)]
        rewrite: Option<u32>,
    },

    /// Producer and consumers of a sealed directory
    Directory {
        path: PathBuf,

        /// Seal id of the directory
        #[arg(long)]
        seal: u32,
    },
}

#[derive(Debug, Serialize)]
pub struct InfoResult {
    pub graph_id: String,
    pub fingerprint: String,
    pub node_count: u32,
    pub companion_moniker: String,
    pub spec_files: Vec<String>,
    pub modules: BTreeMap<String, String>,
    pub populated_at: Option<String>,
    pub record_count: usize,
}

impl TableDisplay for InfoResult {
    fn to_table(&self) -> String {
        let mut rows = vec![
            ("Graph", self.graph_id.clone()),
            ("Fingerprint", self.fingerprint.clone()),
            ("Pips", self.node_count.to_string()),
            ("Moniker", self.companion_moniker.clone()),
            ("Records", self.record_count.to_string()),
            (
                "Populated",
                self.populated_at.clone().unwrap_or_else(|| "-".to_string()),
            ),
        ];
        for (name, id) in &self.modules {
            rows.push(("Module", format!("{} ({})", name, id)));
        }
        let mut output = key_value_table(&rows);
        output.push_str(&format!(
            "\n\n{} ({})\n",
            "Spec Files".cyan().bold(),
            self.spec_files.len()
        ));
        for spec in &self.spec_files {
            output.push_str(&format!("  {}\n", spec));
        }
        output
    }
}

#[derive(Debug, Serialize)]
pub struct MountRow {
    pub name: String,
    pub root: String,
    pub flags: String,
}

#[derive(Debug, Serialize)]
pub struct MountsResult {
    pub mounts: Vec<MountRow>,
}

impl TableDisplay for MountsResult {
    fn to_table(&self) -> String {
        let rows: Vec<Vec<String>> = self
            .mounts
            .iter()
            .map(|m| vec![m.name.clone(), m.root.clone(), m.flags.clone()])
            .collect();
        list_table(&["Name", "Root", "Flags"], &rows)
    }
}

#[derive(Debug, Serialize)]
pub struct PipResult {
    pub id: String,
    pub pip_type: String,
    pub description: String,
    pub semistable_hash: String,
    pub node: PipNode,
}

impl TableDisplay for PipResult {
    fn to_table(&self) -> String {
        let mut rows = vec![
            ("Id", self.id.clone()),
            ("Type", self.pip_type.clone()),
            ("Description", self.description.clone()),
            ("Semistable hash", self.semistable_hash.clone()),
        ];
        match &self.node {
            PipNode::Process(process) => {
                let pip = &process.pip;
                rows.push(("Executable", pip.executable.display().to_string()));
                rows.push(("Working dir", pip.working_directory.display().to_string()));
                rows.push(("Arguments", pip.argument_values().join(" ")));
                if let Some(rsp) = &pip.response_file {
                    rows.push(("Response file", rsp.path.display().to_string()));
                }
                rows.push(("File inputs", pip.file_inputs.len().to_string()));
                rows.push(("Directory inputs", pip.directory_inputs.len().to_string()));
                rows.push(("File outputs", pip.file_outputs.len().to_string()));
                rows.push((
                    "Sealed directories",
                    process
                        .sealed_directories
                        .iter()
                        .map(|d| format!("{} [{}]", d.path.display(), d.seal_id))
                        .collect::<Vec<_>>()
                        .join("\n"),
                ));
                if let Some(cache) = &pip.cache_artifact {
                    rows.push(("Cache", cache.path.display().to_string()));
                }
                rows.push(("Spec", pip.provenance.spec_path.display().to_string()));
            }
            PipNode::SpecFile { path, module } => {
                rows.push(("Path", path.display().to_string()));
                rows.push(("Module", module.to_string()));
            }
            PipNode::Module { name, root } => {
                rows.push(("Name", name.clone()));
                rows.push(("Root", root.display().to_string()));
            }
        }
        key_value_table(&rows)
    }
}

#[derive(Debug, Serialize)]
pub struct RelationRow {
    pub role: String,
    /// Rewrite count for files, seal id for directories.
    pub version: u32,
    pub pip: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct RelationResult {
    pub subject: String,
    pub rows: Vec<RelationRow>,
}

impl TableDisplay for RelationResult {
    fn to_table(&self) -> String {
        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| {
                vec![
                    r.role.clone(),
                    r.version.to_string(),
                    r.pip.clone(),
                    r.description.clone(),
                ]
            })
            .collect();
        format!(
            "{}\n{}",
            self.subject.bold(),
            list_table(&["Role", "Version", "Pip", "Description"], &rows)
        )
    }
}

pub fn run(store_path: &Path, target: QueryTarget, format: OutputFormat) -> Result<()> {
    if !store_path.exists() {
        anyhow::bail!(
            "No graph store at {}. Run 'pipgraph build' first.",
            store_path.display()
        );
    }
    let store = PersistentGraphStore::open_read_only(store_path)?;

    let output = match target {
        QueryTarget::Info => render(&info(&store)?, format)?,
        QueryTarget::Mounts => render(&mounts(&store)?, format)?,
        QueryTarget::Pip { id } => {
            let id = parse_pip_id(&id).map_err(|e| anyhow::anyhow!(e))?;
            render(&pip(&store, id)?, format)?
        }
        QueryTarget::Hash { hash } => {
            let hash = parse_hash(&hash).map_err(|e| anyhow::anyhow!(e))?;
            render(&by_hash(&store, hash)?, format)?
        }
        QueryTarget::Producer { path } => render(&producers(&store, &absolute(&path)?)?, format)?,
        QueryTarget::Consumers { path, rewrite } => {
            render(&consumers(&store, &absolute(&path)?, rewrite)?, format)?
        }
        QueryTarget::Directory { path, seal } => {
            render(&directory(&store, &absolute(&path)?, seal)?, format)?
        }
    };
    println!("{}", output);
    Ok(())
}

fn info(store: &PersistentGraphStore) -> Result<InfoResult> {
    let info = store
        .graph_info()?
        .context("Graph store is not populated")?;
    Ok(InfoResult {
        graph_id: info.graph_id.to_string(),
        fingerprint: short_token(info.semistable_fingerprint),
        node_count: info.node_count,
        companion_moniker: info.companion_moniker,
        spec_files: info
            .spec_files
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        modules: info
            .modules
            .into_iter()
            .map(|(name, id)| (name, id.to_string()))
            .collect(),
        populated_at: store.metadata(META_POPULATED_AT)?,
        record_count: store.record_count()?,
    })
}

fn mounts(store: &PersistentGraphStore) -> Result<MountsResult> {
    let expander = store
        .mount_path_expander()?
        .context("Graph store is not populated")?;
    Ok(MountsResult {
        mounts: expander
            .mounts()
            .map(|m| MountRow {
                name: m.root_name.clone(),
                root: m.root.display().to_string(),
                flags: m.flags.to_string(),
            })
            .collect(),
    })
}

fn pip(store: &PersistentGraphStore, id: PipId) -> Result<PipResult> {
    let node = store
        .find_pip(id)?
        .with_context(|| format!("Pip not found: {}", id))?;
    Ok(PipResult {
        id: id.to_string(),
        pip_type: node.pip_type().to_string(),
        description: node.describe(),
        semistable_hash: short_token(node.semistable_hash()),
        node,
    })
}

fn describe(store: &PersistentGraphStore, id: PipId) -> Result<String> {
    Ok(store
        .find_pip(id)?
        .map(|node| node.describe())
        .unwrap_or_default())
}

fn row(store: &PersistentGraphStore, role: &str, version: u32, id: PipId) -> Result<RelationRow> {
    Ok(RelationRow {
        role: role.to_string(),
        version,
        pip: id.to_string(),
        description: describe(store, id)?,
    })
}

fn by_hash(store: &PersistentGraphStore, hash: u64) -> Result<RelationResult> {
    let mut rows = Vec::new();
    for id in store.pips_by_semistable_hash(hash)?.unwrap_or_default() {
        rows.push(row(store, "member", 0, id)?);
    }
    Ok(RelationResult {
        subject: format!("semistable hash {}", short_token(hash)),
        rows,
    })
}

fn producers(store: &PersistentGraphStore, path: &Path) -> Result<RelationResult> {
    let mut rows = Vec::new();
    for (rewrite_count, id) in store.file_producers_by_path(path)? {
        rows.push(row(store, "producer", rewrite_count, id)?);
    }
    Ok(RelationResult {
        subject: path.display().to_string(),
        rows,
    })
}

fn consumers(
    store: &PersistentGraphStore,
    path: &Path,
    rewrite: Option<u32>,
) -> Result<RelationResult> {
    // Without an explicit version, look at the source version and every produced one.
    let versions: Vec<u32> = match rewrite {
        Some(rewrite) => vec![rewrite],
        None => {
            let produced = store.file_producers_by_path(path)?.len() as u32;
            (0..=produced).collect()
        }
    };

    let mut rows = Vec::new();
    for rewrite_count in versions {
        let file = FileArtifact {
            path: path.to_path_buf(),
            rewrite_count,
        };
        for id in store.file_consumers(&file)?.unwrap_or_default() {
            rows.push(row(store, "consumer", rewrite_count, id)?);
        }
    }
    Ok(RelationResult {
        subject: path.display().to_string(),
        rows,
    })
}

fn directory(store: &PersistentGraphStore, path: &Path, seal: u32) -> Result<RelationResult> {
    let dir = DirectoryArtifact {
        path: path.to_path_buf(),
        seal_id: seal,
    };
    let mut rows = Vec::new();
    if let Some(id) = store.directory_producer(&dir)? {
        rows.push(row(store, "producer", seal, id)?);
    }
    for id in store.directory_consumers(&dir)?.unwrap_or_default() {
        rows.push(row(store, "consumer", seal, id)?);
    }
    Ok(RelationResult {
        subject: format!("{} [seal {}]", path.display(), seal),
        rows,
    })
}

/// Paths are stored absolute.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("Failed to read current directory")?
            .join(path))
    }
}

/// Accepts `42` or the display form `Pip0000002A`.
fn parse_pip_id(s: &str) -> Result<PipId, String> {
    let parsed = match s.strip_prefix("Pip") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed
        .map(PipId)
        .map_err(|_| format!("'{}' is not a valid pip id", s))
}

fn parse_hash(s: &str) -> Result<u64, String> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(hex, 16).map_err(|_| format!("'{}' is not a valid hex hash", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pip_id() {
        assert_eq!(parse_pip_id("42"), Ok(PipId(42)));
        assert_eq!(parse_pip_id("Pip0000002A"), Ok(PipId(42)));
        assert_eq!(parse_pip_id(&PipId(7).to_string()), Ok(PipId(7)));
        assert!(parse_pip_id("Pipxyz").is_err());
        assert!(parse_pip_id("-1").is_err());
    }

    #[test]
    fn test_parse_hash() {
        assert_eq!(parse_hash("ff"), Ok(255));
        assert_eq!(parse_hash("0x10"), Ok(16));
        assert_eq!(parse_hash(&short_token(u64::MAX)), Ok(u64::MAX));
        assert!(parse_hash("zz").is_err());
    }
}
