//! Record keys and value layouts.
//!
//! Keys are tagged enums encoded with bincode's standard configuration, so
//! equal keys always encode to equal bytes and can be looked up directly.
//! Pip values are decoded against the pip type carried in their key.

use anyhow::{Context, Result};
use pipgraph_core::{
    DirectoryArtifact, FileArtifact, MountPathExpander, PipId, PipNode, PipType, ProcessNode,
    SemanticPathInfo,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Which graph-level record a metadata key names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphMetadataKind {
    PipGraph,
    MountPathExpander,
}

/// Side of a producer/consumer relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Producer,
    Consumer,
}

/// Key of one store record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKey {
    /// Value: `PipGraphInfo` or `MountPathExpander`.
    GraphMetadata(GraphMetadataKind),
    /// Value: list of pip ids. The zero hash lists every non-process pip.
    PipSemistableHash(u64),
    /// Value: the pip record for `pip_type`.
    PipId { id: u32, pip_type: PipType },
    /// Value: one pip id for producers, a non-empty id list for consumers.
    FileProducerConsumer {
        role: Role,
        path: String,
        rewrite_count: u32,
    },
    /// Value: one pip id for producers, a non-empty id list for consumers.
    DirectoryProducerConsumer {
        role: Role,
        path: String,
        seal_id: u32,
    },
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl StoreKey {
    pub fn pip(id: PipId, pip_type: PipType) -> Self {
        StoreKey::PipId {
            id: id.0,
            pip_type,
        }
    }

    pub fn file(role: Role, file: &FileArtifact) -> Self {
        StoreKey::FileProducerConsumer {
            role,
            path: path_key(&file.path),
            rewrite_count: file.rewrite_count,
        }
    }

    pub fn directory(role: Role, dir: &DirectoryArtifact) -> Self {
        StoreKey::DirectoryProducerConsumer {
            role,
            path: path_key(&dir.path),
            seal_id: dir.seal_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self).context("Failed to encode store key")
    }
}

/// Spec-file pip record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecFileRecord {
    pub path: PathBuf,
    pub module: PipId,
}

/// Module pip record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub root: PathBuf,
}

/// Mount table record: the derived root sets next to the mounts themselves,
/// so readers need not recompute them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountTableRecord {
    pub writable_roots: BTreeSet<PathBuf>,
    pub create_allowed_roots: BTreeSet<PathBuf>,
    pub scrubbable_roots: BTreeSet<PathBuf>,
    pub all_roots: BTreeSet<PathBuf>,
    pub mounts: Vec<SemanticPathInfo>,
}

impl From<&MountPathExpander> for MountTableRecord {
    fn from(expander: &MountPathExpander) -> Self {
        Self {
            writable_roots: expander.writable_roots(),
            create_allowed_roots: expander.create_allowed_roots(),
            scrubbable_roots: expander.scrubbable_roots(),
            all_roots: expander.all_roots(),
            mounts: expander.mounts().cloned().collect(),
        }
    }
}

impl MountTableRecord {
    pub fn to_expander(&self) -> MountPathExpander {
        let mut expander = MountPathExpander::new();
        for info in &self.mounts {
            expander.add(&info.root_name, &info.root, info.flags);
        }
        expander
    }
}

/// Encode any record with the store's bincode configuration.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .context("Failed to encode record")
}

/// Decode a record, rejecting trailing bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("Failed to decode record")?;
    if read != bytes.len() {
        anyhow::bail!("Record has {} trailing bytes", bytes.len() - read);
    }
    Ok(value)
}

/// Encode a pip node without its variant tag; the key carries the type.
pub fn encode_pip(node: &PipNode) -> Result<Vec<u8>> {
    match node {
        PipNode::Process(process) => encode(process.as_ref()),
        PipNode::SpecFile { path, module } => encode(&SpecFileRecord {
            path: path.clone(),
            module: *module,
        }),
        PipNode::Module { name, root } => encode(&ModuleRecord {
            name: name.clone(),
            root: root.clone(),
        }),
    }
}

/// Decode a pip value against the type from its key.
pub fn decode_pip(pip_type: PipType, bytes: &[u8]) -> Result<PipNode> {
    let node = match pip_type {
        PipType::Process => PipNode::Process(Box::new(decode::<ProcessNode>(bytes)?)),
        PipType::SpecFile => {
            let record: SpecFileRecord = decode(bytes)?;
            PipNode::SpecFile {
                path: record.path,
                module: record.module,
            }
        }
        PipType::Module => {
            let record: ModuleRecord = decode(bytes)?;
            PipNode::Module {
                name: record.name,
                root: record.root,
            }
        }
    };
    Ok(node)
}
