//! Graph assembly and the sealed pip graph.
//!
//! The `GraphAssembler` accepts pips in dependency order, gives each one an
//! id and (for processes) a semistable hash, seals its output directories and
//! records producer/consumer relations. It validates the order, it does not
//! sort: a pip consuming something nobody produced yet is rejected.
//!
//! `seal` freezes the result into a `PipGraph`, which answers producer,
//! consumer and upstream/downstream queries.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use uuid::Uuid;

use crate::error::GraphError;
use crate::hashing::{graph_fingerprint, semistable_hash};
use crate::mount::MountPathExpander;
use crate::pip::{DirectoryArtifact, FileArtifact, Pip, PipId, PipType};

/// A process pip after it entered the graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessNode {
    /// The pip, with output rewrite counts as assigned by the assembler.
    pub pip: Pip,
    pub semistable_hash: u64,
    /// Sealed shared opaque directories, one per declared directory output.
    pub sealed_directories: Vec<DirectoryArtifact>,
}

/// A node of the pip graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipNode {
    Process(Box<ProcessNode>),
    SpecFile { path: PathBuf, module: PipId },
    Module { name: String, root: PathBuf },
}

impl PipNode {
    pub fn pip_type(&self) -> PipType {
        match self {
            PipNode::Process(_) => PipType::Process,
            PipNode::SpecFile { .. } => PipType::SpecFile,
            PipNode::Module { .. } => PipType::Module,
        }
    }

    /// Zero for every non-process pip.
    pub fn semistable_hash(&self) -> u64 {
        match self {
            PipNode::Process(process) => process.semistable_hash,
            _ => 0,
        }
    }

    pub fn as_process(&self) -> Option<&ProcessNode> {
        match self {
            PipNode::Process(process) => Some(process),
            _ => None,
        }
    }

    /// Short human-readable description.
    pub fn describe(&self) -> String {
        match self {
            PipNode::Process(process) => process.pip.provenance.symbol.clone(),
            PipNode::SpecFile { path, .. } => path.display().to_string(),
            PipNode::Module { name, .. } => name.clone(),
        }
    }
}

/// What a newly added process produces, with final rewrite counts and seal ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutputs {
    pub directories: Vec<DirectoryArtifact>,
    pub files: Vec<FileArtifact>,
    pub cache_artifact: Option<FileArtifact>,
}

/// Result of a successful `add_process`.
#[derive(Clone, Debug)]
pub struct ScheduledProcess {
    pub id: PipId,
    pub semistable_hash: u64,
    pub outputs: ProcessOutputs,
}

/// Producer/consumer tables and the dependency graph.
#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<PipId, PipNode>,
    modules: BTreeMap<String, PipId>,
    file_producers: HashMap<FileArtifact, PipId>,
    file_consumers: HashMap<FileArtifact, Vec<PipId>>,
    latest_rewrite: HashMap<PathBuf, u32>,
    directory_producers: HashMap<DirectoryArtifact, PipId>,
    directory_consumers: HashMap<DirectoryArtifact, Vec<PipId>>,
    dependencies: DiGraph<PipId, ()>,
    node_index: HashMap<PipId, NodeIndex>,
    next_seal_id: u32,
}

impl GraphState {
    fn add_node(&mut self, id: PipId, node: PipNode) {
        let index = self.dependencies.add_node(id);
        self.node_index.insert(id, index);
        self.nodes.insert(id, node);
    }

    fn add_edge(&mut self, producer: PipId, consumer: PipId) {
        if let (Some(&p), Some(&c)) = (self.node_index.get(&producer), self.node_index.get(&consumer)) {
            self.dependencies.update_edge(p, c, ());
        }
    }
}

/// Accepts pips in dependency order. Safe to share between worker threads.
pub struct GraphAssembler {
    next_id: AtomicU32,
    spec_files: RwLock<HashSet<PathBuf>>,
    state: Mutex<GraphState>,
    mounts: MountPathExpander,
}

impl GraphAssembler {
    pub fn new(mounts: MountPathExpander) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            spec_files: RwLock::new(HashSet::new()),
            state: Mutex::new(GraphState {
                next_seal_id: 1,
                ..GraphState::default()
            }),
            mounts,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovering from poisoned graph state mutex");
            poisoned.into_inner()
        })
    }

    fn allocate_id(&self) -> PipId {
        PipId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Number of nodes added so far.
    pub fn node_count(&self) -> usize {
        (self.next_id.load(Ordering::SeqCst) - 1) as usize
    }

    /// Register a module, or return the existing node for the name.
    pub fn add_module(&self, name: &str, root: &Path) -> PipId {
        let mut state = self.lock();
        if let Some(id) = state.modules.get(name) {
            return *id;
        }
        let id = self.allocate_id();
        state.add_node(
            id,
            PipNode::Module {
                name: name.to_string(),
                root: root.to_path_buf(),
            },
        );
        state.modules.insert(name.to_string(), id);
        id
    }

    /// Register a spec file. Registering the same path twice is a no-op and
    /// returns `None`.
    pub fn add_spec_file(&self, path: &Path, module: PipId) -> Option<PipId> {
        if self
            .spec_files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
        {
            return None;
        }
        if !self
            .spec_files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf())
        {
            return None;
        }

        let mut state = self.lock();
        let id = self.allocate_id();
        state.add_node(
            id,
            PipNode::SpecFile {
                path: path.to_path_buf(),
                module,
            },
        );
        Some(id)
    }

    /// Add a process pip whose inputs are all produced already.
    pub fn add_process(&self, mut pip: Pip) -> Result<ScheduledProcess, GraphError> {
        let symbol = pip.provenance.symbol.clone();
        let mut state = self.lock();

        // Validate before mutating anything
        for dir in &pip.directory_inputs {
            if !state.directory_producers.contains_key(dir) {
                return Err(GraphError::MissingProducer {
                    pip: symbol,
                    path: dir.path.clone(),
                });
            }
        }
        for file in pip.file_inputs.iter().filter(|f| f.is_output()) {
            if !state.file_producers.contains_key(file) {
                return Err(GraphError::MissingProducer {
                    pip: symbol,
                    path: file.path.clone(),
                });
            }
        }
        let mut rewrites = Vec::with_capacity(pip.file_outputs.len());
        for output in &pip.file_outputs {
            let path = &output.artifact.path;
            let rewrite = match state.latest_rewrite.get(path) {
                None => 1,
                Some(latest) if pip.double_write_policy.allows_double_writes() => latest + 1,
                Some(latest) => {
                    let producer = state.file_producers[&FileArtifact {
                        path: path.clone(),
                        rewrite_count: *latest,
                    }];
                    return Err(GraphError::DoubleWrite {
                        pip: symbol,
                        path: path.clone(),
                        producer,
                    });
                }
            };
            rewrites.push(rewrite);
        }

        for (output, rewrite) in pip.file_outputs.iter_mut().zip(rewrites) {
            output.artifact.rewrite_count = rewrite;
        }
        if let Some(cache) = pip.cache_artifact.as_mut() {
            if let Some(output) = pip.file_outputs.iter().find(|o| o.artifact.path == cache.path) {
                cache.rewrite_count = output.artifact.rewrite_count;
            }
        }

        let id = self.allocate_id();
        let hash = semistable_hash(&pip);

        let mut sealed = Vec::with_capacity(pip.directory_outputs.len());
        for path in &pip.directory_outputs {
            let artifact = DirectoryArtifact {
                path: path.clone(),
                seal_id: state.next_seal_id,
            };
            state.next_seal_id += 1;
            state.directory_producers.insert(artifact.clone(), id);
            sealed.push(artifact);
        }

        let files: Vec<FileArtifact> = pip.file_outputs.iter().map(|o| o.artifact.clone()).collect();
        for file in &files {
            state.file_producers.insert(file.clone(), id);
            state.latest_rewrite.insert(file.path.clone(), file.rewrite_count);
        }

        let outputs = ProcessOutputs {
            directories: sealed.clone(),
            files,
            cache_artifact: pip.cache_artifact.clone(),
        };
        let directory_inputs: Vec<DirectoryArtifact> = pip.directory_inputs.iter().cloned().collect();
        let file_inputs: Vec<FileArtifact> = pip.file_inputs.iter().cloned().collect();

        state.add_node(
            id,
            PipNode::Process(Box::new(ProcessNode {
                pip,
                semistable_hash: hash,
                sealed_directories: sealed,
            })),
        );

        for dir in directory_inputs {
            let producer = state.directory_producers[&dir];
            state.add_edge(producer, id);
            state.directory_consumers.entry(dir).or_default().push(id);
        }
        for file in file_inputs {
            if let Some(&producer) = state.file_producers.get(&file) {
                state.add_edge(producer, id);
            }
            state.file_consumers.entry(file).or_default().push(id);
        }

        tracing::debug!("Added {} as {} (hash {:016X})", symbol, id, hash);
        Ok(ScheduledProcess {
            id,
            semistable_hash: hash,
            outputs,
        })
    }

    /// Freeze the graph. No further pips can be added.
    pub fn seal(self) -> PipGraph {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let spec_files: BTreeSet<PathBuf> = self
            .spec_files
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .collect();

        let fingerprint = graph_fingerprint(state.nodes.values().map(PipNode::semistable_hash));
        let graph_id = Uuid::new_v4();

        tracing::info!(
            "Sealed pip graph {} with {} nodes (fingerprint {:016X})",
            graph_id,
            state.nodes.len(),
            fingerprint
        );

        PipGraph {
            info: PipGraphInfo {
                graph_id,
                semistable_fingerprint: fingerprint,
                node_count: state.nodes.len() as u32,
                spec_files,
                modules: state.modules,
                companion_moniker: format!("pipgraph-{}", graph_id.simple()),
            },
            nodes: state.nodes,
            file_producers: state.file_producers,
            file_consumers: state.file_consumers,
            directory_producers: state.directory_producers,
            directory_consumers: state.directory_consumers,
            dependencies: state.dependencies,
            node_index: state.node_index,
            mounts: self.mounts,
        }
    }
}

/// Graph-level metadata, persisted as one record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipGraphInfo {
    pub graph_id: Uuid,
    pub semistable_fingerprint: u64,
    pub node_count: u32,
    pub spec_files: BTreeSet<PathBuf>,
    pub modules: BTreeMap<String, PipId>,
    /// Name of the companion service endpoint for this graph.
    pub companion_moniker: String,
}

/// A frozen pip graph.
pub struct PipGraph {
    info: PipGraphInfo,
    nodes: BTreeMap<PipId, PipNode>,
    file_producers: HashMap<FileArtifact, PipId>,
    file_consumers: HashMap<FileArtifact, Vec<PipId>>,
    directory_producers: HashMap<DirectoryArtifact, PipId>,
    directory_consumers: HashMap<DirectoryArtifact, Vec<PipId>>,
    dependencies: DiGraph<PipId, ()>,
    node_index: HashMap<PipId, NodeIndex>,
    mounts: MountPathExpander,
}

impl PipGraph {
    pub fn info(&self) -> &PipGraphInfo {
        &self.info
    }

    pub fn graph_id(&self) -> Uuid {
        self.info.graph_id
    }

    pub fn fingerprint(&self) -> u64 {
        self.info.semistable_fingerprint
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn companion_moniker(&self) -> &str {
        &self.info.companion_moniker
    }

    pub fn mounts(&self) -> &MountPathExpander {
        &self.mounts
    }

    pub fn get(&self, id: PipId) -> Option<&PipNode> {
        self.nodes.get(&id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (PipId, &PipNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn processes(&self) -> impl Iterator<Item = (PipId, &ProcessNode)> {
        self.nodes()
            .filter_map(|(id, node)| node.as_process().map(|p| (id, p)))
    }

    pub fn file_producer(&self, file: &FileArtifact) -> Option<PipId> {
        self.file_producers.get(file).copied()
    }

    pub fn file_consumers(&self, file: &FileArtifact) -> &[PipId] {
        self.file_consumers.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn directory_producer(&self, dir: &DirectoryArtifact) -> Option<PipId> {
        self.directory_producers.get(dir).copied()
    }

    pub fn directory_consumers(&self, dir: &DirectoryArtifact) -> &[PipId] {
        self.directory_consumers.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn file_producers(&self) -> impl Iterator<Item = (&FileArtifact, PipId)> {
        self.file_producers.iter().map(|(f, id)| (f, *id))
    }

    pub fn file_consumer_lists(&self) -> impl Iterator<Item = (&FileArtifact, &[PipId])> {
        self.file_consumers.iter().map(|(f, ids)| (f, ids.as_slice()))
    }

    pub fn directory_producers(&self) -> impl Iterator<Item = (&DirectoryArtifact, PipId)> {
        self.directory_producers.iter().map(|(d, id)| (d, *id))
    }

    pub fn directory_consumer_lists(
        &self,
    ) -> impl Iterator<Item = (&DirectoryArtifact, &[PipId])> {
        self.directory_consumers.iter().map(|(d, ids)| (d, ids.as_slice()))
    }

    /// Pips that must run before `id`.
    pub fn upstream(&self, id: PipId) -> Vec<PipId> {
        self.traverse_bfs(id, Direction::Incoming)
    }

    /// Pips that consume, directly or indirectly, what `id` produces.
    pub fn downstream(&self, id: PipId) -> Vec<PipId> {
        self.traverse_bfs(id, Direction::Outgoing)
    }

    fn traverse_bfs(&self, id: PipId, direction: Direction) -> Vec<PipId> {
        let start = match self.node_index.get(&id) {
            Some(&idx) => idx,
            None => return vec![],
        };

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        visited.insert(start);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.dependencies.neighbors_directed(current, direction) {
                if visited.insert(neighbor) {
                    result.push(self.dependencies[neighbor]);
                    queue.push_back(neighbor);
                }
            }
        }

        result.sort_unstable();
        result
    }
}
