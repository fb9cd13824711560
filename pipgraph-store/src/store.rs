//! PersistentGraphStore - DuckDB-backed key/value store for a sealed pip graph.

use anyhow::{Context, Result};
use duckdb::{params, Config, Connection, OptionalExt};
use pipgraph_core::{
    DirectoryArtifact, FileArtifact, MountPathExpander, PipGraph, PipGraphInfo, PipId, PipNode,
    PipType,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::keys::{
    decode, decode_pip, encode, encode_pip, GraphMetadataKind, MountTableRecord, Role, StoreKey,
};
use crate::schema::{
    FORMAT_VERSION, META_FORMAT_VERSION, META_GRAPH_ID, META_POPULATED_AT, META_RECORD_COUNT,
    SCHEMA_SQL,
};

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write mode, used once to populate the store
    #[default]
    ReadWrite,
    /// Read-only mode, for queries
    ReadOnly,
}

/// Write-once store of one pip graph.
pub struct PersistentGraphStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    mode: AccessMode,
}

impl PersistentGraphStore {
    /// Open or create a store for population.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadWrite)
    }

    /// Open an existing store for queries. Any number of readers may coexist.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadOnly)
    }

    pub fn open_with_mode(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref();

        let conn = match mode {
            AccessMode::ReadWrite => Connection::open(path)
                .with_context(|| format!("Failed to open graph store: {:?}", path))?,
            AccessMode::ReadOnly => {
                let config = Config::default()
                    .access_mode(duckdb::AccessMode::ReadOnly)
                    .map_err(|e| anyhow::anyhow!("Failed to set read-only mode: {}", e))?;
                Connection::open_with_flags(path, config).with_context(|| {
                    format!("Failed to open graph store in read-only mode: {:?}", path)
                })?
            }
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            mode,
        };

        if mode == AccessMode::ReadWrite {
            store.init_schema()?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        match self.conn.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                tracing::warn!("Recovering from poisoned database mutex");
                Ok(poisoned.into_inner())
            }
        }
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.acquire_conn()?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?",
                params![META_FORMAT_VERSION],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read format version")?;
        match existing {
            Some(version) if version != FORMAT_VERSION => anyhow::bail!(
                "Graph store {:?} has format version {}, expected {}",
                self.path,
                version,
                FORMAT_VERSION
            ),
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO metadata (key, value) VALUES (?, ?)",
                    params![META_FORMAT_VERSION, FORMAT_VERSION],
                )
                .context("Failed to set format version")?;
            }
        }
        Ok(())
    }

    /// Read one metadata value.
    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.acquire_conn()?;
        conn.query_row(
            "SELECT value FROM metadata WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read metadata: {}", key))
    }

    pub fn is_populated(&self) -> Result<bool> {
        Ok(self.metadata(META_POPULATED_AT)?.is_some())
    }

    /// Populate the store from a sealed graph. Allowed exactly once.
    ///
    /// Returns the number of records written.
    pub fn write(&self, graph: &PipGraph) -> Result<usize> {
        if self.mode == AccessMode::ReadOnly {
            anyhow::bail!("Graph store {:?} is open read-only", self.path);
        }
        if self.is_populated()? {
            anyhow::bail!("Graph store {:?} is already populated", self.path);
        }

        let records = Self::collect_records(graph)?;

        let mut conn = self.acquire_conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO records (key, value) VALUES (?, ?)")
                .context("Failed to prepare record insert")?;
            for (key, value) in &records {
                stmt.execute(params![key, value])
                    .context("Failed to insert record")?;
            }
        }

        let populated_at = chrono::Utc::now().to_rfc3339();
        let graph_id = graph.graph_id().to_string();
        let count = records.len().to_string();
        for (key, value) in [
            (META_POPULATED_AT, populated_at.as_str()),
            (META_GRAPH_ID, graph_id.as_str()),
            (META_RECORD_COUNT, count.as_str()),
        ] {
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES (?, ?)",
                params![key, value],
            )
            .with_context(|| format!("Failed to set metadata: {}", key))?;
        }
        tx.commit().context("Failed to commit graph records")?;

        tracing::info!(
            "Wrote {} records for graph {} to {:?}",
            records.len(),
            graph_id,
            self.path
        );
        Ok(records.len())
    }

    /// Every record of `graph`, keyed by encoded key.
    fn collect_records(graph: &PipGraph) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut records = BTreeMap::new();

        records.insert(
            StoreKey::GraphMetadata(GraphMetadataKind::PipGraph).encode()?,
            encode(graph.info())?,
        );
        records.insert(
            StoreKey::GraphMetadata(GraphMetadataKind::MountPathExpander).encode()?,
            encode(&MountTableRecord::from(graph.mounts()))?,
        );

        let mut by_hash: BTreeMap<u64, Vec<PipId>> = BTreeMap::new();
        for (id, node) in graph.nodes() {
            by_hash.entry(node.semistable_hash()).or_default().push(id);
            records.insert(
                StoreKey::pip(id, node.pip_type()).encode()?,
                encode_pip(node).with_context(|| format!("Failed to encode {}", id))?,
            );
        }
        for (hash, ids) in by_hash {
            records.insert(StoreKey::PipSemistableHash(hash).encode()?, encode(&ids)?);
        }

        for (file, producer) in graph.file_producers() {
            records.insert(StoreKey::file(Role::Producer, file).encode()?, encode(&producer)?);
        }
        for (file, consumers) in graph.file_consumer_lists() {
            if consumers.is_empty() {
                continue;
            }
            records.insert(StoreKey::file(Role::Consumer, file).encode()?, encode(&consumers)?);
        }
        for (dir, producer) in graph.directory_producers() {
            records.insert(StoreKey::directory(Role::Producer, dir).encode()?, encode(&producer)?);
        }
        for (dir, consumers) in graph.directory_consumer_lists() {
            if consumers.is_empty() {
                continue;
            }
            records.insert(
                StoreKey::directory(Role::Consumer, dir).encode()?,
                encode(&consumers)?,
            );
        }

        Ok(records)
    }

    /// Raw value of a key. Absent keys are `Ok(None)`.
    pub fn get_raw(&self, key: &StoreKey) -> Result<Option<Vec<u8>>> {
        let key = key.encode()?;
        let conn = self.acquire_conn()?;
        conn.query_row(
            "SELECT value FROM records WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query record")
    }

    fn get<T: serde::de::DeserializeOwned>(&self, key: &StoreKey) -> Result<Option<T>> {
        self.get_raw(key)?
            .map(|bytes| decode(&bytes).with_context(|| format!("Corrupt record for {:?}", key)))
            .transpose()
    }

    /// Number of key/value records.
    pub fn record_count(&self) -> Result<usize> {
        let conn = self.acquire_conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .context("Failed to count records")?;
        Ok(count as usize)
    }

    pub fn graph_info(&self) -> Result<Option<PipGraphInfo>> {
        self.get(&StoreKey::GraphMetadata(GraphMetadataKind::PipGraph))
    }

    pub fn mount_table(&self) -> Result<Option<MountTableRecord>> {
        self.get(&StoreKey::GraphMetadata(GraphMetadataKind::MountPathExpander))
    }

    pub fn mount_path_expander(&self) -> Result<Option<MountPathExpander>> {
        Ok(self.mount_table()?.map(|record| record.to_expander()))
    }

    /// Pips with the given semistable hash. Zero lists every non-process pip.
    pub fn pips_by_semistable_hash(&self, hash: u64) -> Result<Option<Vec<PipId>>> {
        self.get(&StoreKey::PipSemistableHash(hash))
    }

    /// The pip `id`, decoded as `pip_type`.
    pub fn pip(&self, id: PipId, pip_type: PipType) -> Result<Option<PipNode>> {
        let key = StoreKey::pip(id, pip_type);
        match self.get_raw(&key)? {
            Some(bytes) => decode_pip(pip_type, &bytes)
                .with_context(|| format!("Corrupt record for {}", id))
                .map(Some),
            None => Ok(None),
        }
    }

    /// The pip `id`, whatever its type.
    pub fn find_pip(&self, id: PipId) -> Result<Option<PipNode>> {
        for pip_type in [PipType::Process, PipType::SpecFile, PipType::Module] {
            if let Some(node) = self.pip(id, pip_type)? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    pub fn file_producer(&self, file: &FileArtifact) -> Result<Option<PipId>> {
        self.get(&StoreKey::file(Role::Producer, file))
    }

    pub fn file_consumers(&self, file: &FileArtifact) -> Result<Option<Vec<PipId>>> {
        self.get(&StoreKey::file(Role::Consumer, file))
    }

    pub fn directory_producer(&self, dir: &DirectoryArtifact) -> Result<Option<PipId>> {
        self.get(&StoreKey::directory(Role::Producer, dir))
    }

    pub fn directory_consumers(&self, dir: &DirectoryArtifact) -> Result<Option<Vec<PipId>>> {
        self.get(&StoreKey::directory(Role::Consumer, dir))
    }

    /// Every producer of `path`, by rewrite count, ascending.
    pub fn file_producers_by_path(&self, path: &Path) -> Result<Vec<(u32, PipId)>> {
        let mut producers = Vec::new();
        let mut rewrite_count = 1;
        loop {
            let file = FileArtifact {
                path: path.to_path_buf(),
                rewrite_count,
            };
            match self.file_producer(&file)? {
                Some(id) => producers.push((rewrite_count, id)),
                None => break,
            }
            rewrite_count += 1;
        }
        Ok(producers)
    }
}
