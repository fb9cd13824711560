//! Persistent, point-queryable representation of a sealed pip graph.
//!
//! The store is populated once from a `PipGraph` and is read-only afterwards.
//! Every record is a bincode-encoded key/value pair in one DuckDB table, so
//! producers and consumers of any file or directory can be looked up without
//! loading the graph.

mod keys;
mod schema;
mod store;

pub use keys::{
    decode, encode, GraphMetadataKind, ModuleRecord, MountTableRecord, Role, SpecFileRecord,
    StoreKey,
};
pub use schema::{FORMAT_VERSION, META_GRAPH_ID, META_POPULATED_AT, META_RECORD_COUNT};
pub use store::{AccessMode, PersistentGraphStore};
