//! DuckDB schema for the graph store.

/// Version of the record encoding. Bumped whenever a key or value layout changes.
pub const FORMAT_VERSION: &str = "1";

pub const SCHEMA_SQL: &str = r#"
-- Every key/value record of the graph, bincode encoded
CREATE TABLE IF NOT EXISTS records (
    key BLOB PRIMARY KEY,
    value BLOB NOT NULL
);

-- Metadata table: format version, population info
CREATE TABLE IF NOT EXISTS metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR
);
"#;

/// Metadata keys.
pub const META_FORMAT_VERSION: &str = "format_version";
pub const META_POPULATED_AT: &str = "populated_at";
pub const META_GRAPH_ID: &str = "graph_id";
pub const META_RECORD_COUNT: &str = "record_count";
