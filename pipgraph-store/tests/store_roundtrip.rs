//! Populate a store from a constructed graph and query it back.

use std::path::Path;

use pipgraph_core::{
    FileArtifact, GraphConstruction, PipGraph, PipNode, PipType, Project, ProjectGraph, ProjectId,
    ResolverSettings,
};
use pipgraph_store::{
    encode, GraphMetadataKind, PersistentGraphStore, StoreKey, META_GRAPH_ID,
};

fn construct(root: &Path) -> PipGraph {
    let projects = ProjectGraph::new(vec![
        Project::new(root.join("src/a/a.csproj")).with_targets(["Build"]),
        Project::new(root.join("src/b/b.csproj"))
            .with_targets(["Build"])
            .with_reference(ProjectId(0)),
    ])
    .unwrap();
    let settings = ResolverSettings::with_root(root);
    let outcome = GraphConstruction::new(&projects, &settings)
        .construct(None)
        .unwrap();
    assert!(outcome.is_success());
    outcome.graph
}

#[test]
fn test_metadata_roundtrip_is_byte_identical() {
    let temp = tempfile::tempdir().unwrap();
    let graph = construct(temp.path());
    let db = temp.path().join("graph.duckdb");

    {
        let store = PersistentGraphStore::create(&db).unwrap();
        let written = store.write(&graph).unwrap();
        assert_eq!(written, store.record_count().unwrap());
    }

    let store = PersistentGraphStore::open_read_only(&db).unwrap();
    let raw = store
        .get_raw(&StoreKey::GraphMetadata(GraphMetadataKind::PipGraph))
        .unwrap()
        .unwrap();
    assert_eq!(raw, encode(graph.info()).unwrap());
    assert_eq!(store.graph_info().unwrap().as_ref(), Some(graph.info()));
    assert_eq!(store.mount_path_expander().unwrap().as_ref(), Some(graph.mounts()));
    let mounts = store.mount_table().unwrap().unwrap();
    assert_eq!(mounts.writable_roots, graph.mounts().writable_roots());
    assert!(mounts.all_roots.contains(temp.path()));
    assert_eq!(
        store.metadata(META_GRAPH_ID).unwrap(),
        Some(graph.graph_id().to_string())
    );
}

#[test]
fn test_unknown_path_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let graph = construct(temp.path());
    let db = temp.path().join("graph.duckdb");
    PersistentGraphStore::create(&db).unwrap().write(&graph).unwrap();

    let store = PersistentGraphStore::open_read_only(&db).unwrap();
    let unknown = FileArtifact::output(temp.path().join("nowhere/x.dll"));
    assert_eq!(store.file_producer(&unknown).unwrap(), None);
    assert_eq!(store.file_consumers(&unknown).unwrap(), None);
    assert!(store.file_producers_by_path(&unknown.path).unwrap().is_empty());
    assert_eq!(store.pips_by_semistable_hash(1).unwrap(), None);
}

#[test]
fn test_producers_and_consumers_match_graph() {
    let temp = tempfile::tempdir().unwrap();
    let graph = construct(temp.path());
    let db = temp.path().join("graph.duckdb");
    PersistentGraphStore::create(&db).unwrap().write(&graph).unwrap();
    let store = PersistentGraphStore::open_read_only(&db).unwrap();

    for (dir, producer) in graph.directory_producers() {
        assert_eq!(store.directory_producer(dir).unwrap(), Some(producer));
        let consumers = graph.directory_consumers(dir);
        let stored = store.directory_consumers(dir).unwrap();
        if consumers.is_empty() {
            assert_eq!(stored, None);
        } else {
            assert_eq!(stored.as_deref(), Some(consumers));
        }
    }

    for (file, producer) in graph.file_producers() {
        assert_eq!(store.file_producer(file).unwrap(), Some(producer));
        let by_path = store.file_producers_by_path(&file.path).unwrap();
        assert!(by_path.contains(&(file.rewrite_count, producer)));
    }
}

#[test]
fn test_pips_decoded_against_their_type() {
    let temp = tempfile::tempdir().unwrap();
    let graph = construct(temp.path());
    let db = temp.path().join("graph.duckdb");
    PersistentGraphStore::create(&db).unwrap().write(&graph).unwrap();
    let store = PersistentGraphStore::open_read_only(&db).unwrap();

    for (id, node) in graph.nodes() {
        assert_eq!(store.pip(id, node.pip_type()).unwrap().as_ref(), Some(node));
        assert_eq!(store.find_pip(id).unwrap().as_ref(), Some(node));
    }

    let (process_id, process) = graph.processes().next().unwrap();
    assert_eq!(store.pip(process_id, PipType::Module).unwrap(), None);
    let same_hash = store
        .pips_by_semistable_hash(process.semistable_hash)
        .unwrap()
        .unwrap();
    assert!(same_hash.contains(&process_id));

    // Module plus two spec files share the reserved zero hash
    let non_process = store.pips_by_semistable_hash(0).unwrap().unwrap();
    assert_eq!(non_process.len(), 3);
    for id in non_process {
        assert!(!matches!(store.find_pip(id).unwrap(), Some(PipNode::Process(_))));
    }
}

#[test]
fn test_second_population_fails() {
    let temp = tempfile::tempdir().unwrap();
    let graph = construct(temp.path());
    let db = temp.path().join("graph.duckdb");

    let store = PersistentGraphStore::create(&db).unwrap();
    store.write(&graph).unwrap();
    let err = store.write(&graph).unwrap_err();
    assert!(err.to_string().contains("already populated"));
    drop(store);

    let reopened = PersistentGraphStore::create(&db).unwrap();
    assert!(reopened.is_populated().unwrap());
    assert!(reopened.write(&construct(temp.path())).is_err());
}

#[test]
fn test_read_only_store_rejects_writes() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("graph.duckdb");
    drop(PersistentGraphStore::create(&db).unwrap());

    let store = PersistentGraphStore::open_read_only(&db).unwrap();
    assert!(!store.is_populated().unwrap());
    assert!(store.write(&construct(temp.path())).is_err());
    assert_eq!(store.graph_info().unwrap(), None);
}
