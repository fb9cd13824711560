//! End-to-end construction scenarios.

use std::path::{Path, PathBuf};

use pipgraph_core::hashing::identity_token;
use pipgraph_core::pip::OutputExistence;
use pipgraph_core::{
    collapse_output_directories, ConstructionError, GraphConstruction, PipBuilder, PipNode,
    Project, ProjectGraph, ProjectId, ResolverSettings,
};

fn settings(root: &Path) -> ResolverSettings {
    ResolverSettings::with_root(root)
}

/// B references A, both predicted to build.
fn a_then_b(root: &Path, b_protocol: bool) -> ProjectGraph {
    let mut a = Project::new(root.join("src/a/a.csproj")).with_targets(["Build"]);
    a.predicted_inputs.insert(root.join("src/a/a.cs"));
    a.predicted_output_folders.insert(root.join("out/bin/a"));

    let mut b = Project::new(root.join("src/b/b.csproj"))
        .with_targets(["Build"])
        .with_reference(ProjectId(0));
    b.predicted_inputs.insert(root.join("src/b/b.cs"));
    // Produced by A: must not be declared as a source input of B
    b.predicted_inputs.insert(root.join("out/bin/a/a.dll"));
    b.implements_target_protocol = b_protocol;

    ProjectGraph::new(vec![a, b]).unwrap()
}

fn process(outcome: &pipgraph_core::ConstructionOutcome, project: usize) -> &pipgraph_core::ProcessNode {
    let id = outcome.scheduled[&ProjectId(project)];
    outcome.graph.get(id).and_then(PipNode::as_process).unwrap()
}

#[test]
fn test_a_then_b_isolated() {
    let temp = tempfile::tempdir().unwrap();
    let graph = a_then_b(temp.path(), true);
    let settings = settings(temp.path());

    let session = GraphConstruction::new(&graph, &settings);
    let outcome = session.construct(None).unwrap();
    assert!(outcome.is_success());

    let a = process(&outcome, 0);
    let b = process(&outcome, 1);

    // B consumes every directory A sealed
    assert!(!a.sealed_directories.is_empty());
    for dir in &a.sealed_directories {
        assert!(b.pip.directory_inputs.contains(dir));
    }

    let a_cache = a.pip.cache_artifact.clone().unwrap();
    assert!(b.pip.file_inputs.contains(&a_cache));
    let irc = format!("/irc:{}", a_cache.path.display());
    assert!(b.pip.argument_values().contains(&irc));

    assert!(!b
        .pip
        .file_inputs
        .iter()
        .any(|f| f.path == temp.path().join("out/bin/a/a.dll")));

    let b_id = outcome.scheduled[&ProjectId(1)];
    let a_id = outcome.scheduled[&ProjectId(0)];
    assert_eq!(outcome.graph.upstream(b_id), vec![a_id]);
    assert_eq!(outcome.graph.file_consumers(&a_cache), &[b_id]);
}

#[test]
fn test_registry_populated_after_scheduling() {
    let temp = tempfile::tempdir().unwrap();
    let graph = a_then_b(temp.path(), true);
    let settings = settings(temp.path());

    // Build A by hand through the same building blocks the session uses
    let builder = PipBuilder::new(&settings);
    let registry = pipgraph_core::OutputsRegistry::new();
    let assembler = pipgraph_core::GraphAssembler::new(pipgraph_core::MountPathExpander::from_settings(&settings));

    let pip = builder.build(&graph, ProjectId(0), &[], &registry).unwrap();
    let scheduled = assembler.add_process(pip).unwrap();
    registry
        .publish(
            &graph,
            ProjectId(0),
            pipgraph_core::MsBuildProjectOutputs {
                output_directories: scheduled.outputs.directories.clone(),
                cache_artifact: scheduled.outputs.cache_artifact.clone(),
            },
        )
        .unwrap();

    let published = registry.get(ProjectId(0)).unwrap();
    assert!(!published.output_directories.is_empty());
    assert!(published.builds_in_isolation());

    let b = builder.build(&graph, ProjectId(1), &[ProjectId(0)], &registry).unwrap();
    for dir in &published.output_directories {
        assert!(b.directory_inputs.contains(dir));
    }
    assert!(assembler.add_process(b).is_ok());
}

#[test]
fn test_legacy_isolation_mode() {
    let temp = tempfile::tempdir().unwrap();
    let graph = a_then_b(temp.path(), true);
    let settings = ResolverSettings {
        use_legacy_project_isolation: true,
        ..settings(temp.path())
    };

    let outcome = GraphConstruction::new(&graph, &settings).construct(None).unwrap();
    for project in 0..2 {
        let node = process(&outcome, project);
        assert!(node.pip.cache_artifact.is_none());
        let values = node.pip.argument_values();
        assert!(values.contains(&"/p:buildprojectreferences=false".to_string()));
        assert!(!values.iter().any(|v| v.starts_with("/orc:") || v.starts_with("/irc:")));
        assert!(node
            .pip
            .file_outputs
            .iter()
            .all(|o| o.existence == OutputExistence::Optional));
    }
}

#[test]
fn test_isolation_mode_declares_one_required_cache() {
    let temp = tempfile::tempdir().unwrap();
    let graph = a_then_b(temp.path(), true);
    let settings = settings(temp.path());

    let outcome = GraphConstruction::new(&graph, &settings).construct(None).unwrap();
    for project in 0..2 {
        let node = process(&outcome, project);
        let required: Vec<_> = node
            .pip
            .file_outputs
            .iter()
            .filter(|o| o.existence == OutputExistence::Required)
            .collect();
        assert_eq!(required.len(), 1);

        let cache = node.pip.cache_artifact.as_ref().unwrap();
        assert_eq!(&required[0].artifact, cache);
        let orc = format!("/orc:{}", cache.path.display());
        assert_eq!(
            node.pip.argument_values().iter().filter(|v| **v == orc).count(),
            1
        );
    }
}

#[test]
fn test_mixed_protocol_dependency() {
    let temp = tempfile::tempdir().unwrap();
    let graph = a_then_b(temp.path(), false);
    let settings = settings(temp.path());

    let outcome = GraphConstruction::new(&graph, &settings).construct(None).unwrap();
    let b = process(&outcome, 1);
    assert!(b.pip.cache_artifact.is_none());
    let values = b.pip.argument_values();
    assert!(values.iter().any(|v| v.starts_with("/irc:")));
    assert_eq!(values.last().map(String::as_str), Some("/p:buildprojectreferences=false"));
}

#[test]
fn test_identity_token_purity() {
    let base = Project::new("/repo/a/a.csproj")
        .with_targets(["Build", "Publish"])
        .with_property("Configuration", "Release")
        .with_property("Platform", "x64");

    let mut same = Project::new("/repo/a/a.csproj")
        .with_property("Platform", "x64")
        .with_property("Configuration", "Release")
        .with_targets(["Publish", "Build"]);
    same.predicted_inputs.insert("/repo/a/a.cs".into());
    same.is_default_target_appended = true;
    same.implements_target_protocol = false;
    assert_eq!(identity_token(&base), identity_token(&same));

    let different = base.clone().with_property("Platform", "arm64");
    assert_ne!(identity_token(&base), identity_token(&different));
}

#[test]
fn test_reevaluation_produces_distinct_pips() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("src/a/a.csproj");
    let graph = ProjectGraph::new(vec![
        Project::new(&path).with_targets(["Build"]).with_property("TargetFramework", "net8.0"),
        Project::new(&path).with_targets(["Build"]).with_property("TargetFramework", "net472"),
    ])
    .unwrap();
    let settings = settings(temp.path());

    let outcome = GraphConstruction::new(&graph, &settings).construct(None).unwrap();
    assert_eq!(outcome.scheduled.len(), 2);
    assert_eq!(outcome.graph.info().spec_files.len(), 1);

    let first = process(&outcome, 0);
    let second = process(&outcome, 1);
    assert_ne!(first.pip.provenance.symbol, second.pip.provenance.symbol);
    assert_ne!(first.semistable_hash, second.semistable_hash);
}

#[test]
fn test_transitive_references() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let graph = ProjectGraph::new(vec![
        Project::new(root.join("core/core.csproj")).with_targets(["Build"]),
        Project::new(root.join("lib/lib.csproj"))
            .with_targets(["Build"])
            .with_reference(ProjectId(0)),
        Project::new(root.join("app/app.csproj"))
            .with_targets(["Build"])
            .with_reference(ProjectId(1)),
    ])
    .unwrap();

    let direct = GraphConstruction::new(&graph, &settings(root)).construct(None).unwrap();
    let app = process(&direct, 2);
    assert_eq!(app.pip.argument_values().iter().filter(|v| v.starts_with("/irc:")).count(), 1);

    let transitive_settings = ResolverSettings {
        enable_transitive_project_references: true,
        ..settings(root)
    };
    let transitive = GraphConstruction::new(&graph, &transitive_settings)
        .construct(Some(2))
        .unwrap();
    let app = process(&transitive, 2);
    assert_eq!(app.pip.argument_values().iter().filter(|v| v.starts_with("/irc:")).count(), 2);
}

#[test]
fn test_cycle_is_rejected_before_construction() {
    let err = ProjectGraph::new(vec![
        Project::new("/repo/a.csproj").with_targets(["Build"]).with_reference(ProjectId(1)),
        Project::new("/repo/b.csproj").with_targets(["Build"]).with_reference(ProjectId(0)),
    ])
    .unwrap_err();
    let err: ConstructionError = err.into();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_git_metadata_untracked_when_present() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::create_dir(temp.path().join(".git")).unwrap();
    let graph = a_then_b(temp.path(), true);
    let settings = settings(temp.path());

    let outcome = GraphConstruction::new(&graph, &settings).construct(None).unwrap();
    let a = process(&outcome, 0);
    assert!(a.pip.untracked_scopes.contains(&temp.path().join(".git")));
    assert!(a.pip.untracked_paths.contains(&temp.path().join(".gitignore")));
}

#[test]
fn test_collapser_properties() {
    let root = PathBuf::from("/root");
    let candidates = vec![root.join("bin"), root.join("bin/debug"), root.join("obj")];
    let collapsed = collapse_output_directories(&candidates);
    assert_eq!(collapsed, vec![root.join("bin"), root.join("obj")]);

    let mut reversed = candidates.clone();
    reversed.reverse();
    assert_eq!(collapse_output_directories(&reversed), collapsed);
    assert_eq!(collapse_output_directories(&collapsed), collapsed);
}

#[test]
fn test_build_root_is_declared_output() {
    let temp = tempfile::tempdir().unwrap();
    let graph = a_then_b(temp.path(), true);
    let settings = settings(temp.path());

    let outcome = GraphConstruction::new(&graph, &settings).construct(None).unwrap();
    for project in 0..2 {
        let node = process(&outcome, project);
        // Predicted folders and log directories all sit under the root
        assert_eq!(node.pip.directory_outputs, vec![temp.path().to_path_buf()]);
    }
}
