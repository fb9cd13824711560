//! Process environment of one invocation.

use std::collections::BTreeMap;
use std::path::Path;

use crate::hashing::{helper_endpoint_token, short_token};
use crate::pip::EnvironmentVariable;
use crate::settings::ResolverSettings;
use crate::types::Project;

/// Set separately by the sandbox for every process.
const SANDBOX_OWNED: [&str; 2] = ["TEMP", "TMP"];

pub const ASYNC_LOGGING_VARIABLE: &str = "MSBUILDLOGASYNC";
pub const HELPER_ENDPOINT_VARIABLE: &str = "MSBUILD_HELPER_ENDPOINT";
pub const DEBUG_ENGINE_VARIABLE: &str = "MSBUILDDEBUGENGINE";
pub const DEBUG_PATH_VARIABLE: &str = "MSBUILDDEBUGPATH";

/// Build the environment, sorted by name.
///
/// `engine_log_directory` is set when engine tracing is enabled.
pub fn build_environment(
    project: &Project,
    settings: &ResolverSettings,
    engine_log_directory: Option<&Path>,
) -> Vec<EnvironmentVariable> {
    let mut vars: BTreeMap<String, EnvironmentVariable> = BTreeMap::new();

    for (name, value) in &settings.environment {
        if SANDBOX_OWNED.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            continue;
        }
        vars.insert(name.clone(), EnvironmentVariable::new(name, value));
    }

    for name in &settings.pass_through_environment {
        vars.insert(name.clone(), EnvironmentVariable::pass_through(name));
    }

    let mut overlay = |name: &str, value: String| {
        vars.insert(name.to_string(), EnvironmentVariable::new(name, value));
    };
    overlay(ASYNC_LOGGING_VARIABLE, "1".to_string());
    overlay(
        HELPER_ENDPOINT_VARIABLE,
        short_token(helper_endpoint_token(project)),
    );
    if let Some(dir) = engine_log_directory {
        overlay(DEBUG_ENGINE_VARIABLE, "1".to_string());
        overlay(DEBUG_PATH_VARIABLE, dir.display().to_string());
    }

    vars.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ResolverSettings {
        let mut settings = ResolverSettings::with_root("/repo");
        settings.environment.insert("PATH".into(), "/usr/bin".into());
        settings.environment.insert("TEMP".into(), "/tmp".into());
        settings.environment.insert("tmp".into(), "/tmp".into());
        settings.environment.insert("MSBUILDLOGASYNC".into(), "0".into());
        settings.pass_through_environment.push("HOME".into());
        settings
    }

    fn find<'a>(vars: &'a [EnvironmentVariable], name: &str) -> Option<&'a EnvironmentVariable> {
        vars.iter().find(|v| v.name == name)
    }

    #[test]
    fn test_environment_overlays() {
        let project = Project::new("/repo/a/a.csproj").with_targets(["Build"]);
        let vars = build_environment(&project, &settings(), None);

        assert_eq!(find(&vars, "PATH").unwrap().value.as_deref(), Some("/usr/bin"));
        assert!(find(&vars, "TEMP").is_none());
        assert!(find(&vars, "tmp").is_none());
        assert_eq!(find(&vars, ASYNC_LOGGING_VARIABLE).unwrap().value.as_deref(), Some("1"));
        assert!(find(&vars, DEBUG_ENGINE_VARIABLE).is_none());

        let home = find(&vars, "HOME").unwrap();
        assert!(home.is_pass_through);
        assert!(home.value.is_none());

        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_helper_endpoint_unique_per_invocation() {
        let a = Project::new("/repo/a/a.csproj").with_targets(["Build"]);
        let b = a.clone().with_targets(["Build", "Pack"]);
        let settings = settings();

        let token = |p: &Project| {
            find(&build_environment(p, &settings, None), HELPER_ENDPOINT_VARIABLE)
                .and_then(|v| v.value.clone())
                .unwrap()
        };
        assert_eq!(token(&a), token(&a));
        assert_ne!(token(&a), token(&b));
        assert_eq!(token(&a).len(), 16);
    }

    #[test]
    fn test_engine_tracing_variables() {
        let project = Project::new("/repo/a/a.csproj").with_targets(["Build"]);
        let vars = build_environment(&project, &settings(), Some(Path::new("/logs/a/engine")));
        assert_eq!(find(&vars, DEBUG_ENGINE_VARIABLE).unwrap().value.as_deref(), Some("1"));
        assert_eq!(
            find(&vars, DEBUG_PATH_VARIABLE).unwrap().value.as_deref(),
            Some("/logs/a/engine")
        );
    }
}
