//! Declared inputs, outputs and untracked locations of one invocation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::collapse::collapse_output_directories;
use crate::pip::FileArtifact;
use crate::settings::ResolverSettings;
use crate::types::Project;

/// Locations the sandbox does not track for any pip of this build.
#[derive(Clone, Debug, Default)]
pub struct UntrackedLocations {
    pub scopes: BTreeSet<PathBuf>,
    pub paths: BTreeSet<PathBuf>,
}

impl UntrackedLocations {
    /// Profile directories, plus the version-control folder when `has_git` is set.
    pub fn from_settings(settings: &ResolverSettings, has_git: bool) -> Self {
        let mut untracked = Self::default();
        untracked.scopes.extend(settings.user_profile.iter().cloned());
        untracked.scopes.extend(settings.public_user_profile.iter().cloned());
        if has_git {
            untracked.scopes.insert(settings.root.join(".git"));
            untracked.paths.insert(settings.root.join(".gitattributes"));
            untracked.paths.insert(settings.root.join(".gitignore"));
        }
        untracked
    }

    fn covers(&self, path: &Path) -> bool {
        self.scopes.iter().any(|scope| path.starts_with(scope)) || self.paths.contains(path)
    }
}

/// Predicted inputs split into declared sources and extra untracked paths.
#[derive(Debug, Default)]
pub struct ClassifiedInputs {
    pub declared: BTreeSet<FileArtifact>,
    pub untracked: BTreeSet<PathBuf>,
}

/// Classify the predicted inputs of `project`.
///
/// Inputs under an excluded output folder or an untracked location are
/// dropped. Inputs under the generated-metadata folder become untracked.
pub fn classify_inputs(
    project: &Project,
    excluded_folders: &BTreeSet<PathBuf>,
    untracked: &UntrackedLocations,
    generated_metadata_folder: &str,
) -> ClassifiedInputs {
    let mut inputs = ClassifiedInputs::default();
    for input in &project.predicted_inputs {
        if excluded_folders.iter().any(|folder| input.starts_with(folder)) {
            continue;
        }
        if untracked.covers(input) {
            continue;
        }
        if is_generated_metadata(input, generated_metadata_folder) {
            inputs.untracked.insert(input.clone());
            continue;
        }
        inputs.declared.insert(FileArtifact::source(input.clone()));
    }
    inputs
}

fn is_generated_metadata(path: &Path, folder: &str) -> bool {
    !folder.is_empty()
        && path
            .parent()
            .map(|parent| parent.iter().any(|c| c == folder))
            .unwrap_or(false)
}

/// Shared opaque directories: the build root as catch-all, every predicted
/// output folder and the extra directories, collapsed.
///
/// Anything under the root that the predictions missed is still declared.
pub fn output_directories(
    project: &Project,
    settings: &ResolverSettings,
    extra: impl IntoIterator<Item = PathBuf>,
) -> Vec<PathBuf> {
    let candidates = std::iter::once(settings.root.clone())
        .chain(project.predicted_output_folders.iter().cloned())
        .chain(settings.additional_output_directories.iter().cloned())
        .chain(extra);
    collapse_output_directories(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        let mut project = Project::new("/repo/src/a/a.csproj").with_targets(["Build"]);
        project.predicted_inputs = [
            "/repo/src/a/a.cs",
            "/repo/src/a/bin/ref.dll",
            "/repo/src/b/bin/b.dll",
            "/repo/src/a/obj/GeneratedMetadata/info.json",
            "/repo/.git/HEAD",
            "/repo/.gitignore",
            "/home/dev/.nuget/pkg.dll",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect();
        project.predicted_output_folders = ["/repo/src/a/bin".into()].into_iter().collect();
        project
    }

    fn settings() -> ResolverSettings {
        ResolverSettings {
            user_profile: Some("/home/dev".into()),
            ..ResolverSettings::with_root("/repo")
        }
    }

    #[test]
    fn test_untracked_locations() {
        let with_git = UntrackedLocations::from_settings(&settings(), true);
        assert!(with_git.scopes.contains(Path::new("/repo/.git")));
        assert!(with_git.paths.contains(Path::new("/repo/.gitattributes")));

        let without_git = UntrackedLocations::from_settings(&settings(), false);
        assert_eq!(without_git.scopes.len(), 1);
        assert!(without_git.paths.is_empty());
    }

    #[test]
    fn test_classify_inputs() {
        let project = project();
        let untracked = UntrackedLocations::from_settings(&settings(), true);
        let mut excluded = project.predicted_output_folders.clone();
        excluded.insert("/repo/src/b/bin".into());

        let inputs = classify_inputs(&project, &excluded, &untracked, "GeneratedMetadata");
        let declared: Vec<&Path> = inputs.declared.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(declared, vec![Path::new("/repo/src/a/a.cs")]);
        assert!(inputs.declared.iter().all(|f| !f.is_output()));
        assert_eq!(
            inputs.untracked.into_iter().collect::<Vec<_>>(),
            vec![PathBuf::from("/repo/src/a/obj/GeneratedMetadata/info.json")]
        );
    }

    #[test]
    fn test_output_directories_collapse_into_build_root() {
        let mut project = project();
        project.predicted_output_folders.insert("/repo/out/a".into());
        let dirs = output_directories(&project, &settings(), vec![PathBuf::from("/repo/out/a/engine")]);
        assert_eq!(dirs, vec![PathBuf::from("/repo")]);
    }

    #[test]
    fn test_output_directories_outside_root_are_kept() {
        let mut project = project();
        project.predicted_output_folders.insert("/drop/a".into());
        let settings = ResolverSettings {
            additional_output_directories: vec!["/shared/out".into(), "/shared/out/x".into()],
            ..settings()
        };
        let dirs = output_directories(&project, &settings, vec![]);
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/drop/a"),
                PathBuf::from("/repo"),
                PathBuf::from("/shared/out"),
            ]
        );
    }
}
