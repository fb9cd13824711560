//! Resolver settings shared by every pip of one construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pip::DoubleWritePolicy;
use crate::types::Project;

fn default_msbuild_executable() -> PathBuf {
    PathBuf::from("/usr/bin/dotnet/msbuild")
}

fn default_generated_metadata_folder() -> String {
    "GeneratedMetadata".to_string()
}

fn default_module_name() -> String {
    "msbuild".to_string()
}

/// Everything the pip builder needs besides the project itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Root of the source tree. Spec files and the module live here.
    pub root: PathBuf,

    pub msbuild_executable: PathBuf,

    /// Root of per-project log directories. Defaults to `<root>/out/Logs/MSBuild`.
    pub log_directory: Option<PathBuf>,

    /// Root of per-project cache artifacts. Defaults to `<root>/out/Objects/MSBuild`.
    pub object_directory: Option<PathBuf>,

    /// Build every project with `/p:buildprojectreferences=false` and no cache artifact.
    pub use_legacy_project_isolation: bool,

    pub double_write_policy: DoubleWritePolicy,

    pub run_in_container: bool,

    pub enable_binary_log: bool,

    /// `quiet`, `minimal`, `normal`, `detailed` or `diagnostic`.
    pub log_verbosity: Option<String>,

    /// Extra output directories declared by every pip.
    pub additional_output_directories: Vec<PathBuf>,

    pub enable_transitive_project_references: bool,

    /// Base environment of every pip.
    pub environment: BTreeMap<String, String>,

    /// Names whose values are read from the build machine at execution time.
    pub pass_through_environment: Vec<String>,

    pub enable_engine_tracing: bool,

    pub user_profile: Option<PathBuf>,

    pub public_user_profile: Option<PathBuf>,

    /// Inputs below a folder with this name are untracked instead of declared.
    pub generated_metadata_folder: String,

    pub module_name: String,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            msbuild_executable: default_msbuild_executable(),
            log_directory: None,
            object_directory: None,
            use_legacy_project_isolation: false,
            double_write_policy: DoubleWritePolicy::default(),
            run_in_container: false,
            enable_binary_log: false,
            log_verbosity: None,
            additional_output_directories: Vec::new(),
            enable_transitive_project_references: false,
            environment: BTreeMap::new(),
            pass_through_environment: Vec::new(),
            enable_engine_tracing: false,
            user_profile: None,
            public_user_profile: None,
            generated_metadata_folder: default_generated_metadata_folder(),
            module_name: default_module_name(),
        }
    }
}

impl ResolverSettings {
    /// Settings rooted at `root`, everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn log_root(&self) -> PathBuf {
        self.log_directory
            .clone()
            .unwrap_or_else(|| self.root.join("out").join("Logs").join("MSBuild"))
    }

    pub fn object_root(&self) -> PathBuf {
        self.object_directory
            .clone()
            .unwrap_or_else(|| self.root.join("out").join("Objects").join("MSBuild"))
    }

    /// Directory containing the build tool binary.
    pub fn msbuild_directory(&self) -> &Path {
        self.msbuild_executable
            .parent()
            .unwrap_or_else(|| Path::new("/"))
    }

    /// Whether `project` is built with isolated cache artifacts.
    pub fn builds_in_isolation(&self, project: &Project) -> bool {
        !self.use_legacy_project_isolation && project.implements_target_protocol
    }
}
