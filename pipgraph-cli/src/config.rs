//! pipgraph configuration loading from `.pipgraph.toml`.
//!
//! The file is optional. Every section falls back to defaults, and the
//! `[resolver]` section is the resolver settings object itself.
//!
//! # Example Configuration
//!
//! ```toml
//! [resolver]
//! msbuild_executable = "/usr/share/dotnet/sdk/8.0.100/MSBuild.dll"
//! enable_transitive_project_references = true
//! double_write_policy = "DoubleWritesAreErrors"
//! log_verbosity = "normal"
//! pass_through_environment = ["PATH", "HOME"]
//!
//! [resolver.environment]
//! DOTNET_CLI_TELEMETRY_OPTOUT = "1"
//!
//! [store]
//! path = ".pipgraph/graph.duckdb"
//!
//! [build]
//! threads = 8
//!
//! [output]
//! format = "json"
//! color = false
//! ```

use anyhow::{Context, Result};
use pipgraph_core::ResolverSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the build root.
pub const CONFIG_FILE: &str = ".pipgraph.toml";

/// Default store location, relative to the build root.
const DEFAULT_STORE_PATH: &str = ".pipgraph/graph.duckdb";

/// Root configuration structure loaded from `.pipgraph.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct PipgraphConfig {
    /// Settings handed to graph construction.
    #[serde(default)]
    pub resolver: ResolverSettings,

    /// Graph store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Construction parallelism.
    #[serde(default)]
    pub build: BuildConfig,

    /// Output formatting preferences. Command-line flags win.
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Deserialize, Default)]
pub struct StoreConfig {
    /// Store file. Relative paths are resolved against the build root.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BuildConfig {
    /// Worker threads. Defaults to rayon's global pool.
    #[serde(default)]
    pub threads: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OutputSettings {
    /// `table` or `json`.
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub color: Option<bool>,
}

impl PipgraphConfig {
    /// Load configuration from `path`.
    ///
    /// A missing file yields defaults. Read and parse errors are logged as
    /// warnings and also yield defaults.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    /// Like [`load`](Self::load), but a present file that cannot be read or
    /// parsed is an error.
    pub fn load_strict(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Resolver settings for a build rooted at `root`.
    ///
    /// Profile directories not set in the file come from the current user.
    pub fn resolver_settings(&self, root: &Path) -> ResolverSettings {
        let mut settings = self.resolver.clone();
        settings.root = root.to_path_buf();
        if settings.user_profile.is_none() {
            settings.user_profile = dirs::home_dir();
        }
        if settings.public_user_profile.is_none() {
            settings.public_user_profile = dirs::public_dir();
        }
        settings
    }

    pub fn default_format(&self) -> Option<&str> {
        self.output.format.as_deref()
    }

    pub fn use_color(&self) -> Option<bool> {
        self.output.color
    }

    /// Store path for a build rooted at `root`.
    pub fn store_path(&self, root: &Path) -> PathBuf {
        let path = self
            .store
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }
}
