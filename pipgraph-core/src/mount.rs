//! Mount table: named roots with semantic path flags.
//!
//! Downstream tooling uses the mount table to tell which parts of the file
//! system a build may read, write, hash or scrub. It is persisted next to the
//! graph so a consumer can answer those questions without the settings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::settings::ResolverSettings;

/// Bit set describing what a mount allows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemanticPathFlags(u16);

impl SemanticPathFlags {
    pub const NONE: Self = Self(0);
    pub const READABLE: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const HASHABLE: Self = Self(1 << 2);
    pub const SCRUBBABLE: Self = Self(1 << 3);
    pub const SYSTEM: Self = Self(1 << 4);
    pub const HAS_BUILD_OUTPUTS: Self = Self(1 << 5);
    pub const CREATE_DIRECTORY_ALLOWED: Self = Self(1 << 6);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SemanticPathFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for SemanticPathFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(SemanticPathFlags, &str); 7] = [
            (SemanticPathFlags::READABLE, "readable"),
            (SemanticPathFlags::WRITABLE, "writable"),
            (SemanticPathFlags::HASHABLE, "hashable"),
            (SemanticPathFlags::SCRUBBABLE, "scrubbable"),
            (SemanticPathFlags::SYSTEM, "system"),
            (SemanticPathFlags::HAS_BUILD_OUTPUTS, "build-outputs"),
            (SemanticPathFlags::CREATE_DIRECTORY_ALLOWED, "create-allowed"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// A named root and its flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticPathInfo {
    pub root_name: String,
    pub root: PathBuf,
    pub flags: SemanticPathFlags,
}

impl SemanticPathInfo {
    /// A usable mount has a name and an absolute root.
    pub fn is_valid(&self) -> bool {
        !self.root_name.is_empty() && self.root.is_absolute()
    }

    pub fn is_readable(&self) -> bool {
        self.flags.contains(SemanticPathFlags::READABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(SemanticPathFlags::WRITABLE)
    }

    pub fn is_hashable(&self) -> bool {
        self.flags.contains(SemanticPathFlags::HASHABLE)
    }

    pub fn is_scrubbable(&self) -> bool {
        self.flags.contains(SemanticPathFlags::SCRUBBABLE)
    }

    pub fn is_system(&self) -> bool {
        self.flags.contains(SemanticPathFlags::SYSTEM)
    }

    pub fn has_build_outputs(&self) -> bool {
        self.flags.contains(SemanticPathFlags::HAS_BUILD_OUTPUTS)
    }

    pub fn allows_create_directory(&self) -> bool {
        self.flags.contains(SemanticPathFlags::CREATE_DIRECTORY_ALLOWED)
    }
}

/// The mount table of one construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPathExpander {
    mounts: BTreeMap<String, SemanticPathInfo>,
}

impl MountPathExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard mounts for a resolver configuration.
    pub fn from_settings(settings: &ResolverSettings) -> Self {
        use SemanticPathFlags as F;

        let outputs = F::READABLE
            | F::WRITABLE
            | F::HASHABLE
            | F::SCRUBBABLE
            | F::HAS_BUILD_OUTPUTS
            | F::CREATE_DIRECTORY_ALLOWED;

        let mut expander = Self::new();
        expander.add(
            "BuildRoot",
            &settings.root,
            F::READABLE | F::WRITABLE | F::HASHABLE | F::HAS_BUILD_OUTPUTS | F::CREATE_DIRECTORY_ALLOWED,
        );
        expander.add("LogsDirectory", settings.log_root(), outputs);
        expander.add("ObjectRoot", settings.object_root(), outputs);
        expander.add(
            "MSBuildBin",
            settings.msbuild_directory(),
            F::READABLE | F::HASHABLE | F::SYSTEM,
        );
        if let Some(profile) = &settings.user_profile {
            expander.add("UserProfile", profile, F::READABLE | F::WRITABLE | F::SYSTEM);
        }
        if let Some(profile) = &settings.public_user_profile {
            expander.add("PublicUserProfile", profile, F::READABLE | F::SYSTEM);
        }
        expander
    }

    /// Add or replace a mount.
    pub fn add(&mut self, name: &str, root: impl AsRef<Path>, flags: SemanticPathFlags) {
        self.mounts.insert(
            name.to_string(),
            SemanticPathInfo {
                root_name: name.to_string(),
                root: root.as_ref().to_path_buf(),
                flags,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&SemanticPathInfo> {
        self.mounts.get(name)
    }

    /// Mounts by name.
    pub fn mounts(&self) -> impl Iterator<Item = &SemanticPathInfo> {
        self.mounts.values()
    }

    pub fn all_roots(&self) -> BTreeSet<PathBuf> {
        self.roots_where(|_| true)
    }

    pub fn writable_roots(&self) -> BTreeSet<PathBuf> {
        self.roots_where(SemanticPathInfo::is_writable)
    }

    pub fn create_allowed_roots(&self) -> BTreeSet<PathBuf> {
        self.roots_where(SemanticPathInfo::allows_create_directory)
    }

    pub fn scrubbable_roots(&self) -> BTreeSet<PathBuf> {
        self.roots_where(SemanticPathInfo::is_scrubbable)
    }

    fn roots_where(&self, pred: impl Fn(&SemanticPathInfo) -> bool) -> BTreeSet<PathBuf> {
        self.mounts
            .values()
            .filter(|info| pred(info))
            .map(|info| info.root.clone())
            .collect()
    }

    /// The innermost mount containing `path`.
    pub fn semantic_info_for(&self, path: &Path) -> Option<&SemanticPathInfo> {
        self.mounts
            .values()
            .filter(|info| path.starts_with(&info.root))
            .max_by_key(|info| info.root.components().count())
    }

    pub fn is_writable(&self, path: &Path) -> bool {
        self.semantic_info_for(path)
            .map(SemanticPathInfo::is_writable)
            .unwrap_or(false)
    }
}
