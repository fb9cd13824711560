//! Pips: immutable, sandboxable build-tool invocations.
//!
//! A `Pip` is what the `PipBuilder` produces for one project. It carries the
//! full command-line, environment and I/O contract of the invocation. The
//! graph assembler later gives it an identity (node id + semistable hash) and
//! seals its output directories.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Node id of a pip in the graph. Zero is never assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipId(pub u32);

impl fmt::Display for PipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pip{:08X}", self.0)
    }
}

/// Kind of graph node. Values stored per pip depend on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipType {
    Process,
    SpecFile,
    Module,
}

impl PipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipType::Process => "process",
            PipType::SpecFile => "specfile",
            PipType::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "process" => Some(PipType::Process),
            "specfile" => Some(PipType::SpecFile),
            "module" => Some(PipType::Module),
            _ => None,
        }
    }
}

impl fmt::Display for PipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A file together with the number of times it has been written in the graph.
///
/// Source files have rewrite count 0, produced files 1 or more.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileArtifact {
    pub path: PathBuf,
    pub rewrite_count: u32,
}

impl FileArtifact {
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rewrite_count: 0,
        }
    }

    pub fn output(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rewrite_count: 1,
        }
    }

    pub fn is_output(&self) -> bool {
        self.rewrite_count > 0
    }
}

/// A sealed output directory: the path plus the seal id of one producer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirectoryArtifact {
    pub path: PathBuf,
    pub seal_id: u32,
}

/// How an argument token is quoted when the command line is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentEscaping {
    /// Emitted verbatim.
    NoEscaping,
    /// Quoted following C runtime rules when it contains spaces or quotes.
    CRuntimeArgumentRules,
}

/// One command-line token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Argument {
    pub value: String,
    pub escaping: ArgumentEscaping,
}

impl Argument {
    pub fn verbatim(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            escaping: ArgumentEscaping::NoEscaping,
        }
    }

    pub fn escaped(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            escaping: ArgumentEscaping::CRuntimeArgumentRules,
        }
    }

    /// Render the token as it appears on the command line.
    pub fn render(&self) -> String {
        match self.escaping {
            ArgumentEscaping::NoEscaping => self.value.clone(),
            ArgumentEscaping::CRuntimeArgumentRules => escape_c_runtime(&self.value),
        }
    }
}

fn escape_c_runtime(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\t', '"']) {
        return value.to_string();
    }

    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    let mut backslashes = 0;
    for ch in value.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                escaped.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                escaped.push('"');
                backslashes = 0;
            }
            _ => {
                escaped.extend(std::iter::repeat('\\').take(backslashes));
                escaped.push(ch);
                backslashes = 0;
            }
        }
    }
    // Backslashes before the closing quote must be doubled
    escaped.extend(std::iter::repeat('\\').take(backslashes * 2));
    escaped.push('"');
    escaped
}

/// Render a whole argument list separated by single spaces.
pub fn render_command_line(arguments: &[Argument]) -> String {
    arguments
        .iter()
        .map(Argument::render)
        .collect::<Vec<_>>()
        .join(" ")
}

/// An environment entry. Pass-through entries carry no value and are never hashed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: Option<String>,
    pub is_pass_through: bool,
}

impl EnvironmentVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            is_pass_through: false,
        }
    }

    pub fn pass_through(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            is_pass_through: true,
        }
    }
}

/// Whether a declared output file must exist after execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputExistence {
    Required,
    Optional,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutput {
    pub artifact: FileArtifact,
    pub existence: OutputExistence,
}

/// Arguments moved out of an overlong command line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFile {
    pub path: PathBuf,
    /// Rendered tokens, one per line.
    pub content: String,
    /// The arguments `content` was rendered from.
    pub arguments: Vec<Argument>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerIsolation {
    /// Every output is written to an isolated location and merged afterwards.
    IsolateAllOutputs,
}

/// What happens when two pips write the same location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoubleWritePolicy {
    DoubleWritesAreErrors,
    #[default]
    AllowSameContentDoubleWrites,
    UnsafeFirstDoubleWriteWins,
}

impl DoubleWritePolicy {
    pub fn allows_double_writes(&self) -> bool {
        !matches!(self, DoubleWritePolicy::DoubleWritesAreErrors)
    }
}

/// Where a pip came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipProvenance {
    pub spec_path: PathBuf,
    pub module: String,
    pub symbol: String,
}

/// A process pip, as built for one project evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pip {
    pub executable: PathBuf,
    pub working_directory: PathBuf,
    pub arguments: Vec<Argument>,
    pub response_file: Option<ResponseFile>,
    /// Sorted by name.
    pub environment: Vec<EnvironmentVariable>,
    pub file_inputs: BTreeSet<FileArtifact>,
    pub directory_inputs: BTreeSet<DirectoryArtifact>,
    pub file_outputs: Vec<FileOutput>,
    /// Shared opaque output directories; never nested in one another.
    pub directory_outputs: Vec<PathBuf>,
    pub untracked_scopes: BTreeSet<PathBuf>,
    pub untracked_paths: BTreeSet<PathBuf>,
    pub cache_artifact: Option<FileArtifact>,
    pub container_isolation: Option<ContainerIsolation>,
    pub double_write_policy: DoubleWritePolicy,
    pub provenance: PipProvenance,
    /// Pure function of (full path, sorted targets, sorted global properties).
    pub identity_token: u64,
}

impl Pip {
    /// The command line exactly as the sandbox would launch it.
    pub fn command_line(&self) -> String {
        render_command_line(&self.arguments)
    }

    pub fn builds_in_isolation(&self) -> bool {
        self.cache_artifact.is_some()
    }

    pub fn environment_value(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|var| var.name == name)
            .and_then(|var| var.value.as_deref())
    }

    /// Every argument token, including those moved into the response file.
    pub fn argument_values(&self) -> Vec<String> {
        match &self.response_file {
            Some(rsp) => rsp.arguments.iter().map(|a| a.value.clone()).collect(),
            None => self.arguments.iter().map(|a| a.value.clone()).collect(),
        }
    }
}
