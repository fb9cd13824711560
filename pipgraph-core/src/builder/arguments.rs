//! Command-line construction for one MSBuild invocation.

use std::path::{Path, PathBuf};

use crate::error::PipBuildError;
use crate::pip::{render_command_line, Argument, ResponseFile};
use crate::types::Project;

/// Rendered command lines longer than this move into a response file.
pub const RESPONSE_FILE_THRESHOLD: usize = 32_000;

const FIXED_FLAGS: [&str; 7] = [
    "/NoLogo",
    "/p:TrackFileAccess=false",
    "/m:1",
    "/IgnoreProjectExtensions:.sln",
    "/ConsoleLoggerParameters:Verbosity=Minimal",
    "/noAutoResponse",
    "/nodeReuse:false",
];

/// Verbosity of the main file logger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogVerbosity {
    Quiet,
    Minimal,
    Normal,
    Detailed,
    Diagnostic,
}

impl LogVerbosity {
    /// Map the configured verbosity. Unset means `Normal`.
    pub fn parse(value: Option<&str>) -> Result<Self, PipBuildError> {
        match value {
            None => Ok(LogVerbosity::Normal),
            Some("quiet") => Ok(LogVerbosity::Quiet),
            Some("minimal") => Ok(LogVerbosity::Minimal),
            Some("normal") => Ok(LogVerbosity::Normal),
            Some("detailed") => Ok(LogVerbosity::Detailed),
            Some("diagnostic") => Ok(LogVerbosity::Diagnostic),
            Some(other) => Err(PipBuildError::Configuration {
                message: format!(
                    "Unknown log verbosity '{}' (expected quiet, minimal, normal, detailed or diagnostic)",
                    other
                ),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogVerbosity::Quiet => "Quiet",
            LogVerbosity::Minimal => "Minimal",
            LogVerbosity::Normal => "Normal",
            LogVerbosity::Detailed => "Detailed",
            LogVerbosity::Diagnostic => "Diagnostic",
        }
    }
}

/// Files written by the four file loggers and the optional binary logger.
#[derive(Clone, Debug)]
pub struct LogFiles {
    pub directory: PathBuf,
    pub log: PathBuf,
    pub warnings: PathBuf,
    pub errors: PathBuf,
    pub performance: PathBuf,
    pub binary: Option<PathBuf>,
}

impl LogFiles {
    pub fn new(directory: PathBuf, binary_log: bool) -> Self {
        Self {
            log: directory.join("msbuild.log"),
            warnings: directory.join("msbuild.wrn"),
            errors: directory.join("msbuild.err"),
            performance: directory.join("msbuild.prf"),
            binary: binary_log.then(|| directory.join("msbuild.binlog")),
            directory,
        }
    }

    /// Every log file in declaration order.
    pub fn all(&self) -> impl Iterator<Item = &PathBuf> {
        [&self.log, &self.warnings, &self.errors, &self.performance]
            .into_iter()
            .chain(self.binary.as_ref())
    }
}

/// Cross-project cache arguments.
pub struct IsolationArguments<'a> {
    /// Cache artifacts of dependencies that build in isolation.
    pub input_caches: Vec<&'a Path>,
    /// This project's own cache artifact, when it builds in isolation.
    pub output_cache: Option<&'a Path>,
}

/// Assemble the argument list in its fixed order.
pub fn build_arguments(
    project: &Project,
    logs: &LogFiles,
    verbosity: LogVerbosity,
    isolation: &IsolationArguments<'_>,
) -> Vec<Argument> {
    let mut args: Vec<Argument> = FIXED_FLAGS.iter().map(|f| Argument::verbatim(*f)).collect();

    args.push(Argument::escaped(format!(
        "/flp1:logfile={};Verbosity={}",
        logs.log.display(),
        verbosity.as_str()
    )));
    args.push(Argument::escaped(format!(
        "/flp2:logfile={};Verbosity=Quiet;warningsonly",
        logs.warnings.display()
    )));
    args.push(Argument::escaped(format!(
        "/flp3:logfile={};Verbosity=Quiet;errorsonly",
        logs.errors.display()
    )));
    args.push(Argument::escaped(format!(
        "/flp4:logfile={};PerformanceSummary",
        logs.performance.display()
    )));
    if let Some(binary) = &logs.binary {
        args.push(Argument::escaped(format!("/binaryLogger:{}", binary.display())));
    }

    for (key, value) in &project.global_properties {
        args.push(Argument::verbatim(format!(
            "/p:{}=\"{}\"",
            key,
            value.replace('"', "\\\"")
        )));
    }

    for target in &project.predicted_targets {
        args.push(Argument::verbatim(format!("/t:{}", target)));
    }

    // Caches of isolated dependencies are read even when this project does
    // not build in isolation itself.
    for cache in &isolation.input_caches {
        args.push(Argument::escaped(format!("/irc:{}", cache.display())));
    }
    match isolation.output_cache {
        Some(cache) => args.push(Argument::escaped(format!("/orc:{}", cache.display()))),
        None => args.push(Argument::verbatim("/p:buildprojectreferences=false")),
    }

    args
}

/// Move overlong argument lists into a response file at `path`.
///
/// Returns the arguments to launch with and the response file, if one was needed.
pub fn apply_response_file(
    arguments: Vec<Argument>,
    path: PathBuf,
) -> (Vec<Argument>, Option<ResponseFile>) {
    if render_command_line(&arguments).len() <= RESPONSE_FILE_THRESHOLD {
        return (arguments, None);
    }

    let content = arguments
        .iter()
        .map(Argument::render)
        .collect::<Vec<_>>()
        .join("\n");
    let launch = vec![Argument::escaped(format!("@{}", path.display()))];
    (
        launch,
        Some(ResponseFile {
            path,
            content,
            arguments,
        }),
    )
}
