// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testfleet.

use crate::dispatch::JobKind;
use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{borrow::Cow, fmt, io};
use thiserror::Error;

/// An error that occurred while parsing a [`TestDescriptor`](crate::descriptor::TestDescriptor).
#[derive(Clone, Debug, Error)]
#[error("invalid test descriptor `{input}`: {reason}")]
pub struct DescriptorParseError {
    input: String,
    reason: Cow<'static, str>,
}

impl DescriptorParseError {
    pub(crate) fn new(input: impl Into<String>, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Replaces the reported input with the full descriptor string being parsed.
    pub(crate) fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Returns the reason the input was rejected.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// An error that occurred while parsing the testfleet config.
#[derive(Debug, Error)]
#[error("failed to parse testfleet config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of config parse error that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A regular expression in the config failed to compile.
    #[error("invalid regex for `{key}`")]
    InvalidRegex {
        /// The config key.
        key: &'static str,

        /// The underlying error.
        #[source]
        error: regex::Error,
    },

    /// A command line in the config could not be split into arguments.
    #[error("invalid command line for `{key}`: `{command}`")]
    InvalidCommand {
        /// The config key.
        key: &'static str,

        /// The command that could not be split.
        command: String,

        /// The underlying error.
        #[source]
        error: shell_words::ParseError,
    },

    /// A command line in the config was empty.
    #[error("command line for `{key}` is empty")]
    EmptyCommand {
        /// The config key.
        key: &'static str,
    },
}

/// An error that occurred while parsing a [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error("invalid test-threads value `{input}`: {reason}")]
pub struct TestThreadsParseError {
    input: String,
    reason: &'static str,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self {
            input: input.into(),
            reason,
        }
    }
}

/// An error reconstructing a [`RunConfig`](crate::config::RunConfig) from its serialized map.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RunConfigError {
    /// A required key was missing.
    #[error("run config is missing required key `{key}`")]
    MissingKey {
        /// The missing key.
        key: &'static str,
    },

    /// A key was present but its value could not be interpreted.
    #[error("run config key `{key}` has invalid value `{value}`: {message}")]
    InvalidValue {
        /// The key.
        key: &'static str,

        /// The value that failed to parse.
        value: String,

        /// A description of the problem.
        message: String,
    },
}

impl RunConfigError {
    pub(crate) fn invalid_value(
        key: &'static str,
        value: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        Self::InvalidValue {
            key,
            value: value.into(),
            message: message.to_string(),
        }
    }
}

/// An error that occurred while building a [`RunConfig`](crate::config::RunConfig) on the
/// controller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunConfigBuildError {
    /// The build root could not be canonicalized.
    #[error("build root `{build_root}` could not be accessed")]
    BuildRoot {
        /// The build root.
        build_root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The build root has no grandparent to infer the source root from.
    #[error(
        "cannot infer source root from build root `{build_root}`\n\
         (hint: pass --src-root explicitly)"
    )]
    NoSourceRoot {
        /// The build root.
        build_root: Utf8PathBuf,
    },

    /// The source root could not be canonicalized.
    #[error("source root `{src_root}` could not be accessed")]
    SourceRoot {
        /// The source root.
        src_root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while discovering tests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The program-listing command could not be spawned or read from.
    #[error("running program-listing command `{}` failed", shell_words::join(.command))]
    ProgramListExec {
        /// The command that was run.
        command: Vec<String>,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The program-listing command exited with a non-zero status.
    #[error(
        "program-listing command `{}` exited with {}",
        shell_words::join(.command),
        display_exit_code(*.exit_code)
    )]
    ProgramListFailed {
        /// The command that was run.
        command: Vec<String>,

        /// The exit code, or `None` if the command was terminated by a signal.
        exit_code: Option<i32>,
    },

    /// The program-listing command did not produce any test programs.
    #[error(
        "no test programs found under build root `{build_root}`\n\
         (hint: the build system's test list was probably never generated, \
         make sure the build has completed)"
    )]
    NoTestPrograms {
        /// The build root.
        build_root: Utf8PathBuf,
    },

    /// Walking a managed-runtime source root failed.
    #[error("error walking managed-runtime source root `{root}`")]
    ManagedWalk {
        /// The root being walked.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A path found while walking a managed-runtime source root was not valid UTF-8.
    #[error("non-UTF-8 path found under managed-runtime source root `{root}`: {}", .path.display())]
    NonUtf8Path {
        /// The root being walked.
        root: Utf8PathBuf,

        /// The offending path.
        path: std::path::PathBuf,
    },
}

fn display_exit_code(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_owned(),
    }
}

/// An error that occurred while reading a saved test list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestListReadError {
    /// The file could not be read.
    #[error("error reading test list from `{path}`")]
    Read {
        /// The path to the test list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A line of the file was not a valid descriptor.
    #[error("error parsing test list `{path}` at line {line_number}")]
    Parse {
        /// The path to the test list.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line_number: usize,

        /// The underlying error.
        #[source]
        error: DescriptorParseError,
    },
}

/// An error that occurs while writing a list of descriptors to a file.
#[derive(Debug, Error)]
#[error("error writing test list to `{path}`")]
#[non_exhaustive]
pub struct WriteTestListError {
    path: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl WriteTestListError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// Returns the path that could not be written.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// An error that occurred while a worker was processing a partition.
///
/// These are infrastructure errors: the substrate retries the whole partition when one occurs.
/// Test failures are never represented as worker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// The run config shipped to the worker could not be reconstructed.
    #[error("error reconstructing worker environment")]
    RunConfig(#[source] RunConfigError),

    /// An I/O operation failed.
    #[error("{context}")]
    Io {
        /// What was being done.
        context: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A worker process could not be spawned.
    #[error("error spawning worker process `{}`", shell_words::join(.command))]
    Spawn {
        /// The command line.
        command: Vec<String>,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A worker process exited with a failure.
    #[error("worker process exited with {}", display_exit_code(*.exit_code))]
    WorkerExited {
        /// The exit code, or `None` if the worker was terminated by a signal.
        exit_code: Option<i32>,
    },

    /// The worker request could not be read.
    #[error("error reading worker request")]
    InvalidRequest(#[source] serde_json::Error),

    /// The jobs or their outputs could not be (de)serialized.
    #[error("error in worker protocol for {kind} jobs")]
    Protocol {
        /// The kind of job being processed.
        kind: JobKind,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A worker process returned the wrong number of outputs.
    #[error("worker process returned {actual} outputs, expected {expected}")]
    OutputCountMismatch {
        /// The number of jobs sent.
        expected: usize,

        /// The number of outputs received.
        actual: usize,
    },
}

impl WorkerError {
    pub(crate) fn io(context: impl Into<String>, error: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            error,
        }
    }
}

/// A partition exhausted its infrastructure retry budget.
///
/// Every job in the partition resolves to a copy of this failure.
#[derive(Clone, Debug, Error)]
#[error("partition failed after {attempts} attempts: {message}")]
pub struct InfraFailure {
    attempts: usize,
    message: String,
}

impl InfraFailure {
    pub(crate) fn new(attempts: usize, error: &WorkerError) -> Self {
        Self {
            attempts,
            message: error_chain(error),
        }
    }

    pub(crate) fn with_message(attempts: usize, message: impl Into<String>) -> Self {
        Self {
            attempts,
            message: message.into(),
        }
    }

    /// Returns the number of attempts made.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Returns the rendered error chain of the last attempt.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Renders an error and all its sources on one line, separated by `: `.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        out.push_str(": ");
        out.push_str(&err.to_string());
        source = err.source();
    }
    out
}

/// An error that occurred while building a substrate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubstrateBuildError {
    /// The local thread pool could not be built.
    #[error("error building local thread pool")]
    ThreadPool(#[source] rayon::ThreadPoolBuildError),

    /// The path to the current executable could not be determined.
    #[error("error determining path to current executable")]
    CurrentExe(#[source] io::Error),

    /// The path to the current executable was not valid UTF-8.
    #[error("current executable path is not valid UTF-8: {}", .path.display())]
    NonUtf8CurrentExe {
        /// The path.
        path: std::path::PathBuf,
    },
}

/// An error that occurred while writing a stats record.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatsWriteError {
    /// A directory could not be created.
    #[error("error creating stats directory `{dir}`")]
    CreateDir {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The record could not be serialized.
    #[error("error serializing stats record")]
    Serialize(#[source] serde_json::Error),

    /// The stats file already exists.
    #[error("stats file `{path}` already exists")]
    AlreadyExists {
        /// The path.
        path: Utf8PathBuf,
    },

    /// The record could not be written.
    #[error("error writing stats file `{path}`")]
    Write {
        /// The path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while reading historical stats records.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatsReadError {
    /// A directory could not be listed or a file could not be read.
    #[error("error reading stats from `{path}`")]
    Read {
        /// The path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A stats file could not be parsed.
    #[error("error parsing stats file `{path}`")]
    Parse {
        /// The path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}
