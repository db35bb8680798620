// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use testfleet_metadata::FleetExitCode;
use testfleet_runner::errors::*;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are mostly placeholder messages. Errors are expected to be printed with
// display_to_stderr, which colorizes them and prints their causes.

/// An error that testfleet expects to happen, as opposed to a bug.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("no tests selected")]
    NoTestsSelected,
    #[error("--write-stats requires --stats-dir")]
    WriteStatsWithoutStatsDir,
    #[error("invalid number of repetitions")]
    InvalidRepetitions { value: u32 },
    #[error("stats directory not found")]
    StatsDirNotFound { dir: Utf8PathBuf },
    #[error("output directory not writable")]
    DirNotWritable {
        arg_name: &'static str,
        dir: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("invalid native program regex")]
    InvalidProgramRegex {
        regex: String,
        #[source]
        err: regex::Error,
    },
    #[error("build or source root error")]
    BuildRoots {
        #[from]
        err: RunConfigBuildError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("substrate build error")]
    SubstrateBuildError {
        #[from]
        err: SubstrateBuildError,
    },
    #[error("test list read error")]
    TestListReadError {
        #[from]
        err: TestListReadError,
    },
    #[error("test discovery failed")]
    DiscoveryFailed {
        #[from]
        err: DiscoveryError,
    },
    #[error("test list write error")]
    WriteTestListError {
        #[from]
        err: WriteTestListError,
    },
    #[error("stats write error")]
    StatsWriteError {
        #[from]
        err: StatsWriteError,
    },
    #[error("error writing to stdout")]
    WriteStdoutError {
        #[source]
        err: std::io::Error,
    },
    #[error("worker failed")]
    WorkerFailed {
        #[from]
        err: WorkerError,
    },
}

impl ExpectedError {
    pub(crate) fn dir_not_writable(
        arg_name: &'static str,
        dir: impl Into<Utf8PathBuf>,
        err: std::io::Error,
    ) -> Self {
        Self::DirNotWritable {
            arg_name,
            dir: dir.into(),
            err,
        }
    }

    pub(crate) fn invalid_program_regex(regex: impl Into<String>, err: regex::Error) -> Self {
        Self::InvalidProgramRegex {
            regex: regex.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::NoTestsSelected
            | Self::WriteStatsWithoutStatsDir
            | Self::InvalidRepetitions { .. }
            | Self::StatsDirNotFound { .. }
            | Self::DirNotWritable { .. }
            | Self::InvalidProgramRegex { .. }
            | Self::BuildRoots { .. }
            | Self::ConfigParseError { .. }
            | Self::SubstrateBuildError { .. }
            | Self::TestListReadError { .. } => FleetExitCode::SETUP_ERROR,
            Self::DiscoveryFailed { .. } => FleetExitCode::TEST_DISCOVERY_FAILED,
            Self::WriteTestListError { .. }
            | Self::StatsWriteError { .. }
            | Self::WriteStdoutError { .. } => FleetExitCode::WRITE_OUTPUT_ERROR,
            Self::WorkerFailed { .. } => FleetExitCode::WORKER_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::NoTestsSelected => {
                error!(
                    "no tests selected: pass {}, {}, {} or {}",
                    "--native".style(styles.bold),
                    "--managed".style(styles.bold),
                    "--all".style(styles.bold),
                    "--test-list".style(styles.bold),
                );
                None
            }
            Self::WriteStatsWithoutStatsDir => {
                error!(
                    "{} requires {} to be specified",
                    "--write-stats".style(styles.bold),
                    "--stats-dir".style(styles.bold),
                );
                None
            }
            Self::InvalidRepetitions { value } => {
                error!(
                    "{} must be at least 1 (got {value})",
                    "--num-repetitions".style(styles.bold),
                );
                None
            }
            Self::StatsDirNotFound { dir } => {
                error!(
                    "stats directory `{}` does not exist or is not a directory",
                    dir.style(styles.bold)
                );
                None
            }
            Self::DirNotWritable { arg_name, dir, err } => {
                error!(
                    "directory `{}` for {} is not writable",
                    dir.style(styles.bold),
                    arg_name.style(styles.bold),
                );
                Some(err as &dyn Error)
            }
            Self::InvalidProgramRegex { regex, err } => {
                error!(
                    "invalid regex `{}` for {}",
                    regex.style(styles.bold),
                    "--native-program-regex".style(styles.bold),
                );
                Some(err as &dyn Error)
            }
            Self::BuildRoots { err } => {
                error!("{err}");
                err.source()
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse testfleet config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::SubstrateBuildError { err } => {
                error!("failed to set up the substrate");
                Some(err as &dyn Error)
            }
            Self::TestListReadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::DiscoveryFailed { err } => {
                error!("test discovery failed");
                if matches!(err, DiscoveryError::NoTestPrograms { .. }) {
                    error!(
                        target: NO_HEADING_TARGET,
                        "{}",
                        "(hint: the build system's test list was probably never generated; \
                         build the tests first)"
                            .style(styles.warning_text)
                    );
                }
                Some(err as &dyn Error)
            }
            Self::WriteTestListError { err } => {
                error!(
                    "failed to write test list to `{}`",
                    err.path().style(styles.bold)
                );
                err.source()
            }
            Self::StatsWriteError { err } => {
                error!("failed to record stats");
                Some(err as &dyn Error)
            }
            Self::WriteStdoutError { err } => {
                error!("failed to write to stdout");
                Some(err as &dyn Error)
            }
            Self::WorkerFailed { err } => {
                error!("worker failed");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(
            ExpectedError::NoTestsSelected.process_exit_code(),
            FleetExitCode::SETUP_ERROR
        );
        assert_eq!(
            ExpectedError::WriteStatsWithoutStatsDir.process_exit_code(),
            96
        );
        assert_eq!(
            ExpectedError::WriteStdoutError {
                err: std::io::Error::other("closed"),
            }
            .process_exit_code(),
            FleetExitCode::WRITE_OUTPUT_ERROR
        );
        assert_eq!(
            ExpectedError::from(WorkerError::WorkerExited { exit_code: Some(3) })
                .process_exit_code(),
            FleetExitCode::WORKER_FAILED
        );
    }
}
