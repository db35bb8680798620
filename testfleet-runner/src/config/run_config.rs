// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ExecutionConfig;
use crate::errors::{RunConfigBuildError, RunConfigError};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, time::Duration};

/// Build types recognized as the prefix of a build root's directory name.
pub const KNOWN_BUILD_TYPES: &[&str] = &[
    "asan",
    "compilecmds",
    "debug",
    "fastdebug",
    "idebug",
    "ifastdebug",
    "irelease",
    "profile_build",
    "profile_gen",
    "release",
    "tsan",
];

/// The build type used if it can't be inferred from the build root.
pub const DEFAULT_BUILD_TYPE: &str = "debug";

/// The canonicalized build and source roots of a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildRoots {
    build_root: Utf8PathBuf,
    src_root: Utf8PathBuf,
}

impl BuildRoots {
    /// Resolves the build root and the source root.
    ///
    /// If `src_root` is not specified, it is inferred as the grandparent of the build root
    /// (`<src_root>/build/<build-name>`).
    pub fn resolve(
        build_root: &Utf8Path,
        src_root: Option<&Utf8Path>,
    ) -> Result<Self, RunConfigBuildError> {
        let build_root =
            build_root
                .canonicalize_utf8()
                .map_err(|error| RunConfigBuildError::BuildRoot {
                    build_root: build_root.to_owned(),
                    error,
                })?;
        let src_root = match src_root {
            Some(src_root) => src_root.to_owned(),
            None => build_root
                .parent()
                .and_then(|parent| parent.parent())
                .ok_or_else(|| RunConfigBuildError::NoSourceRoot {
                    build_root: build_root.clone(),
                })?
                .to_owned(),
        };
        let src_root = src_root
            .canonicalize_utf8()
            .map_err(|error| RunConfigBuildError::SourceRoot {
                src_root: src_root.clone(),
                error,
            })?;

        Ok(Self {
            build_root,
            src_root,
        })
    }

    /// Returns the canonical build root.
    pub fn build_root(&self) -> &Utf8Path {
        &self.build_root
    }

    /// Returns the canonical source root.
    pub fn src_root(&self) -> &Utf8Path {
        &self.src_root
    }
}

/// Infers the build type from the first `-`-separated component of the build root's directory
/// name, e.g. `debug` for `debug-gcc-dynamic`.
pub fn infer_build_type(build_root: &Utf8Path) -> String {
    build_root
        .file_name()
        .and_then(|name| name.split('-').next())
        .map(str::to_lowercase)
        .filter(|prefix| KNOWN_BUILD_TYPES.contains(&prefix.as_str()))
        .unwrap_or_else(|| DEFAULT_BUILD_TYPE.to_owned())
}

/// Process-wide, immutable configuration for a run.
///
/// This is serialized into a flat map of strings by the controller and reconstructed on every
/// worker, so that workers never depend on ambient process state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunConfig {
    build_root: Utf8PathBuf,
    build_type: String,
    src_root: Utf8PathBuf,
    run_test_script: Utf8PathBuf,
    test_log_dir: Utf8PathBuf,
    attempt_index_env_var: String,
    build_type_env_var: String,
    clock_sync_command: Option<Vec<String>>,
    clock_sync_max_attempts: u32,
    clock_sync_retry_delay: Duration,
}

impl RunConfig {
    /// Builds a run config for the given roots.
    ///
    /// `build_type` is inferred from the build root if not specified.
    pub fn new(roots: &BuildRoots, build_type: Option<&str>, execution: &ExecutionConfig) -> Self {
        let build_type = match build_type {
            Some(build_type) => build_type.to_owned(),
            None => infer_build_type(roots.build_root()),
        };
        Self {
            build_root: roots.build_root().to_owned(),
            build_type,
            src_root: roots.src_root().to_owned(),
            run_test_script: roots.src_root().join(&execution.run_test_script),
            test_log_dir: roots.build_root().join(&execution.log_dir),
            attempt_index_env_var: execution.attempt_env_var.clone(),
            build_type_env_var: execution.build_type_env_var.clone(),
            clock_sync_command: execution.clock_sync_command.clone(),
            clock_sync_max_attempts: execution.clock_sync_max_attempts,
            clock_sync_retry_delay: execution.clock_sync_retry_delay,
        }
    }

    /// Serializes this config into a flat map.
    ///
    /// [`Self::from_map`] is the exact inverse of this method.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut insert = |key: &str, value: String| {
            map.insert(key.to_owned(), value);
        };
        insert(keys::BUILD_ROOT, self.build_root.to_string());
        insert(keys::BUILD_TYPE, self.build_type.clone());
        insert(keys::SRC_ROOT, self.src_root.to_string());
        insert(keys::RUN_TEST_SCRIPT, self.run_test_script.to_string());
        insert(keys::TEST_LOG_DIR, self.test_log_dir.to_string());
        insert(keys::ATTEMPT_INDEX_ENV_VAR, self.attempt_index_env_var.clone());
        insert(keys::BUILD_TYPE_ENV_VAR, self.build_type_env_var.clone());
        if let Some(command) = &self.clock_sync_command {
            insert(keys::CLOCK_SYNC_COMMAND, shell_words::join(command));
        }
        insert(
            keys::CLOCK_SYNC_MAX_ATTEMPTS,
            self.clock_sync_max_attempts.to_string(),
        );
        insert(
            keys::CLOCK_SYNC_RETRY_DELAY,
            humantime::format_duration(self.clock_sync_retry_delay).to_string(),
        );
        map
    }

    /// Reconstructs a config from a map produced by [`Self::to_map`].
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, RunConfigError> {
        let get = |key: &'static str| {
            map.get(key)
                .map(String::as_str)
                .ok_or(RunConfigError::MissingKey { key })
        };

        let clock_sync_command = match map.get(keys::CLOCK_SYNC_COMMAND) {
            Some(command) => {
                let args = shell_words::split(command).map_err(|error| {
                    RunConfigError::invalid_value(keys::CLOCK_SYNC_COMMAND, command, error)
                })?;
                if args.is_empty() {
                    return Err(RunConfigError::invalid_value(
                        keys::CLOCK_SYNC_COMMAND,
                        command,
                        "command is empty",
                    ));
                }
                Some(args)
            }
            None => None,
        };

        let max_attempts = get(keys::CLOCK_SYNC_MAX_ATTEMPTS)?;
        let clock_sync_max_attempts = max_attempts.parse().map_err(|error| {
            RunConfigError::invalid_value(keys::CLOCK_SYNC_MAX_ATTEMPTS, max_attempts, error)
        })?;

        let retry_delay = get(keys::CLOCK_SYNC_RETRY_DELAY)?;
        let clock_sync_retry_delay = humantime::parse_duration(retry_delay).map_err(|error| {
            RunConfigError::invalid_value(keys::CLOCK_SYNC_RETRY_DELAY, retry_delay, error)
        })?;

        Ok(Self {
            build_root: absolute_path(keys::BUILD_ROOT, get(keys::BUILD_ROOT)?)?,
            build_type: get(keys::BUILD_TYPE)?.to_owned(),
            src_root: absolute_path(keys::SRC_ROOT, get(keys::SRC_ROOT)?)?,
            run_test_script: absolute_path(keys::RUN_TEST_SCRIPT, get(keys::RUN_TEST_SCRIPT)?)?,
            test_log_dir: absolute_path(keys::TEST_LOG_DIR, get(keys::TEST_LOG_DIR)?)?,
            attempt_index_env_var: get(keys::ATTEMPT_INDEX_ENV_VAR)?.to_owned(),
            build_type_env_var: get(keys::BUILD_TYPE_ENV_VAR)?.to_owned(),
            clock_sync_command,
            clock_sync_max_attempts,
            clock_sync_retry_delay,
        })
    }

    /// Returns the absolute build root.
    pub fn build_root(&self) -> &Utf8Path {
        &self.build_root
    }

    /// Returns the build type.
    pub fn build_type(&self) -> &str {
        &self.build_type
    }

    /// Returns the absolute source root.
    pub fn src_root(&self) -> &Utf8Path {
        &self.src_root
    }

    /// Returns the absolute path to the single-test entry point.
    pub fn run_test_script(&self) -> &Utf8Path {
        &self.run_test_script
    }

    /// Returns the absolute directory per-test output is captured to.
    pub fn test_log_dir(&self) -> &Utf8Path {
        &self.test_log_dir
    }

    /// Returns the name of the variable set to the attempt index.
    pub fn attempt_index_env_var(&self) -> &str {
        &self.attempt_index_env_var
    }

    /// Returns the name of the variable set to the build type.
    pub fn build_type_env_var(&self) -> &str {
        &self.build_type_env_var
    }

    /// Returns the clock-sync check command, if enabled.
    pub fn clock_sync_command(&self) -> Option<&[String]> {
        self.clock_sync_command.as_deref()
    }

    /// Returns the number of clock-sync attempts.
    pub fn clock_sync_max_attempts(&self) -> u32 {
        self.clock_sync_max_attempts
    }

    /// Returns the delay between clock-sync attempts.
    pub fn clock_sync_retry_delay(&self) -> Duration {
        self.clock_sync_retry_delay
    }

    /// Overrides the single-test entry point.
    pub fn with_run_test_script(mut self, run_test_script: impl Into<Utf8PathBuf>) -> Self {
        self.run_test_script = run_test_script.into();
        self
    }

    /// Overrides the clock-sync check.
    pub fn with_clock_sync_command(mut self, command: Option<Vec<String>>) -> Self {
        self.clock_sync_command = command;
        self
    }
}

fn absolute_path(key: &'static str, value: &str) -> Result<Utf8PathBuf, RunConfigError> {
    let path = Utf8PathBuf::from(value);
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(RunConfigError::invalid_value(
            key,
            value,
            "path is not absolute",
        ))
    }
}

mod keys {
    pub(super) const BUILD_ROOT: &str = "build_root";
    pub(super) const BUILD_TYPE: &str = "build_type";
    pub(super) const SRC_ROOT: &str = "src_root";
    pub(super) const RUN_TEST_SCRIPT: &str = "run_test_script";
    pub(super) const TEST_LOG_DIR: &str = "test_log_dir";
    pub(super) const ATTEMPT_INDEX_ENV_VAR: &str = "attempt_index_env_var";
    pub(super) const BUILD_TYPE_ENV_VAR: &str = "build_type_env_var";
    pub(super) const CLOCK_SYNC_COMMAND: &str = "clock_sync_command";
    pub(super) const CLOCK_SYNC_MAX_ATTEMPTS: &str = "clock_sync_max_attempts";
    pub(super) const CLOCK_SYNC_RETRY_DELAY: &str = "clock_sync_retry_delay";
}
