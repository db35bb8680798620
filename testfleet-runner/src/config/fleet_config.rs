// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestThreads;
use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use regex::Regex;
use serde::Deserialize;
use std::{collections::BTreeMap, collections::BTreeSet, num::NonZeroUsize, time::Duration};
use tracing::warn;

/// Overall tool configuration for testfleet.
///
/// This is assembled from the defaults embedded in the binary, layered under
/// `.config/testfleet.toml` in the source root (or an explicitly passed config file).
#[derive(Clone, Debug)]
pub struct FleetConfig {
    config_file: Utf8PathBuf,
    discovery: DiscoveryConfig,
    dispatch: DispatchConfig,
    execution: ExecutionConfig,
    stats: StatsConfig,
    driver: DriverConfig,
}

impl FleetConfig {
    /// The default location of the config within the source root.
    pub const CONFIG_PATH: &'static str = ".config/testfleet.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the testfleet config from the given file, or if not specified from
    /// `.config/testfleet.toml` in the source root.
    ///
    /// If the file isn't specified and the source root doesn't have `.config/testfleet.toml`,
    /// uses the default config options.
    pub fn from_sources(
        src_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = src_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warn!(
                "ignoring unknown configuration keys in config file {config_file}: {}",
                unknown.iter().join(", ")
            );
        }

        let (discovery, execution) = deserialized
            .compile()
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        Ok(Self {
            config_file,
            discovery,
            dispatch: deserialized.dispatch,
            execution,
            stats: deserialized.stats,
            driver: deserialized.driver,
        })
    }

    /// Returns the default testfleet config.
    #[cfg(test)]
    pub(crate) fn default_config() -> Self {
        let builder = Self::make_default_config();
        let (deserialized, unknown) =
            Self::build_and_deserialize_config(&builder).expect("default config is always valid");

        // The default config is shipped with this binary, so it must not contain unknown keys.
        if !unknown.is_empty() {
            panic!(
                "found unknown keys in default config: {}",
                unknown.iter().join(", ")
            );
        }

        let (discovery, execution) = deserialized
            .compile()
            .expect("default config is always valid");
        Self {
            config_file: Utf8PathBuf::from(Self::CONFIG_PATH),
            discovery,
            dispatch: deserialized.dispatch,
            execution,
            stats: deserialized.stats,
            driver: deserialized.driver,
        }
    }

    /// Returns the user config file this config was read from. The file may not exist.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the discovery configuration.
    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    /// Returns the dispatch configuration.
    pub fn dispatch(&self) -> &DispatchConfig {
        &self.dispatch
    }

    /// Returns the execution configuration.
    pub fn execution(&self) -> &ExecutionConfig {
        &self.execution
    }

    /// Returns the stats configuration.
    pub fn stats(&self) -> &StatsConfig {
        &self.stats
    }

    /// Returns the driver configuration.
    pub fn driver(&self) -> &DriverConfig {
        &self.driver
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(FleetConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: FleetConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already reports the key, so drop it from the config error.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Configuration for the discovery round.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Programs run as a single unit rather than expanded into cases.
    pub one_shot_tests: Vec<String>,

    /// Substrings that mark a line of listing output as noise.
    pub ignored_output_patterns: Vec<String>,

    /// The program-listing command, split into arguments.
    pub program_list_command: Vec<String>,

    /// Extra environment for the program-listing command.
    pub program_list_env: BTreeMap<String, String>,

    /// Extracts a program path from a line of the program-listing output.
    pub program_line_pattern: Regex,

    /// The flag that makes a test program list its cases.
    pub list_tests_flag: String,

    /// Managed-runtime source roots, relative to the source root.
    pub managed_source_roots: Vec<Utf8PathBuf>,
}

impl DiscoveryConfig {
    /// Returns true if `program` is registered as a one-shot test.
    ///
    /// `program` matches an entry if it is equal to it, or ends with `/<entry>`.
    pub fn is_one_shot(&self, program: &Utf8Path) -> bool {
        let program = program.as_str();
        self.one_shot_tests.iter().any(|entry| {
            program == entry
                || program
                    .strip_suffix(entry.as_str())
                    .is_some_and(|prefix| prefix.ends_with('/'))
        })
    }
}

/// Configuration for the dispatcher and its substrates.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DispatchConfig {
    /// The number of attempts a partition gets before its jobs are reported as failed.
    pub max_task_failures: NonZeroUsize,

    /// Environment variables forwarded to every test by name.
    pub propagated_env_vars: Vec<String>,

    /// Environment variables with this prefix are forwarded to every test.
    pub propagated_env_prefix: String,

    /// The number of partitions the local substrate runs at once.
    pub test_threads: TestThreads,
}

/// Configuration for running a single test.
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    /// The single-test entry point, relative to the source root.
    pub run_test_script: Utf8PathBuf,

    /// The capture directory, relative to the build root.
    pub log_dir: Utf8PathBuf,

    /// The variable set to the attempt index.
    pub attempt_env_var: String,

    /// The variable set to the build type.
    pub build_type_env_var: String,

    /// The clock-sync check, or `None` if disabled.
    pub clock_sync_command: Option<Vec<String>>,

    /// The number of times the clock-sync check is attempted.
    pub clock_sync_max_attempts: u32,

    /// The delay between clock-sync attempts.
    pub clock_sync_retry_delay: Duration,
}

/// Configuration for the stats recorder.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatsConfig {
    /// The variable naming the CI job.
    pub job_name_env_var: String,

    /// The variable naming the CI build.
    pub build_id_env_var: String,
}

/// Configuration for the run driver.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriverConfig {
    /// How long to stay alive after the run with `--sleep-after-tests`.
    #[serde(with = "humantime_serde")]
    pub sleep_after_tests: Duration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FleetConfigDeserialize {
    discovery: DiscoveryConfigDeserialize,
    dispatch: DispatchConfig,
    execution: ExecutionConfigDeserialize,
    stats: StatsConfig,
    driver: DriverConfig,
}

impl FleetConfigDeserialize {
    fn compile(&self) -> Result<(DiscoveryConfig, ExecutionConfig), ConfigParseErrorKind> {
        Ok((self.discovery.compile()?, self.execution.compile()?))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DiscoveryConfigDeserialize {
    one_shot_tests: Vec<String>,
    ignored_output_patterns: Vec<String>,
    program_list_command: String,
    #[serde(default)]
    program_list_env: BTreeMap<String, String>,
    program_line_pattern: String,
    list_tests_flag: String,
    managed_source_roots: Vec<Utf8PathBuf>,
}

impl DiscoveryConfigDeserialize {
    fn compile(&self) -> Result<DiscoveryConfig, ConfigParseErrorKind> {
        let program_list_command =
            split_command("discovery.program-list-command", &self.program_list_command)?
                .ok_or(ConfigParseErrorKind::EmptyCommand {
                    key: "discovery.program-list-command",
                })?;
        let program_line_pattern = Regex::new(&self.program_line_pattern).map_err(|error| {
            ConfigParseErrorKind::InvalidRegex {
                key: "discovery.program-line-pattern",
                error,
            }
        })?;

        Ok(DiscoveryConfig {
            one_shot_tests: self.one_shot_tests.clone(),
            ignored_output_patterns: self.ignored_output_patterns.clone(),
            program_list_command,
            program_list_env: self.program_list_env.clone(),
            program_line_pattern,
            list_tests_flag: self.list_tests_flag.clone(),
            managed_source_roots: self.managed_source_roots.clone(),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ExecutionConfigDeserialize {
    run_test_script: Utf8PathBuf,
    log_dir: Utf8PathBuf,
    attempt_env_var: String,
    build_type_env_var: String,
    clock_sync_command: String,
    clock_sync_max_attempts: u32,
    #[serde(with = "humantime_serde")]
    clock_sync_retry_delay: Duration,
}

impl ExecutionConfigDeserialize {
    fn compile(&self) -> Result<ExecutionConfig, ConfigParseErrorKind> {
        Ok(ExecutionConfig {
            run_test_script: self.run_test_script.clone(),
            log_dir: self.log_dir.clone(),
            attempt_env_var: self.attempt_env_var.clone(),
            build_type_env_var: self.build_type_env_var.clone(),
            clock_sync_command: split_command(
                "execution.clock-sync-command",
                &self.clock_sync_command,
            )?,
            clock_sync_max_attempts: self.clock_sync_max_attempts,
            clock_sync_retry_delay: self.clock_sync_retry_delay,
        })
    }
}

fn split_command(
    key: &'static str,
    command: &str,
) -> Result<Option<Vec<String>>, ConfigParseErrorKind> {
    let args = shell_words::split(command).map_err(|error| {
        ConfigParseErrorKind::InvalidCommand {
            key,
            command: command.to_owned(),
            error,
        }
    })?;
    Ok((!args.is_empty()).then_some(args))
}
