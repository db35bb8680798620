// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{DiscoveryConfig, RunConfig},
    descriptor::TestDescriptor,
    env::PropagatedEnv,
    errors::DiscoveryError,
};
use camino::{Utf8Path, Utf8PathBuf};
use duct::cmd;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Native test programs, split into those run as a whole and those expanded into cases.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NativePrograms {
    /// Programs run as a single unit.
    pub one_shot: Vec<Utf8PathBuf>,

    /// Programs expanded into their individual test cases.
    pub regular: Vec<Utf8PathBuf>,
}

impl NativePrograms {
    /// Splits `programs` according to the one-shot registry in `discovery`.
    pub fn partition(programs: Vec<Utf8PathBuf>, discovery: &DiscoveryConfig) -> Self {
        let (one_shot, regular) = programs
            .into_iter()
            .partition(|program| discovery.is_one_shot(program));
        Self { one_shot, regular }
    }

    /// Keeps regular programs whose path matches `regex` anywhere. One-shot programs are kept
    /// regardless.
    pub fn filter_regular(&mut self, regex: &Regex) {
        let before = self.regular.len();
        self.regular.retain(|program| regex.is_match(program.as_str()));
        debug!(
            "program regex `{regex}` kept {} of {before} test programs",
            self.regular.len()
        );
    }

    /// Returns one descriptor per one-shot program.
    pub fn one_shot_descriptors(&self) -> Vec<TestDescriptor> {
        self.one_shot
            .iter()
            .filter_map(|program| match TestDescriptor::new(program.clone(), None) {
                Ok(descriptor) => Some(descriptor),
                Err(error) => {
                    warn!("skipping one-shot test program: {error}");
                    None
                }
            })
            .collect()
    }
}

/// Lists native test programs by running the configured program-listing command in the build
/// root.
///
/// Returns deduplicated program paths relative to the build root, in the order they were first
/// listed.
pub fn list_test_programs(
    run_config: &RunConfig,
    discovery: &DiscoveryConfig,
    env: &PropagatedEnv,
) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    let command = &discovery.program_list_command;
    let Some((program, args)) = command.split_first() else {
        return Err(DiscoveryError::ProgramListExec {
            command: command.clone(),
            error: std::io::Error::new(std::io::ErrorKind::InvalidInput, "command is empty"),
        });
    };

    let mut expression = env
        .apply(cmd(program.as_str(), args))
        .dir(run_config.build_root())
        .stdin_null()
        .stdout_capture()
        .unchecked();
    for (name, value) in &discovery.program_list_env {
        expression = expression.env(name, value);
    }
    debug!(
        "listing test programs with `{}` in `{}`",
        shell_words::join(command),
        run_config.build_root()
    );

    let output = expression
        .run()
        .map_err(|error| DiscoveryError::ProgramListExec {
            command: command.clone(),
            error,
        })?;
    if !output.status.success() {
        return Err(DiscoveryError::ProgramListFailed {
            command: command.clone(),
            exit_code: output.status.code(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let programs = parse_program_list(
        &stdout,
        &discovery.program_line_pattern,
        run_config.build_root(),
    );
    if programs.is_empty() {
        return Err(DiscoveryError::NoTestPrograms {
            build_root: run_config.build_root().to_owned(),
        });
    }
    Ok(programs)
}

/// Extracts program paths from the output of the program-listing command.
///
/// The first capture group of `pattern` is the program path. Absolute paths are made relative
/// to `build_root`.
pub fn parse_program_list(
    output: &str,
    pattern: &Regex,
    build_root: &Utf8Path,
) -> Vec<Utf8PathBuf> {
    let mut seen = BTreeSet::new();
    let mut programs = Vec::new();
    for line in output.lines() {
        let Some(path) = pattern
            .captures(line)
            .and_then(|captures| captures.get(1))
            .map(|m| Utf8Path::new(m.as_str()))
        else {
            continue;
        };
        let relative = if path.is_absolute() {
            match pathdiff::diff_utf8_paths(path, build_root) {
                Some(relative) => relative,
                None => {
                    warn!("cannot make test program `{path}` relative to `{build_root}`, skipping");
                    continue;
                }
            }
        } else {
            path.to_owned()
        };
        if seen.insert(relative.clone()) {
            programs.push(relative);
        }
    }
    programs
}
