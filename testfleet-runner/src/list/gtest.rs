// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::DiscoveryConfig,
    descriptor::TestDescriptor,
    dispatch::{JobKind, RemoteJob, WorkerEnvironment},
    errors::WorkerError,
};
use camino::{Utf8Path, Utf8PathBuf};
use duct::cmd;
use serde::{Deserialize, Serialize};
use std::io;
use tracing::{debug, warn};

/// Lists the test cases of a single gtest-style test program.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ListTestsJob {
    program: Utf8PathBuf,
    list_flag: String,
    ignored_output_patterns: Vec<String>,
}

impl ListTestsJob {
    /// Creates a new job for `program`, a path relative to the build root.
    pub fn new(program: Utf8PathBuf, discovery: &DiscoveryConfig) -> Self {
        Self {
            program,
            list_flag: discovery.list_tests_flag.clone(),
            ignored_output_patterns: discovery.ignored_output_patterns.clone(),
        }
    }

    /// Returns the program whose cases this job lists.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }
}

impl RemoteJob for ListTestsJob {
    type Output = Vec<TestDescriptor>;
    const KIND: JobKind = JobKind::ListTests;

    fn run(&self, env: &WorkerEnvironment) -> Result<Vec<TestDescriptor>, WorkerError> {
        let build_root = env.run_config().build_root();
        let program_path = build_root.join(&self.program);
        let expression = env
            .env()
            .apply(cmd(program_path.as_std_path(), [self.list_flag.as_str()]))
            .dir(build_root)
            .stdin_null()
            .stdout_capture()
            .unchecked();

        let output = match expression.run() {
            Ok(output) => output,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                warn!("test program `{program_path}` not found, skipping it: {error}");
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(WorkerError::io(
                    format!("error running `{program_path} {}`", self.list_flag),
                    error,
                ));
            }
        };
        if !output.status.success() {
            warn!(
                "listing test cases of `{program_path}` failed with {}, skipping it",
                output.status
            );
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let descriptors = parse_gtest_list(&self.program, &stdout, &self.ignored_output_patterns);
        debug!("found {} test cases in `{}`", descriptors.len(), self.program);
        Ok(descriptors)
    }
}

/// Parses the output of `--gtest_list_tests` into one descriptor per test case.
///
/// The output looks like:
///
/// ```text
/// TestSplitArgs.
///   Simple
///   Empty
/// BloomStatsTestWithParam/BloomStatsTestWithParam.
///   BloomStatsTest/0  # GetParam() = (true, true)
/// ```
///
/// Lines containing any of `ignored_patterns` are skipped.
pub fn parse_gtest_list(
    program: &Utf8Path,
    output: &str,
    ignored_patterns: &[String],
) -> Vec<TestDescriptor> {
    let mut descriptors = Vec::new();
    let mut current_group: Option<String> = None;

    for line in output.lines() {
        if ignored_patterns
            .iter()
            .any(|pattern| line.contains(pattern.as_str()))
        {
            continue;
        }
        let trimmed = strip_comment(line);
        if trimmed.is_empty() {
            continue;
        }

        if !line.starts_with("  ") {
            current_group = Some(trimmed.to_owned());
            continue;
        }

        let Some(group) = &current_group else {
            warn!("in test listing of `{program}`, ignoring test case `{trimmed}` outside a group");
            continue;
        };
        match TestDescriptor::new(program, Some(format!("{group}{trimmed}"))) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(error) => {
                warn!("in test listing of `{program}`, skipping test case: {error}");
            }
        }
    }

    descriptors
}

fn strip_comment(line: &str) -> &str {
    match line.split_once('#') {
        Some((before, _)) => before.trim(),
        None => line.trim(),
    }
}
