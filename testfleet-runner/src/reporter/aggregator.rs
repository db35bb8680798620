// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    descriptor::TestDescriptor,
    errors::WriteTestListError,
    helpers::{display_exit_codes, plural},
    list::write_test_list,
    runner::TestResult,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};
use testfleet_metadata::{FleetExitCode, TestLanguage};
use tracing::{error, info};

/// A test that failed, as recorded in a [`RunSummary`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailedTest {
    /// The test.
    pub descriptor: TestDescriptor,

    /// Its non-zero exit code.
    pub exit_code: i32,

    /// Its retained output capture, if any.
    pub error_output_path: Option<Utf8PathBuf>,
}

/// The verdict of a run, computed from every collected [`TestResult`].
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    exit_codes: BTreeSet<i32>,
    failures_by_language: BTreeMap<TestLanguage, usize>,
    failed: Vec<FailedTest>,
    total: usize,
}

impl RunSummary {
    /// Aggregates `results`. Failed tests are kept in result order.
    pub fn new(results: &[TestResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            summary.exit_codes.insert(result.exit_code);
            if result.is_success() {
                continue;
            }
            *summary
                .failures_by_language
                .entry(result.language())
                .or_default() += 1;
            summary.failed.push(FailedTest {
                descriptor: result.descriptor.clone(),
                exit_code: result.exit_code,
                error_output_path: result.error_output_path.clone(),
            });
        }
        summary
    }

    /// Returns the distinct exit codes seen.
    pub fn exit_codes(&self) -> &BTreeSet<i32> {
        &self.exit_codes
    }

    /// Returns the exit code of the whole run: 0 if every test exited with exactly 0, 1
    /// otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() {
            FleetExitCode::OK
        } else {
            FleetExitCode::TEST_RUN_FAILED
        }
    }

    /// Returns the number of failed tests for each language with at least one failure.
    pub fn failures_by_language(&self) -> &BTreeMap<TestLanguage, usize> {
        &self.failures_by_language
    }

    /// Returns the failed tests, in result order.
    pub fn failed(&self) -> &[FailedTest] {
        &self.failed
    }

    /// Returns the failed descriptors, in result order.
    pub fn failed_descriptors(&self) -> impl Iterator<Item = &TestDescriptor> + '_ {
        self.failed.iter().map(|failed| &failed.descriptor)
    }

    /// Returns the total number of results.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Logs the summary of the run.
    pub fn log(&self) {
        info!(
            "ran {} {}, exit codes: {}",
            self.total,
            plural::tests_str(self.total),
            display_exit_codes(&self.exit_codes)
        );
        for failed in &self.failed {
            match &failed.error_output_path {
                Some(path) => error!(
                    "test {} failed with exit code {}, output in `{path}`",
                    failed.descriptor, failed.exit_code
                ),
                None => error!(
                    "test {} failed with exit code {}",
                    failed.descriptor, failed.exit_code
                ),
            }
        }
        for (language, count) in &self.failures_by_language {
            error!(
                "{count} {language} {} failed",
                plural::tests_str(*count)
            );
        }
        if self.failed.is_empty() {
            info!("all tests passed");
        }
    }

    /// Atomically writes the failed descriptors to `path`, one per line.
    pub fn write_failed_test_list(&self, path: &Utf8Path) -> Result<(), WriteTestListError> {
        write_test_list(path, self.failed_descriptors())?;
        info!(
            "wrote {} failed {} to `{path}`",
            self.failed.len(),
            plural::tests_str(self.failed.len())
        );
        Ok(())
    }
}
