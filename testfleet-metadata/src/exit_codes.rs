// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `testfleet` failures.
///
/// `testfleet` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum FleetExitCode {}

impl FleetExitCode {
    /// No errors occurred and every test that ran passed.
    ///
    /// This is also returned if no tests were selected to run.
    pub const OK: i32 = 0;

    /// One or more tests failed.
    ///
    /// There are no partial-success exit codes: a single failing test out of thousands produces
    /// this code.
    pub const TEST_RUN_FAILED: i32 = 1;

    /// A worker process could not complete the work it was handed.
    ///
    /// This is only produced by the hidden `__worker` subcommand and is interpreted by the
    /// controller as an infrastructure failure, which is retried.
    pub const WORKER_FAILED: i32 = 70;

    /// A user issue happened while setting up a testfleet invocation: a missing or invalid flag,
    /// a path that does not exist or is not writable, or an invalid configuration file.
    pub const SETUP_ERROR: i32 = 96;

    /// Discovering the set of tests to run failed.
    pub const TEST_DISCOVERY_FAILED: i32 = 104;

    /// Writing data to stdout, stderr, or an output file produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// The exit code recorded for a test whose work item exhausted the infrastructure retry
    /// budget without ever producing a result.
    ///
    /// This is a per-test exit code stored in results and stats files, not a process exit code.
    pub const INFRA_FAILURE_TEST_EXIT_CODE: i32 = -1;
}
