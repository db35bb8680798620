// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution adapter: runs a single test through the single-test entry point.
//!
//! Every test runs as `<run_test_script> <path> [case_name]` in the build root. Its combined
//! stdout and stderr are tee'd to the worker's stderr and to a per-test capture file, which is
//! deleted again if the test printed nothing.

mod clock;

pub use clock::*;

use crate::{
    dispatch::{JobKind, RemoteJob, WorkerEnvironment},
    descriptor::TestDescriptor,
    errors::WorkerError,
    time::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use duct::cmd;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    process::ExitStatus,
    time::Duration,
};
use testfleet_metadata::{FleetExitCode, TestLanguage, TestStats};
use tracing::{debug, info};

/// The exit code recorded when the single-test entry point cannot be found.
pub const ENTRY_POINT_NOT_FOUND_EXIT_CODE: i32 = 127;

/// The outcome of running a single test.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TestResult {
    /// The test that was run.
    pub descriptor: TestDescriptor,

    /// The normalized exit code. Zero means success.
    pub exit_code: i32,

    /// Wall-clock time taken by the test.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    /// The capture file, if the test produced any output.
    pub error_output_path: Option<Utf8PathBuf>,
}

impl TestResult {
    /// Returns a failing result for a test that could not be run due to infrastructure failures.
    pub fn infra_failure(descriptor: TestDescriptor) -> Self {
        Self {
            descriptor,
            exit_code: FleetExitCode::INFRA_FAILURE_TEST_EXIT_CODE,
            elapsed: Duration::ZERO,
            error_output_path: None,
        }
    }

    /// Returns true if the test passed.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the language of the test.
    pub fn language(&self) -> TestLanguage {
        self.descriptor.language()
    }

    /// Converts this result into its stats file representation.
    pub fn to_stats(&self) -> TestStats {
        TestStats {
            elapsed_time_sec: self.elapsed.as_secs_f64(),
            error_output_path: self.error_output_path.clone(),
            exit_code: self.exit_code,
            language: self.language(),
        }
    }
}

/// Runs a single test.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RunTestJob {
    descriptor: TestDescriptor,
}

impl RunTestJob {
    /// Creates a new job for the given test.
    pub fn new(descriptor: TestDescriptor) -> Self {
        Self { descriptor }
    }

    /// Returns the test this job runs.
    pub fn descriptor(&self) -> &TestDescriptor {
        &self.descriptor
    }

    /// Consumes the job, returning its test.
    pub fn into_descriptor(self) -> TestDescriptor {
        self.descriptor
    }
}

impl RemoteJob for RunTestJob {
    type Output = TestResult;
    const KIND: JobKind = JobKind::RunTest;

    fn run(&self, env: &WorkerEnvironment) -> Result<TestResult, WorkerError> {
        run_test(&self.descriptor, env)
    }
}

/// Runs a single test, capturing its output.
///
/// Test failures are reported through [`TestResult::exit_code`]. An `Err` is only returned for
/// infrastructure problems, such as the capture directory not being writable.
pub fn run_test(
    descriptor: &TestDescriptor,
    env: &WorkerEnvironment,
) -> Result<TestResult, WorkerError> {
    let run_config = env.run_config();
    let error_output_path = descriptor.error_output_path(run_config.test_log_dir());
    if let Some(parent) = error_output_path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            WorkerError::io(format!("error creating capture directory `{parent}`"), error)
        })?;
    }

    wait_for_clock_sync(run_config, env.env());

    let start = stopwatch();
    let exit_code = run_and_capture(descriptor, env, &error_output_path)?;
    let elapsed = start.snapshot().duration;

    info!(
        "test {descriptor} ran on {}, rc={exit_code}",
        hostname().as_deref().unwrap_or("unknown host")
    );

    let error_output_path = retain_if_non_empty(error_output_path)?;
    Ok(TestResult {
        descriptor: descriptor.clone(),
        exit_code,
        elapsed,
        error_output_path,
    })
}

fn run_and_capture(
    descriptor: &TestDescriptor,
    env: &WorkerEnvironment,
    error_output_path: &Utf8Path,
) -> Result<i32, WorkerError> {
    let run_config = env.run_config();
    let capture = File::create(error_output_path).map_err(|error| {
        WorkerError::io(
            format!("error creating capture file `{error_output_path}`"),
            error,
        )
    })?;
    let mut capture = BufWriter::new(capture);

    let expression = env
        .env()
        .apply(cmd(
            run_config.run_test_script().as_std_path(),
            descriptor.args_for_run_test(),
        ))
        .dir(run_config.build_root())
        .env(
            run_config.attempt_index_env_var(),
            descriptor.attempt_index().to_string(),
        )
        .env(run_config.build_type_env_var(), run_config.build_type())
        .stdin_null()
        .stderr_to_stdout()
        .unchecked();
    debug!(
        "running `{} {}` in `{}`",
        run_config.run_test_script(),
        shell_words::join(descriptor.args_for_run_test()),
        run_config.build_root()
    );

    let mut reader = match expression.reader() {
        Ok(reader) => reader,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            // A missing entry point won't appear on retry, so this is a test failure.
            writeln!(
                capture,
                "testfleet: could not run `{}`: {error}",
                run_config.run_test_script()
            )
            .and_then(|()| capture.flush())
            .map_err(|error| WorkerError::io("error writing capture file", error))?;
            return Ok(ENTRY_POINT_NOT_FOUND_EXIT_CODE);
        }
        Err(error) => {
            return Err(WorkerError::io(
                format!("error spawning `{}`", run_config.run_test_script()),
                error,
            ));
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|error| WorkerError::io("error reading test output", error))?;
        if n == 0 {
            break;
        }
        // Output to the worker's stderr is best-effort.
        let _ = io::stderr().lock().write_all(&buf[..n]);
        capture
            .write_all(&buf[..n])
            .map_err(|error| WorkerError::io("error writing capture file", error))?;
    }
    capture
        .flush()
        .map_err(|error| WorkerError::io("error writing capture file", error))?;

    let status = reader
        .try_wait()
        .map_err(|error| WorkerError::io("error waiting for test process", error))?
        .map(|output| output.status);
    match status {
        Some(status) => Ok(normalize_exit_status(status)),
        None => Err(WorkerError::io(
            "test process output closed before it exited",
            io::Error::from(io::ErrorKind::UnexpectedEof),
        )),
    }
}

fn retain_if_non_empty(path: Utf8PathBuf) -> Result<Option<Utf8PathBuf>, WorkerError> {
    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(WorkerError::io(
                format!("error reading capture file `{path}`"),
                error,
            ));
        }
    };
    if metadata.len() > 0 {
        return Ok(Some(path));
    }
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(None),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(WorkerError::io(
            format!("error removing empty capture file `{path}`"),
            error,
        )),
    }
}

/// Converts an exit status into an integer exit code.
///
/// On Unix, a process killed by signal `n` gets exit code `128 + n`, matching shell conventions.
pub fn normalize_exit_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    signal_exit_code(status).unwrap_or(1)
}

#[cfg(unix)]
fn signal_exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| 128 + signal)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}
