// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    RemoteJob, Substrate, WORKER_SUBCOMMAND_NAME, WorkerContext, deserialize_response,
    flatten_partition_outputs, partition_ranges, run_with_retries, serialize_request,
};
use crate::errors::{InfraFailure, SubstrateBuildError, WorkerError};
use camino::{Utf8Path, Utf8PathBuf};
use duct::cmd;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::num::NonZeroUsize;
use tracing::debug;

/// Runs every partition attempt in a freshly spawned worker process.
///
/// The worker is `<exe> __worker`, which reads the partition from stdin and writes its outputs
/// to stdout. Worker stderr is inherited so that test output stays visible.
#[derive(Debug)]
pub struct ProcessSubstrate {
    exe: Utf8PathBuf,
    pool: ThreadPool,
    max_task_failures: NonZeroUsize,
}

impl ProcessSubstrate {
    /// Creates a substrate that spawns workers from the currently running executable.
    pub fn current_exe(
        test_threads: usize,
        max_task_failures: NonZeroUsize,
    ) -> Result<Self, SubstrateBuildError> {
        let exe = std::env::current_exe().map_err(SubstrateBuildError::CurrentExe)?;
        let exe = Utf8PathBuf::try_from(exe)
            .map_err(|error| SubstrateBuildError::NonUtf8CurrentExe {
                path: error.into_path_buf(),
            })?;
        Self::new(exe, test_threads, max_task_failures)
    }

    /// Creates a substrate that spawns workers from `exe`.
    pub fn new(
        exe: impl Into<Utf8PathBuf>,
        test_threads: usize,
        max_task_failures: NonZeroUsize,
    ) -> Result<Self, SubstrateBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(test_threads.max(1))
            .thread_name(|idx| format!("testfleet-spawn-{idx}"))
            .build()
            .map_err(SubstrateBuildError::ThreadPool)?;
        Ok(Self {
            exe: exe.into(),
            pool,
            max_task_failures,
        })
    }

    /// Returns the executable workers are spawned from.
    pub fn exe(&self) -> &Utf8Path {
        &self.exe
    }

    fn run_worker_process<J: RemoteJob>(
        &self,
        request: &[u8],
        num_jobs: usize,
    ) -> Result<Vec<J::Output>, WorkerError> {
        let output = cmd(self.exe.as_std_path(), [WORKER_SUBCOMMAND_NAME])
            .stdin_bytes(request)
            .stdout_capture()
            .unchecked()
            .run()
            .map_err(|error| WorkerError::Spawn {
                command: vec![self.exe.to_string(), WORKER_SUBCOMMAND_NAME.to_owned()],
                error,
            })?;
        if !output.status.success() {
            return Err(WorkerError::WorkerExited {
                exit_code: output.status.code(),
            });
        }
        deserialize_response::<J>(&output.stdout, num_jobs)
    }
}

impl Substrate for ProcessSubstrate {
    fn submit<J: RemoteJob>(
        &self,
        context: &WorkerContext,
        jobs: &[J],
        num_partitions: usize,
    ) -> Vec<Result<J::Output, InfraFailure>> {
        let ranges = partition_ranges(jobs.len(), num_partitions);
        debug!(
            "running {} {} jobs in {} worker processes, {} at a time",
            jobs.len(),
            J::KIND,
            ranges.len(),
            self.pool.current_num_threads(),
        );

        let (sender, receiver) = crossbeam_channel::unbounded();
        let max_task_failures = self.max_task_failures;

        self.pool.scope(|scope| {
            for (index, range) in ranges.iter().enumerate() {
                let sender = sender.clone();
                let partition = &jobs[range.clone()];
                scope.spawn(move |_| {
                    // The request is serialized once and resent on every attempt.
                    let output = match serialize_request(context, partition) {
                        Ok(request) => {
                            run_with_retries(J::KIND, index, max_task_failures, || {
                                self.run_worker_process::<J>(&request, partition.len())
                            })
                        }
                        Err(error) => Err(InfraFailure::new(0, &error)),
                    };
                    let _ = sender.send((index, output));
                });
            }
        });
        drop(sender);

        let mut outputs: Vec<Option<Result<Vec<J::Output>, InfraFailure>>> =
            ranges.iter().map(|_| None).collect();
        for (index, output) in receiver {
            outputs[index] = Some(output);
        }
        let outputs = outputs
            .into_iter()
            .map(|output| {
                output.unwrap_or_else(|| {
                    Err(InfraFailure::with_message(
                        0,
                        "partition did not report an output",
                    ))
                })
            })
            .collect();

        flatten_partition_outputs(&ranges, outputs)
    }
}
