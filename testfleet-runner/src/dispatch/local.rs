// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    RemoteJob, Substrate, WorkerContext, flatten_partition_outputs, partition_ranges,
    run_partition, run_with_retries,
};
use crate::errors::{InfraFailure, SubstrateBuildError};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::num::NonZeroUsize;
use tracing::debug;

/// Runs partitions on a bounded thread pool inside the controller process.
///
/// The serialized [`WorkerContext`] is still reconstructed by every partition attempt, so jobs
/// behave the same way they would in a separate worker process.
#[derive(Debug)]
pub struct LocalSubstrate {
    pool: ThreadPool,
    max_task_failures: NonZeroUsize,
}

impl LocalSubstrate {
    /// Creates a new local substrate running up to `test_threads` partitions at once.
    pub fn new(
        test_threads: usize,
        max_task_failures: NonZeroUsize,
    ) -> Result<Self, SubstrateBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(test_threads.max(1))
            .thread_name(|idx| format!("testfleet-local-{idx}"))
            .build()
            .map_err(SubstrateBuildError::ThreadPool)?;
        Ok(Self {
            pool,
            max_task_failures,
        })
    }
}

impl Substrate for LocalSubstrate {
    fn submit<J: RemoteJob>(
        &self,
        context: &WorkerContext,
        jobs: &[J],
        num_partitions: usize,
    ) -> Vec<Result<J::Output, InfraFailure>> {
        let ranges = partition_ranges(jobs.len(), num_partitions);
        debug!(
            "running {} {} jobs in {} local partitions on {} threads",
            jobs.len(),
            J::KIND,
            ranges.len(),
            self.pool.current_num_threads(),
        );

        let (sender, receiver) = crossbeam_channel::unbounded();
        let max_task_failures = self.max_task_failures;

        // Every partition sends exactly one message. Once the scope is done all senders have
        // been dropped, so the receiver below completes iteration.
        self.pool.scope(|scope| {
            for (index, range) in ranges.iter().enumerate() {
                let sender = sender.clone();
                let partition = &jobs[range.clone()];
                scope.spawn(move |_| {
                    let output = run_with_retries(J::KIND, index, max_task_failures, || {
                        run_partition(context, partition)
                    });
                    // Failure to send means the receiver was dropped.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BuildRoots, FleetConfig, RunConfig},
        dispatch::{JobKind, WorkerEnvironment},
        env::PropagatedEnv,
        errors::WorkerError,
    };
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    static FLAKY_CALLS: AtomicUsize = AtomicUsize::new(0);

    /// Doubles its input. If `flaky` is set, the first two calls in this process fail. Negative
    /// values always fail.
    #[derive(Debug, Deserialize, Serialize)]
    struct DoubleJob {
        value: i64,
        flaky: bool,
    }

    impl RemoteJob for DoubleJob {
        type Output = i64;
        const KIND: JobKind = JobKind::RunTest;

        fn run(&self, env: &WorkerEnvironment) -> Result<i64, WorkerError> {
            assert_eq!(env.env().get("TESTFLEET_MARKER"), Some("present"));
            if self.value < 0 {
                return Err(WorkerError::WorkerExited { exit_code: Some(1) });
            }
            if self.flaky && FLAKY_CALLS.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(WorkerError::WorkerExited { exit_code: None });
            }
            Ok(self.value * 2)
        }
    }

    fn context() -> (camino_tempfile::Utf8TempDir, WorkerContext) {
        let dir = tempdir().expect("tempdir created");
        let build_root = dir.path().join("build/debug-gcc");
        std::fs::create_dir_all(&build_root).unwrap();
        let roots = BuildRoots::resolve(&build_root, None).unwrap();
        let run_config = RunConfig::new(&roots, None, FleetConfig::default_config().execution());
        let env = PropagatedEnv::from_map(BTreeMap::from([(
            "TESTFLEET_MARKER".to_owned(),
            "present".to_owned(),
        )]));
        let context = WorkerContext::new(&run_config, &env);
        (dir, context)
    }

    #[test]
    fn outputs_in_input_order() {
        let (_dir, context) = context();
        let substrate = LocalSubstrate::new(4, NonZeroUsize::new(3).unwrap()).unwrap();
        let jobs: Vec<_> = (0..10)
            .map(|value| DoubleJob {
                value,
                flaky: false,
            })
            .collect();
        let outputs: Vec<_> = substrate
            .submit(&context, &jobs, 3)
            .into_iter()
            .map(|output| output.expect("job succeeds"))
            .collect();
        assert_eq!(outputs, (0..10).map(|v| v * 2).collect::<Vec<_>>());
    }

    #[test]
    fn flaky_partition_is_retried() {
        let (_dir, context) = context();
        let substrate = LocalSubstrate::new(1, NonZeroUsize::new(5).unwrap()).unwrap();
        let jobs = vec![DoubleJob {
            value: 21,
            flaky: true,
        }];
        let outputs = substrate.submit(&context, &jobs, 1);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].as_ref().ok(), Some(&42));
    }

    #[test]
    fn exhausted_partition_fails_every_job() {
        let (_dir, context) = context();
        let substrate = LocalSubstrate::new(2, NonZeroUsize::new(3).unwrap()).unwrap();
        let jobs = vec![
            DoubleJob {
                value: 1,
                flaky: false,
            },
            DoubleJob {
                value: -1,
                flaky: false,
            },
            DoubleJob {
                value: 3,
                flaky: false,
            },
        ];
        // Partitions are [0, 1] and [2]: the first one fails as a whole.
        let outputs = substrate.submit(&context, &jobs, 2);
        assert_eq!(outputs.len(), 3);
        for output in &outputs[..2] {
            let failure = output.as_ref().expect_err("partition exhausted");
            assert_eq!(failure.attempts(), 3);
        }
        assert_eq!(outputs[2].as_ref().ok(), Some(&6));
    }

    #[test]
    fn invalid_context_is_an_infra_failure() {
        let substrate = LocalSubstrate::new(1, NonZeroUsize::new(2).unwrap()).unwrap();
        let context = WorkerContext {
            run_config: BTreeMap::new(),
            env: PropagatedEnv::default(),
        };
        let jobs = vec![DoubleJob {
            value: 1,
            flaky: false,
        }];
        let outputs = substrate.submit(&context, &jobs, 1);
        let failure = outputs[0].as_ref().expect_err("context cannot be reconstructed");
        assert!(
            failure.message().contains("missing required key"),
            "message: {}",
            failure.message()
        );
    }
}
