// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker side of [`ProcessSubstrate`](super::ProcessSubstrate).
//!
//! A worker reads one JSON [`WorkerRequest`] from stdin, runs the partition it describes, and
//! writes the JSON array of outputs to stdout. Anything the jobs print goes to stderr, which the
//! controller inherits.

use super::{JobKind, RemoteJob, WorkerContext, run_partition};
use crate::{errors::WorkerError, list::ListTestsJob, runner::RunTestJob};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// The name of the hidden worker subcommand.
pub const WORKER_SUBCOMMAND_NAME: &str = "__worker";

/// A partition of work sent to a worker process.
#[derive(Debug, Deserialize)]
pub struct WorkerRequest {
    /// The kind of the jobs.
    pub kind: JobKind,

    /// The serialized worker environment.
    pub context: WorkerContext,

    /// The jobs, deserialized once `kind` is known.
    pub jobs: serde_json::Value,
}

#[derive(Serialize)]
struct WorkerRequestRef<'a, J> {
    kind: JobKind,
    context: &'a WorkerContext,
    jobs: &'a [J],
}

/// Serializes a worker request for the given partition.
pub fn serialize_request<J: RemoteJob>(
    context: &WorkerContext,
    jobs: &[J],
) -> Result<Vec<u8>, WorkerError> {
    let request = WorkerRequestRef {
        kind: J::KIND,
        context,
        jobs,
    };
    serde_json::to_vec(&request).map_err(|error| WorkerError::Protocol {
        kind: J::KIND,
        error,
    })
}

/// Deserializes the outputs written by a worker.
pub fn deserialize_response<J: RemoteJob>(
    stdout: &[u8],
    expected: usize,
) -> Result<Vec<J::Output>, WorkerError> {
    let outputs: Vec<J::Output> =
        serde_json::from_slice(stdout).map_err(|error| WorkerError::Protocol {
            kind: J::KIND,
            error,
        })?;
    if outputs.len() != expected {
        return Err(WorkerError::OutputCountMismatch {
            expected,
            actual: outputs.len(),
        });
    }
    Ok(outputs)
}

/// Runs a worker: reads a request from `input` and writes the outputs to `output`.
pub fn run_worker(input: impl Read, mut output: impl Write) -> Result<(), WorkerError> {
    let request: WorkerRequest =
        serde_json::from_reader(input).map_err(WorkerError::InvalidRequest)?;
    debug!("worker received a partition of {} jobs", request.kind);

    match request.kind {
        JobKind::ListTests => run_jobs::<ListTestsJob>(request, &mut output),
        JobKind::RunTest => run_jobs::<RunTestJob>(request, &mut output),
    }
}

fn run_jobs<J: RemoteJob>(request: WorkerRequest, output: &mut impl Write) -> Result<(), WorkerError> {
    let protocol_error = |error| WorkerError::Protocol {
        kind: J::KIND,
        error,
    };

    let jobs: Vec<J> = serde_json::from_value(request.jobs).map_err(protocol_error)?;
    let outputs = run_partition(&request.context, &jobs)?;
    serde_json::to_writer(&mut *output, &outputs).map_err(protocol_error)?;
    output
        .flush()
        .map_err(|error| WorkerError::io("error flushing worker output", error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RunConfig, env::PropagatedEnv};
    use std::collections::BTreeMap;

    #[test]
    fn garbage_request_is_rejected() {
        let error = run_worker(&b"not json"[..], Vec::new()).expect_err("request is invalid");
        assert!(matches!(error, WorkerError::InvalidRequest(_)));
    }

    #[test]
    fn response_count_is_checked() {
        let error = deserialize_response::<RunTestJob>(b"[]", 1).expect_err("count mismatch");
        assert!(matches!(
            error,
            WorkerError::OutputCountMismatch {
                expected: 1,
                actual: 0
            }
        ));
    }

    #[test]
    fn empty_partition_round_trip() {
        let map: BTreeMap<String, String> = [
            ("build_root", "/build"),
            ("build_type", "debug"),
            ("src_root", "/src"),
            ("run_test_script", "/src/run-test.sh"),
            ("test_log_dir", "/build/test-logs"),
            ("attempt_index_env_var", "ATTEMPT"),
            ("build_type_env_var", "build_type"),
            ("clock_sync_max_attempts", "1"),
            ("clock_sync_retry_delay", "1s"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        RunConfig::from_map(&map).expect("map is valid");

        let context = WorkerContext {
            run_config: map,
            env: PropagatedEnv::default(),
        };
        let request =
            serialize_request::<RunTestJob>(&context, &[]).expect("request serializes");
        let mut output = Vec::new();
        run_worker(&request[..], &mut output).expect("worker succeeds");
        let outputs = deserialize_response::<RunTestJob>(&output, 0).expect("response parses");
        assert!(outputs.is_empty());
    }
}
