// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fan-out of work items over a pluggable parallel substrate.
//!
//! Work is expressed as [`RemoteJob`]s. A [`Substrate`] splits a batch of jobs into contiguous
//! partitions, runs every partition (possibly in another process), and retries whole partitions
//! on infrastructure failures. The [`Dispatcher`] builds the discovery and execution rounds on
//! top of that.

mod local;
mod process;
mod worker;

pub use local::*;
pub use process::*;
pub use worker::*;

use crate::{
    config::{DiscoveryConfig, RunConfig},
    descriptor::TestDescriptor,
    env::PropagatedEnv,
    errors::{InfraFailure, WorkerError, error_chain},
    list::{ListTestsJob, Sampler},
    runner::{RunTestJob, TestResult},
};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::BTreeMap, fmt, num::NonZeroU32, num::NonZeroUsize, ops::Range};
use tracing::{info, warn};

/// The kinds of jobs a worker knows how to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Lists the test cases of a test program.
    ListTests,

    /// Runs a single test.
    RunTest,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListTests => write!(f, "list-tests"),
            Self::RunTest => write!(f, "run-test"),
        }
    }
}

/// A unit of work that can be shipped to a worker.
///
/// Jobs must be retry-safe: a partition may run any number of times before it succeeds.
pub trait RemoteJob: Serialize + DeserializeOwned + Send + Sync {
    /// The output of this job.
    type Output: Serialize + DeserializeOwned + Send;

    /// Identifies this job type in the worker protocol.
    const KIND: JobKind;

    /// Runs this job within a reconstructed worker environment.
    ///
    /// An `Err` is an infrastructure failure and causes the whole partition to be retried.
    fn run(&self, env: &WorkerEnvironment) -> Result<Self::Output, WorkerError>;
}

/// Everything a worker needs to reconstruct its environment, in serialized form.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct WorkerContext {
    /// The flat form of the [`RunConfig`].
    pub run_config: BTreeMap<String, String>,

    /// Environment variables to forward to every child command.
    pub env: PropagatedEnv,
}

impl WorkerContext {
    /// Serializes the run config and the propagated environment.
    pub fn new(run_config: &RunConfig, env: &PropagatedEnv) -> Self {
        Self {
            run_config: run_config.to_map(),
            env: env.clone(),
        }
    }
}

/// The environment a job runs in, reconstructed from a [`WorkerContext`] by every partition.
#[derive(Clone, Debug)]
pub struct WorkerEnvironment {
    run_config: RunConfig,
    env: PropagatedEnv,
}

impl WorkerEnvironment {
    /// Reconstructs the environment from its serialized form.
    pub fn from_context(context: &WorkerContext) -> Result<Self, WorkerError> {
        let run_config = RunConfig::from_map(&context.run_config).map_err(WorkerError::RunConfig)?;
        Ok(Self {
            run_config,
            env: context.env.clone(),
        })
    }

    /// Returns the run config.
    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Returns the environment forwarded to child commands.
    pub fn env(&self) -> &PropagatedEnv {
        &self.env
    }
}

/// A parallel execution capability: submit a batch of independent jobs, get one result per job.
pub trait Substrate {
    /// Runs `jobs` split into `num_partitions` contiguous partitions.
    ///
    /// The returned vector has exactly `jobs.len()` entries, in input order. Jobs whose
    /// partition exhausted its retry budget resolve to `Err`.
    fn submit<J: RemoteJob>(
        &self,
        context: &WorkerContext,
        jobs: &[J],
        num_partitions: usize,
    ) -> Vec<Result<J::Output, InfraFailure>>;
}

/// Either of the substrates shipped with testfleet.
#[derive(Debug)]
pub enum AnySubstrate {
    /// Runs partitions on a thread pool in this process.
    Local(LocalSubstrate),

    /// Runs every partition attempt in a fresh worker process.
    Process(ProcessSubstrate),
}

impl Substrate for AnySubstrate {
    fn submit<J: RemoteJob>(
        &self,
        context: &WorkerContext,
        jobs: &[J],
        num_partitions: usize,
    ) -> Vec<Result<J::Output, InfraFailure>> {
        match self {
            Self::Local(substrate) => substrate.submit(context, jobs, num_partitions),
            Self::Process(substrate) => substrate.submit(context, jobs, num_partitions),
        }
    }
}

/// Splits `len` jobs into contiguous, near-equal partitions.
///
/// `num_partitions` is clamped to `[1, len]`. Earlier partitions get the extra jobs if `len`
/// doesn't divide evenly. Returns no partitions if `len` is 0.
pub fn partition_ranges(len: usize, num_partitions: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let num_partitions = num_partitions.clamp(1, len);
    let base = len / num_partitions;
    let extra = len % num_partitions;

    let mut ranges = Vec::with_capacity(num_partitions);
    let mut start = 0;
    for index in 0..num_partitions {
        let size = base + usize::from(index < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Runs a partition in this process: reconstructs the environment, then runs every job in
/// order.
pub fn run_partition<J: RemoteJob>(
    context: &WorkerContext,
    jobs: &[J],
) -> Result<Vec<J::Output>, WorkerError> {
    let env = WorkerEnvironment::from_context(context)?;
    jobs.iter().map(|job| job.run(&env)).collect()
}

/// Calls `attempt` until it succeeds or `max_attempts` attempts have failed.
pub(crate) fn run_with_retries<T>(
    kind: JobKind,
    partition_index: usize,
    max_attempts: NonZeroUsize,
    mut attempt: impl FnMut() -> Result<T, WorkerError>,
) -> Result<T, InfraFailure> {
    let max_attempts = max_attempts.get();
    let mut attempt_number = 1;
    loop {
        match attempt() {
            Ok(output) => return Ok(output),
            Err(error) if attempt_number < max_attempts => {
                warn!(
                    "{kind} partition {partition_index} failed on attempt \
                     {attempt_number}/{max_attempts}, retrying: {}",
                    error_chain(&error)
                );
                attempt_number += 1;
            }
            Err(error) => {
                warn!(
                    "{kind} partition {partition_index} failed on final attempt \
                     {attempt_number}/{max_attempts}: {}",
                    error_chain(&error)
                );
                return Err(InfraFailure::new(attempt_number, &error));
            }
        }
    }
}

/// Spreads the outcome of each partition back over its jobs, in input order.
pub(crate) fn flatten_partition_outputs<T>(
    ranges: &[Range<usize>],
    outputs: Vec<Result<Vec<T>, InfraFailure>>,
) -> Vec<Result<T, InfraFailure>> {
    let mut results = Vec::with_capacity(ranges.last().map_or(0, |range| range.end));
    for (range, output) in ranges.iter().zip(outputs) {
        match output {
            Ok(values) => results.extend(values.into_iter().map(Ok)),
            Err(failure) => results.extend(range.clone().map(|_| Err(failure.clone()))),
        }
    }
    results
}

/// Builds the discovery and execution rounds on top of a substrate.
#[derive(Debug)]
pub struct Dispatcher<'a, S> {
    substrate: &'a S,
    context: WorkerContext,
}

impl<'a, S: Substrate> Dispatcher<'a, S> {
    /// Creates a new dispatcher, serializing the run config and environment once.
    pub fn new(substrate: &'a S, run_config: &RunConfig, env: &PropagatedEnv) -> Self {
        Self {
            substrate,
            context: WorkerContext::new(run_config, env),
        }
    }

    /// Returns the context shipped to every partition.
    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    /// Runs the discovery round: expands each program into its test cases.
    ///
    /// Programs are split into `ceil(count / 2)` partitions. A partition that exhausts its
    /// retry budget contributes zero descriptors.
    pub fn discover_native_cases(
        &self,
        programs: &[Utf8PathBuf],
        discovery: &DiscoveryConfig,
    ) -> Vec<TestDescriptor> {
        let jobs: Vec<_> = programs
            .iter()
            .map(|program| ListTestsJob::new(program.clone(), discovery))
            .collect();
        let num_partitions = jobs.len().div_ceil(2);
        info!(
            "listing test cases of {} programs in {} partitions",
            jobs.len(),
            num_partitions
        );

        let outputs = self.substrate.submit(&self.context, &jobs, num_partitions);
        let mut descriptors = Vec::new();
        for (job, output) in jobs.iter().zip(outputs) {
            match output {
                Ok(cases) => descriptors.extend(cases),
                Err(failure) => {
                    warn!(
                        "could not list test cases of `{}`, skipping it: {failure}",
                        job.program()
                    );
                }
            }
        }
        descriptors
    }

    /// Runs the execution round: one partition per descriptor.
    ///
    /// Returns one result per descriptor, in input order. A descriptor whose partition exhausted
    /// its retry budget resolves to a failing result.
    pub fn run_tests(&self, descriptors: &[TestDescriptor]) -> Vec<TestResult> {
        let jobs: Vec<_> = descriptors.iter().cloned().map(RunTestJob::new).collect();
        let outputs = self.substrate.submit(&self.context, &jobs, jobs.len());
        jobs.into_iter()
            .zip(outputs)
            .map(|(job, output)| match output {
                Ok(result) => result,
                Err(failure) => {
                    warn!(
                        "test {} could not be run, reporting it as failed: {failure}",
                        job.descriptor()
                    );
                    TestResult::infra_failure(job.into_descriptor())
                }
            })
            .collect()
    }
}

/// Repeats every descriptor `num_repetitions` times, with attempt indexes `1..=n`.
///
/// All attempts of a descriptor are adjacent, in attempt order.
pub fn expand_repetitions(
    descriptors: &[TestDescriptor],
    num_repetitions: NonZeroU32,
) -> Vec<TestDescriptor> {
    if num_repetitions.get() == 1 {
        return descriptors.to_vec();
    }
    descriptors
        .iter()
        .flat_map(|descriptor| {
            (1..=num_repetitions.get())
                .filter_map(NonZeroU32::new)
                .map(|attempt_index| descriptor.with_attempt_index(attempt_index))
        })
        .collect()
}

/// Caps `descriptors` at `max_tests` by uniform random sampling, keeping their relative order.
///
/// This is applied to the final list of tests, after discovery or after loading a saved list,
/// and before repetitions are expanded.
pub fn sample_descriptors(
    descriptors: Vec<TestDescriptor>,
    max_tests: usize,
    sampler: &mut Sampler,
) -> Vec<TestDescriptor> {
    if descriptors.len() <= max_tests {
        return descriptors;
    }
    info!(
        "randomly selecting {max_tests} of {} tests",
        descriptors.len()
    );
    sampler.sample(descriptors, max_tests)
}
