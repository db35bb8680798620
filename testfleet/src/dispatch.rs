// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{NO_HEADING_TARGET, OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use regex::Regex;
use std::{
    io::{self, Write},
    num::NonZeroU32,
};
use testfleet_metadata::FleetExitCode;
use testfleet_runner::{
    config::{BuildRoots, FleetConfig, RunConfig, TestThreads},
    descriptor::TestDescriptor,
    dispatch::{
        AnySubstrate, Dispatcher, LocalSubstrate, ProcessSubstrate, Substrate,
        WORKER_SUBCOMMAND_NAME, expand_repetitions, run_worker, sample_descriptors,
    },
    env::PropagatedEnv,
    helpers::{check_dir_writable, display_duration_secs, plural},
    list::{
        DiscoveryOptions, LanguageSelection, Sampler, collapse_attempts, discover_tests,
        load_test_list, write_test_list,
    },
    record::{StatsKey, StatsRecorder, StatsStore, build_stats_record},
    reporter::RunSummary,
    time::stopwatch,
};
use tracing::{debug, info, warn};

/// Distributes a large test suite over a pool of workers.
///
/// Native test programs are expanded into their individual test cases and managed-runtime test
/// classes are found in the source tree. Every test then runs through the single-test entry
/// point, and the run fails if any test fails.
#[derive(Debug, Parser)]
#[command(version, name = "testfleet", styles = clap_styles::style())]
pub struct TestfleetApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl TestfleetApp {
    /// Initializes logging and color support.
    pub fn init_output(&self) -> OutputContext {
        match &self.command {
            Command::Worker => OutputContext::worker_init(),
            Command::Run { .. } | Command::List { .. } => self.output.init(),
        }
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run { shared, run_opts } => {
                let app = BaseApp::new(shared, output)?;
                app.exec_run(run_opts)
            }
            Command::List { shared, list_opts } => {
                let app = BaseApp::new(shared, output)?;
                app.exec_list(list_opts)
            }
            Command::Worker => {
                run_worker(io::stdin().lock(), io::stdout().lock())?;
                Ok(FleetExitCode::OK)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover tests and run them
    ///
    /// Tests are discovered (or loaded with --test-list), optionally sampled and repeated, then
    /// dispatched over the selected substrate. The exit code is 0 if every test passed and 1
    /// otherwise.
    Run {
        #[command(flatten)]
        shared: SharedOpts,

        #[command(flatten)]
        run_opts: RunOpts,
    },

    /// Discover tests and print them
    ///
    /// Prints one test descriptor per line. The output can be saved and passed back in with
    /// --test-list.
    List {
        #[command(flatten)]
        shared: SharedOpts,

        #[command(flatten)]
        list_opts: ListOpts,
    },

    /// Runs a partition of jobs sent by the process substrate
    #[command(name = WORKER_SUBCOMMAND_NAME, hide = true)]
    Worker,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Test selection")]
struct SharedOpts {
    /// Run native tests
    #[arg(long, alias = "cpp")]
    native: bool,

    /// Run managed-runtime tests
    #[arg(long, alias = "java")]
    managed: bool,

    /// Run tests in every language
    #[arg(long)]
    all: bool,

    /// The build root, typically <src-root>/build/<build-name>
    #[arg(long, value_name = "DIR")]
    build_root: Utf8PathBuf,

    /// Build type [default: inferred from the build root's name]
    #[arg(long, value_name = "TYPE")]
    build_type: Option<String>,

    /// Source root [default: the build root's grandparent]
    #[arg(long, value_name = "DIR")]
    src_root: Option<Utf8PathBuf>,

    /// Only expand native test programs whose path matches this regex
    #[arg(long, alias = "cpp_test_program_regexp", value_name = "REGEX")]
    native_program_regex: Option<String>,

    /// Randomly select at most this many test programs, then at most this many tests
    #[arg(long, alias = "max_tests", value_name = "N")]
    max_tests: Option<usize>,

    /// Read tests from a saved list instead of discovering them
    #[arg(long, alias = "test_list", value_name = "PATH")]
    test_list: Option<Utf8PathBuf>,

    /// Config file [default: <src-root>/.config/testfleet.toml]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Seed for random test selection
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
}

impl SharedOpts {
    fn languages(&self) -> LanguageSelection {
        if self.all {
            return LanguageSelection::all();
        }
        LanguageSelection {
            native: self.native,
            managed: self.managed,
        }
    }

    fn selection(&self) -> Result<TestSelection> {
        let languages = self.languages();
        if let Some(path) = &self.test_list {
            if !languages.is_empty() {
                warn!("--test-list is specified, so tests are not discovered by language");
            }
            return Ok(TestSelection::Saved(path.clone()));
        }
        if languages.is_empty() {
            return Err(ExpectedError::NoTestsSelected);
        }

        let program_regex = self
            .native_program_regex
            .as_deref()
            .map(|regex| {
                Regex::new(regex).map_err(|err| ExpectedError::invalid_program_regex(regex, err))
            })
            .transpose()?;
        Ok(TestSelection::Discover(DiscoveryOptions {
            languages,
            program_regex,
            max_tests: self.max_tests,
        }))
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Runner options")]
struct RunOpts {
    /// Run every test this many times
    #[arg(long, alias = "num_repetitions", default_value_t = 1, value_name = "N")]
    num_repetitions: u32,

    /// Write the failed tests to this file, in --test-list format
    #[arg(long, alias = "failed_test_list", value_name = "PATH")]
    failed_test_list: Option<Utf8PathBuf>,

    /// Directory of historical stats, used to estimate the run time
    #[arg(long, value_name = "DIR")]
    stats_dir: Option<Utf8PathBuf>,

    /// Write the stats of this run into --stats-dir
    #[arg(long, alias = "write_stats")]
    write_stats: bool,

    /// Stay alive for a while after the run, for inspection
    #[arg(long, alias = "sleep_after_tests")]
    sleep_after_tests: bool,

    /// Where partitions run
    #[arg(long, value_enum, default_value_t, value_name = "SUBSTRATE")]
    substrate: SubstrateKind,

    /// Number of partitions to run at once [default: from config]
    #[arg(
        long,
        short = 'j',
        value_name = "N",
        env = "TESTFLEET_TEST_THREADS",
        allow_negative_numbers = true
    )]
    test_threads: Option<TestThreads>,
}

impl RunOpts {
    fn num_repetitions(&self) -> Result<NonZeroU32> {
        NonZeroU32::new(self.num_repetitions).ok_or(ExpectedError::InvalidRepetitions {
            value: self.num_repetitions,
        })
    }

    /// Checks the output paths before anything runs, so that a long run doesn't fail at the
    /// very end.
    fn check_output_paths(&self) -> Result<()> {
        match (&self.stats_dir, self.write_stats) {
            (None, true) => return Err(ExpectedError::WriteStatsWithoutStatsDir),
            (Some(dir), write_stats) => {
                if !dir.is_dir() {
                    return Err(ExpectedError::StatsDirNotFound { dir: dir.clone() });
                }
                if write_stats {
                    check_dir_writable(dir)
                        .map_err(|err| ExpectedError::dir_not_writable("--stats-dir", dir, err))?;
                }
            }
            (None, false) => {}
        }

        if let Some(path) = &self.failed_test_list {
            let dir = parent_dir(path);
            check_dir_writable(dir)
                .map_err(|err| ExpectedError::dir_not_writable("--failed-test-list", dir, err))?;
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Output options")]
struct ListOpts {
    /// Also write the tests to this file, in --test-list format
    #[arg(long, short = 'o', value_name = "PATH")]
    output: Option<Utf8PathBuf>,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum SubstrateKind {
    /// Run partitions on a thread pool in this process
    #[default]
    Local,

    /// Run every partition in a fresh worker process
    Process,
}

#[derive(Debug)]
enum TestSelection {
    Discover(DiscoveryOptions),
    Saved(Utf8PathBuf),
}

/// State shared by `run` and `list`.
struct BaseApp {
    output: OutputContext,
    config: FleetConfig,
    run_config: RunConfig,
    env: PropagatedEnv,
    selection: TestSelection,
    max_tests: Option<usize>,
    sampler: Sampler,
}

impl BaseApp {
    fn new(shared: SharedOpts, output: OutputContext) -> Result<Self> {
        let selection = shared.selection()?;
        let roots = BuildRoots::resolve(&shared.build_root, shared.src_root.as_deref())?;
        let config = FleetConfig::from_sources(roots.src_root(), shared.config_file.as_deref())?;
        let run_config = RunConfig::new(&roots, shared.build_type.as_deref(), config.execution());
        let env = PropagatedEnv::capture(
            &config.dispatch().propagated_env_vars,
            &config.dispatch().propagated_env_prefix,
        );
        info!(
            "build root `{}` (build type {}), source root `{}`",
            run_config.build_root(),
            run_config.build_type(),
            run_config.src_root()
        );

        Ok(Self {
            output,
            config,
            run_config,
            env,
            selection,
            max_tests: shared.max_tests,
            sampler: Sampler::new(shared.seed),
        })
    }

    fn exec_run(mut self, run_opts: RunOpts) -> Result<i32> {
        let num_repetitions = run_opts.num_repetitions()?;
        run_opts.check_output_paths()?;

        let test_threads = run_opts
            .test_threads
            .unwrap_or(self.config.dispatch().test_threads)
            .compute();
        let max_task_failures = self.config.dispatch().max_task_failures;
        let substrate = match run_opts.substrate {
            SubstrateKind::Local => {
                AnySubstrate::Local(LocalSubstrate::new(test_threads, max_task_failures)?)
            }
            SubstrateKind::Process => AnySubstrate::Process(ProcessSubstrate::current_exe(
                test_threads,
                max_task_failures,
            )?),
        };
        let dispatcher = Dispatcher::new(&substrate, &self.run_config, &self.env);

        let descriptors = self.select_tests(&dispatcher)?;
        if descriptors.is_empty() {
            info!("no tests to run");
            if let Some(path) = &run_opts.failed_test_list {
                write_test_list(path, &descriptors)?;
            }
            return Ok(FleetExitCode::OK);
        }

        let stats_key = StatsKey::from_env(self.run_config.build_type(), self.config.stats());
        if let Some(stats_dir) = &run_opts.stats_dir {
            log_historical_estimate(stats_dir, &stats_key, &descriptors);
        }
        if self.output.verbose {
            for descriptor in &descriptors {
                info!(target: NO_HEADING_TARGET, "  {descriptor}");
            }
        }

        let to_run = expand_repetitions(&descriptors, num_repetitions);
        info!(
            "running {} {} ({} {}) with {test_threads} {} at once",
            to_run.len(),
            plural::tests_str(to_run.len()),
            num_repetitions,
            plural::repetitions_str(num_repetitions.get()),
            plural::partitions_str(test_threads),
        );

        let start = stopwatch();
        let results = dispatcher.run_tests(&to_run);
        let snapshot = start.snapshot();
        let elapsed = snapshot.duration;

        let summary = RunSummary::new(&results);
        summary.log();
        info!("total elapsed time: {}", display_duration_secs(elapsed));

        if let Some(path) = &run_opts.failed_test_list {
            summary.write_failed_test_list(path)?;
        }
        if let (Some(stats_dir), true) = (&run_opts.stats_dir, run_opts.write_stats) {
            let recorder = StatsRecorder::new(stats_dir, stats_key);
            let record = build_stats_record(&results, elapsed);
            let path = recorder.write(&record, snapshot.start_time)?;
            info!("wrote stats to `{path}`");
        }

        if run_opts.sleep_after_tests {
            let duration = self.config.driver().sleep_after_tests;
            info!(
                "sleeping for {} after tests",
                humantime::format_duration(duration)
            );
            std::thread::sleep(duration);
        }

        Ok(summary.exit_code())
    }

    fn exec_list(mut self, list_opts: ListOpts) -> Result<i32> {
        let substrate = LocalSubstrate::new(
            self.config.dispatch().test_threads.compute(),
            self.config.dispatch().max_task_failures,
        )?;
        let dispatcher = Dispatcher::new(&substrate, &self.run_config, &self.env);
        let descriptors = self.select_tests(&dispatcher)?;

        let mut stdout = io::stdout().lock();
        for descriptor in &descriptors {
            writeln!(stdout, "{descriptor}")
                .map_err(|err| ExpectedError::WriteStdoutError { err })?;
        }
        stdout
            .flush()
            .map_err(|err| ExpectedError::WriteStdoutError { err })?;

        if let Some(path) = &list_opts.output {
            write_test_list(path, &descriptors)?;
            info!(
                "wrote {} {} to `{path}`",
                descriptors.len(),
                plural::tests_str(descriptors.len())
            );
        }
        Ok(FleetExitCode::OK)
    }

    /// Discovers or loads tests, then applies the --max-tests cap.
    fn select_tests<S: Substrate>(
        &mut self,
        dispatcher: &Dispatcher<'_, S>,
    ) -> Result<Vec<TestDescriptor>> {
        let descriptors = match &self.selection {
            TestSelection::Saved(path) => {
                let descriptors = collapse_attempts(load_test_list(path)?);
                info!(
                    "loaded {} {} from `{path}`",
                    descriptors.len(),
                    plural::tests_str(descriptors.len())
                );
                descriptors
            }
            TestSelection::Discover(options) => discover_tests(
                options,
                &self.config,
                &self.run_config,
                &self.env,
                dispatcher,
                &mut self.sampler,
            )?,
        };

        Ok(match self.max_tests {
            Some(max_tests) => sample_descriptors(descriptors, max_tests, &mut self.sampler),
            None => descriptors,
        })
    }
}

fn log_historical_estimate(stats_dir: &Utf8Path, key: &StatsKey, descriptors: &[TestDescriptor]) {
    match StatsStore::new(stats_dir).latest(key) {
        Ok(Some(stats)) => {
            let estimate = stats.estimate(descriptors);
            info!(
                "according to `{}`, {} of the selected tests took {} per repetition \
                 ({} without recorded stats)",
                stats.path,
                estimate.known,
                display_duration_secs(estimate.total),
                estimate.unknown,
            );
        }
        Ok(None) => debug!("no historical stats in `{stats_dir}` for this build type and job"),
        Err(error) => warn!("could not read historical stats: {error}"),
    }
}

/// Returns the directory a file is created in, treating a bare file name as the current
/// directory.
fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}
