// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the `testfleet` binary.
//!
//! These run the binary against a fake source tree whose build system, test programs and
//! single-test entry point are small shell scripts.

#![cfg(unix)]

mod fixtures;

use fixtures::*;
use pretty_assertions::assert_eq;
use testfleet_metadata::{FleetExitCode, StatsRecord};

#[test]
fn no_language_selected() {
    let tree = FakeSourceTree::new();
    let output = tree.cli("run").output();
    assert_eq!(
        output.exit_code(),
        Some(FleetExitCode::SETUP_ERROR),
        "{output}"
    );
    assert!(output.stderr().contains("no tests selected"), "{output}");
}

#[test]
fn write_stats_requires_stats_dir() {
    let tree = FakeSourceTree::new();
    let output = tree.cli("run").args(["--all", "--write-stats"]).output();
    assert_eq!(
        output.exit_code(),
        Some(FleetExitCode::SETUP_ERROR),
        "{output}"
    );
    assert!(output.stderr().contains("--stats-dir"), "{output}");
}

#[test]
fn missing_stats_dir() {
    let tree = FakeSourceTree::new();
    let stats_dir = tree.path().join("no-such-dir");
    let output = tree
        .cli("run")
        .args(["--all", "--stats-dir", stats_dir.as_str()])
        .output();
    assert_eq!(
        output.exit_code(),
        Some(FleetExitCode::SETUP_ERROR),
        "{output}"
    );
}

#[test]
fn zero_repetitions() {
    let tree = FakeSourceTree::new();
    let output = tree
        .cli("run")
        .args(["--native", "--num-repetitions", "0"])
        .output();
    assert_eq!(
        output.exit_code(),
        Some(FleetExitCode::SETUP_ERROR),
        "{output}"
    );
}

#[test]
fn missing_build_root() {
    let tree = FakeSourceTree::new();
    let output = TestfleetCli::new()
        .args([
            "list",
            "--native",
            "--build-root",
            tree.path().join("nope").as_str(),
        ])
        .output();
    assert_eq!(
        output.exit_code(),
        Some(FleetExitCode::SETUP_ERROR),
        "{output}"
    );
}

#[test]
fn list_all() {
    let tree = FakeSourceTree::new();
    let list_path = tree.path().join("tests.txt");
    let output = tree
        .cli("list")
        .args(["--all", "--output", list_path.as_str()])
        .output();
    assert_eq!(output.exit_code(), Some(FleetExitCode::OK), "{output}");

    let expected = format!("{MANAGED_TEST}\n{ONE_SHOT_TEST}\n{FAILING_CASE}\n{PASSING_CASE}\n");
    assert_eq!(output.stdout(), expected);
    let written = std::fs::read_to_string(&list_path).expect("test list written");
    assert_eq!(written, expected);
}

#[test]
fn run_saved_list_with_empty_selection() {
    let tree = FakeSourceTree::new();
    let list_path = tree.path().join("tests.txt");
    std::fs::write(&list_path, "\n").expect("test list written");
    let failed_list = tree.path().join("failed.txt");
    std::fs::write(&failed_list, format!("{FAILING_CASE}\n")).expect("stale list written");

    let output = tree
        .cli("run")
        .args([
            "--test-list",
            list_path.as_str(),
            "--failed-test-list",
            failed_list.as_str(),
        ])
        .output();
    assert_eq!(output.exit_code(), Some(FleetExitCode::OK), "{output}");
    assert!(output.stderr().contains("no tests to run"), "{output}");

    let failed = std::fs::read_to_string(&failed_list).expect("failed test list written");
    assert_eq!(failed, "", "stale failures are cleared");
}

#[test]
fn rerun_of_repeated_failures_runs_each_attempt_once() {
    let tree = FakeSourceTree::new();
    let list_path = tree.path().join("failed-before.txt");
    std::fs::write(
        &list_path,
        format!("{FAILING_CASE}\n{FAILING_CASE}:::attempt_2\n{FAILING_CASE}\n"),
    )
    .expect("test list written");
    let failed_list = tree.path().join("failed-after.txt");

    let output = tree
        .cli("run")
        .args([
            "--test-list",
            list_path.as_str(),
            "--num-repetitions",
            "2",
            "--failed-test-list",
            failed_list.as_str(),
        ])
        .output();
    assert_eq!(
        output.exit_code(),
        Some(FleetExitCode::TEST_RUN_FAILED),
        "{output}"
    );
    assert!(output.stderr().contains("running 2 tests"), "{output}");

    let failed = std::fs::read_to_string(&failed_list).expect("failed test list written");
    assert_eq!(failed, format!("{FAILING_CASE}\n{FAILING_CASE}:::attempt_2\n"));
}

#[test]
fn run_with_process_substrate() {
    let tree = FakeSourceTree::new();
    let failed_list = tree.path().join("failed.txt");
    let stats_dir = tree.path().join("stats");
    std::fs::create_dir(&stats_dir).expect("stats dir created");

    let output = tree
        .cli("run")
        .args([
            "--all",
            "--build-type",
            "fastdebug",
            "--substrate",
            "process",
            "--test-threads",
            "2",
            "--failed-test-list",
            failed_list.as_str(),
            "--stats-dir",
            stats_dir.as_str(),
            "--write-stats",
            "--sleep-after-tests",
        ])
        .env("JOB_NAME", "cli-test")
        .env("BUILD_ID", "42")
        .output();
    assert_eq!(
        output.exit_code(),
        Some(FleetExitCode::TEST_RUN_FAILED),
        "{output}"
    );
    assert!(
        output.stderr().contains("total elapsed time"),
        "{output}"
    );

    let failed = std::fs::read_to_string(&failed_list).expect("failed test list written");
    assert_eq!(failed, format!("{FAILING_CASE}\n"));

    let job_dir = stats_dir.join("fastdebug/job_cli-test");
    let stats_files: Vec<_> = job_dir
        .read_dir_utf8()
        .expect("stats job dir exists")
        .map(|entry| entry.expect("dir entry read").path().to_owned())
        .collect();
    assert_eq!(stats_files.len(), 1, "{stats_files:?}");
    let file_name = stats_files[0].file_name().expect("stats file has a name");
    assert!(file_name.starts_with("fastdebug_"), "{file_name}");
    assert!(file_name.ends_with("__build_42.json"), "{file_name}");

    let contents = std::fs::read_to_string(&stats_files[0]).expect("stats file read");
    let record = StatsRecord::from_json_str(&contents).expect("stats file is valid");
    assert_eq!(record.tests.len(), 4, "{record:?}");
    assert_eq!(record.failed_count(), 1);
    assert_eq!(record.tests[FAILING_CASE].exit_code, 3);
    assert!(record.tests[FAILING_CASE].error_output_path.is_some());
    assert_eq!(record.tests[PASSING_CASE].exit_code, 0);
    assert_eq!(record.tests[MANAGED_TEST].exit_code, 0);
}

#[test]
fn run_repeated_from_saved_list() {
    let tree = FakeSourceTree::new();
    let list_path = tree.path().join("tests.txt");
    std::fs::write(&list_path, format!("{PASSING_CASE}\n{ONE_SHOT_TEST}\n"))
        .expect("test list written");

    let output = tree
        .cli("run")
        .args([
            "--test-list",
            list_path.as_str(),
            "--num-repetitions",
            "3",
            "--verbose",
        ])
        .output();
    assert_eq!(output.exit_code(), Some(FleetExitCode::OK), "{output}");
    assert!(output.stderr().contains("running 6 tests"), "{output}");
    assert!(output.stderr().contains("all tests passed"), "{output}");
}
