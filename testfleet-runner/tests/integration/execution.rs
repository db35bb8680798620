// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use pretty_assertions::assert_eq;
use std::num::NonZeroU32;
use testfleet_runner::{
    dispatch::{Dispatcher, ProcessSubstrate, expand_repetitions},
    reporter::RunSummary,
    runner::ENTRY_POINT_NOT_FOUND_EXIT_CODE,
};

#[test]
fn runs_tests_and_keeps_only_non_empty_captures() {
    let tree = FakeSourceTree::new();
    let substrate = tree.local_substrate();
    let dispatcher = Dispatcher::new(&substrate, &tree.run_config, &tree.env);

    let descriptors = expand_repetitions(
        &descriptors(&[MANAGED_TEST, ONE_SHOT_TEST, FAILING_CASE, PASSING_CASE]),
        NonZeroU32::new(2).unwrap(),
    );
    let results = dispatcher.run_tests(&descriptors);
    assert_eq!(results.len(), 8);

    for (result, descriptor) in results.iter().zip(&descriptors) {
        assert_eq!(&result.descriptor, descriptor, "results are in input order");
        let capture = descriptor.error_output_path(tree.run_config.test_log_dir());
        if descriptor.case_name() == Some("TestSplitArgs.Fails") {
            assert_eq!(result.exit_code, 3);
            assert_eq!(result.error_output_path.as_ref(), Some(&capture));
            assert_eq!(
                std::fs::read_to_string(&capture).expect("capture retained"),
                format!(
                    "boom attempt={} build_type=debug fixture=propagated\n",
                    descriptor.attempt_index()
                )
            );
        } else {
            assert_eq!(result.exit_code, 0, "{descriptor} passes");
            assert_eq!(result.error_output_path, None);
            assert!(!capture.exists(), "empty capture for {descriptor} was deleted");
        }
    }

    let summary = RunSummary::new(&results);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.total(), 8);
    assert_eq!(
        summary
            .failed_descriptors()
            .map(|d| d.as_str())
            .collect::<Vec<_>>(),
        vec![
            FAILING_CASE.to_owned(),
            format!("{FAILING_CASE}:::attempt_2"),
        ]
    );
}

#[test]
fn missing_entry_point_fails_the_test() {
    let tree = FakeSourceTree::new();
    let run_config = tree
        .run_config
        .clone()
        .with_run_test_script(tree.path().join("src/build-support/missing.sh"));
    let substrate = tree.local_substrate();
    let dispatcher = Dispatcher::new(&substrate, &run_config, &tree.env);

    let results = dispatcher.run_tests(&descriptors(&[PASSING_CASE]));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].exit_code, ENTRY_POINT_NOT_FOUND_EXIT_CODE);
    let capture = results[0]
        .error_output_path
        .as_ref()
        .expect("capture retained");
    let contents = std::fs::read_to_string(capture).expect("capture readable");
    assert!(
        contents.contains("missing.sh"),
        "capture mentions the entry point: {contents}"
    );
}

#[test]
fn exhausted_partitions_resolve_to_failures() {
    let tree = FakeSourceTree::new();
    let substrate =
        ProcessSubstrate::new(tree.path().join("no-such-worker"), 2, max_task_failures(3))
            .expect("substrate created");
    let dispatcher = Dispatcher::new(&substrate, &tree.run_config, &tree.env);

    let descriptors = descriptors(&[PASSING_CASE, ONE_SHOT_TEST]);
    let results = dispatcher.run_tests(&descriptors);
    assert_eq!(
        results
            .iter()
            .map(|result| (result.descriptor.as_str(), result.exit_code))
            .collect::<Vec<_>>(),
        vec![(PASSING_CASE, -1), (ONE_SHOT_TEST, -1)]
    );
    assert_eq!(RunSummary::new(&results).exit_code(), 1);
}
