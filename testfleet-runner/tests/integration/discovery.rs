// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8PathBuf;
use pretty_assertions::assert_eq;
use regex::Regex;
use testfleet_runner::{
    dispatch::{Dispatcher, ProcessSubstrate},
    errors::DiscoveryError,
    list::{DiscoveryOptions, LanguageSelection, Sampler, discover_tests, list_test_programs},
};

fn discover(tree: &FakeSourceTree, options: &DiscoveryOptions, seed: u64) -> Vec<String> {
    let substrate = tree.local_substrate();
    let dispatcher = Dispatcher::new(&substrate, &tree.run_config, &tree.env);
    let descriptors = discover_tests(
        options,
        &tree.config,
        &tree.run_config,
        &tree.env,
        &dispatcher,
        &mut Sampler::new(Some(seed)),
    )
    .expect("discovery succeeds");
    descriptors.into_iter().map(String::from).collect()
}

#[test]
fn discovers_managed_then_native() {
    let tree = FakeSourceTree::new();
    let options = DiscoveryOptions {
        languages: LanguageSelection::all(),
        ..Default::default()
    };
    // The broken program contributes no descriptors.
    assert_eq!(
        discover(&tree, &options, 0),
        vec![MANAGED_TEST, ONE_SHOT_TEST, FAILING_CASE, PASSING_CASE]
    );
}

#[test]
fn single_language() {
    let tree = FakeSourceTree::new();
    let managed_only = DiscoveryOptions {
        languages: LanguageSelection {
            native: false,
            managed: true,
        },
        ..Default::default()
    };
    assert_eq!(discover(&tree, &managed_only, 0), vec![MANAGED_TEST]);

    let native_only = DiscoveryOptions {
        languages: LanguageSelection {
            native: true,
            managed: false,
        },
        ..Default::default()
    };
    assert_eq!(
        discover(&tree, &native_only, 0),
        vec![ONE_SHOT_TEST, FAILING_CASE, PASSING_CASE]
    );
}

#[test]
fn program_regex_keeps_one_shot_tests() {
    let tree = FakeSourceTree::new();
    let options = DiscoveryOptions {
        languages: LanguageSelection {
            native: true,
            managed: false,
        },
        program_regex: Some(Regex::new("docdb").unwrap()),
        max_tests: None,
    };
    assert_eq!(discover(&tree, &options, 0), vec![ONE_SHOT_TEST]);
}

#[test]
fn max_tests_caps_regular_programs() {
    let tree = FakeSourceTree::new();
    let options = DiscoveryOptions {
        languages: LanguageSelection {
            native: true,
            managed: false,
        },
        program_regex: None,
        max_tests: Some(1),
    };
    for seed in 0..8 {
        let descriptors = discover(&tree, &options, seed);
        // Either split_args-test or broken-test was kept, never both.
        assert!(
            descriptors == vec![ONE_SHOT_TEST, FAILING_CASE, PASSING_CASE]
                || descriptors == vec![ONE_SHOT_TEST],
            "unexpected descriptors for seed {seed}: {descriptors:?}"
        );
    }
}

#[test]
fn max_tests_caps_descriptors() {
    let tree = FakeSourceTree::new();
    let options = DiscoveryOptions {
        languages: LanguageSelection::all(),
        ..Default::default()
    };
    let discovered = discover(&tree, &options, 0);
    assert_eq!(discovered.len(), 4);

    let mut sampler = Sampler::new(Some(42));
    let sampled = sampler.sample(discovered.clone(), 2);
    assert_eq!(sampled.len(), 2);
    assert_ne!(sampled[0], sampled[1]);
    // Sampling preserves the discovery order.
    let positions: Vec<_> = sampled
        .iter()
        .map(|s| discovered.iter().position(|d| d == s).expect("sampled from input"))
        .collect();
    assert!(positions[0] < positions[1]);
}

#[test]
fn failing_program_listing_is_fatal() {
    let tree = FakeSourceTree::new();
    let config = tree.load_config(
        r#"
        [discovery]
        program-list-command = "sh -c 'exit 2'"
        "#,
    );
    let error = list_test_programs(&tree.run_config, config.discovery(), &tree.env)
        .expect_err("listing fails");
    assert!(
        matches!(
            error,
            DiscoveryError::ProgramListFailed {
                exit_code: Some(2),
                ..
            }
        ),
        "unexpected error: {error}"
    );
}

#[test]
fn zero_programs_is_fatal() {
    let tree = FakeSourceTree::new();
    let config = tree.load_config(
        r#"
        [discovery]
        program-list-command = "true"
        "#,
    );
    let error = list_test_programs(&tree.run_config, config.discovery(), &tree.env)
        .expect_err("no programs found");
    assert!(
        matches!(error, DiscoveryError::NoTestPrograms { .. }),
        "unexpected error: {error}"
    );
}

#[test]
fn exhausted_listing_contributes_nothing() {
    let tree = FakeSourceTree::new();
    let substrate =
        ProcessSubstrate::new(tree.path().join("no-such-worker"), 2, max_task_failures(2))
            .expect("substrate created");
    let dispatcher = Dispatcher::new(&substrate, &tree.run_config, &tree.env);
    let programs = vec![Utf8PathBuf::from("tests-util/split_args-test")];
    assert!(
        dispatcher
            .discover_native_cases(&programs, tree.config.discovery())
            .is_empty()
    );
}
