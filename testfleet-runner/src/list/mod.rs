// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The discovery engine: turns "run native tests" and "run managed-runtime tests" into a flat,
//! deduplicated, ordered list of [`TestDescriptor`]s.
//!
//! Native discovery happens in two steps. The build system's program-listing command is run once
//! on the controller, then every regular program is expanded into its test cases in a discovery
//! round on the substrate. Managed-runtime discovery walks source trees on the controller.

mod gtest;
mod managed;
mod native;
mod sampling;
mod test_list;

pub use gtest::*;
pub use managed::*;
pub use native::*;
pub use sampling::*;
pub use test_list::*;

use crate::{
    config::{FleetConfig, RunConfig},
    descriptor::TestDescriptor,
    dispatch::{Dispatcher, Substrate},
    env::PropagatedEnv,
    errors::DiscoveryError,
    helpers::plural,
};
use regex::Regex;
use std::collections::HashSet;
use tracing::info;

/// Which languages to discover tests for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LanguageSelection {
    /// Discover native test programs and their cases.
    pub native: bool,

    /// Discover managed-runtime test classes.
    pub managed: bool,
}

impl LanguageSelection {
    /// Selects every language.
    pub fn all() -> Self {
        Self {
            native: true,
            managed: true,
        }
    }

    /// Returns true if no language is selected.
    pub fn is_empty(&self) -> bool {
        !self.native && !self.managed
    }
}

/// Options for a discovery run.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryOptions {
    /// The languages to discover.
    pub languages: LanguageSelection,

    /// Keeps only regular native programs whose path matches this regex.
    pub program_regex: Option<Regex>,

    /// Caps the number of regular native programs before they are expanded.
    pub max_tests: Option<usize>,
}

/// Discovers tests for the selected languages.
///
/// Managed-runtime descriptors come first, sorted, followed by sorted native descriptors.
/// Duplicates are removed.
pub fn discover_tests<S: Substrate>(
    options: &DiscoveryOptions,
    config: &FleetConfig,
    run_config: &RunConfig,
    env: &PropagatedEnv,
    dispatcher: &Dispatcher<'_, S>,
    sampler: &mut Sampler,
) -> Result<Vec<TestDescriptor>, DiscoveryError> {
    let mut managed = Vec::new();
    if options.languages.managed {
        managed = discover_managed_tests(
            run_config.src_root(),
            &config.discovery().managed_source_roots,
        )?;
        info!("found {} managed-runtime test classes", managed.len());
    }

    let mut native = Vec::new();
    if options.languages.native {
        let programs = list_test_programs(run_config, config.discovery(), env)?;
        let mut programs = NativePrograms::partition(programs, config.discovery());
        info!(
            "found {} one-shot and {} regular native test {}",
            programs.one_shot.len(),
            programs.regular.len(),
            plural::programs_str(programs.regular.len()),
        );

        if let Some(regex) = &options.program_regex {
            programs.filter_regular(regex);
        }
        if let Some(max_tests) = options.max_tests {
            if programs.regular.len() > max_tests {
                info!(
                    "randomly selecting {max_tests} of {} native test {}",
                    programs.regular.len(),
                    plural::programs_str(programs.regular.len()),
                );
                programs.regular = sampler.sample(std::mem::take(&mut programs.regular), max_tests);
            }
        }

        native = programs.one_shot_descriptors();
        native.extend(dispatcher.discover_native_cases(&programs.regular, config.discovery()));
        info!("found {} native test cases", native.len());
    }

    Ok(order_descriptors(managed, native))
}

/// Orders discovered descriptors: sorted managed-runtime ones first, then sorted native ones,
/// without duplicates.
pub fn order_descriptors(
    mut managed: Vec<TestDescriptor>,
    mut native: Vec<TestDescriptor>,
) -> Vec<TestDescriptor> {
    managed.sort();
    native.sort();
    let mut seen = HashSet::new();
    managed
        .into_iter()
        .chain(native)
        .filter(|descriptor| seen.insert(descriptor.clone()))
        .collect()
}
