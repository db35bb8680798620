// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for testfleet.
//!
//! There are two layers of configuration:
//!
//! * [`FleetConfig`] is the tool configuration, read from TOML on the controller.
//! * [`RunConfig`] is the resolved, per-run configuration that is shipped to every worker as a
//!   flat map of strings.

mod fleet_config;
mod run_config;
mod test_threads;

pub use fleet_config::*;
pub use run_config::*;
pub use test_threads::*;
