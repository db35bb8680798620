// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured, machine-readable vocabulary for [testfleet](https://crates.io/crates/testfleet).
//!
//! This crate is kept small and dependency-light so that tools which consume testfleet's stats
//! files, or interpret its exit codes, can depend on it without pulling in the runner.

mod exit_codes;
mod stats;

pub use exit_codes::*;
pub use stats::*;
