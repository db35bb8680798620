// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregation of test results into a run verdict.
//!
//! The entry point is [`RunSummary`], built once all results of the execution round have been
//! collected.

mod aggregator;

pub use aggregator::*;
