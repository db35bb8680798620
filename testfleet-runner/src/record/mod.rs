// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Historical per-run statistics.
//!
//! Each run may write one [`StatsRecord`](testfleet_metadata::StatsRecord) into a directory tree
//! keyed by build type and CI job. Stats files are write-once. The most recent record for the
//! same build type and job can be read back to estimate how long a run will take.

mod stats;

pub use stats::*;
