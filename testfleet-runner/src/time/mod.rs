// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time tracking for tests and runs.

mod stopwatch;

pub use stopwatch::*;
