// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for testfleet-runner.

use camino::Utf8Path;
use std::{collections::BTreeSet, io, time::Duration};
use swrite::{SWrite, swrite};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "program" if `count` is 1, otherwise "programs".
    pub fn programs_str(count: usize) -> &'static str {
        if count == 1 { "program" } else { "programs" }
    }

    /// Returns "partition" if `count` is 1, otherwise "partitions".
    pub fn partitions_str(count: usize) -> &'static str {
        if count == 1 {
            "partition"
        } else {
            "partitions"
        }
    }

    /// Returns "repetition" if `count` is 1, otherwise "repetitions".
    pub fn repetitions_str(count: u32) -> &'static str {
        if count == 1 {
            "repetition"
        } else {
            "repetitions"
        }
    }
}

/// Displays a set of exit codes as `{0, 1, 139}`.
pub fn display_exit_codes(exit_codes: &BTreeSet<i32>) -> String {
    let mut out = String::from("{");
    for (index, code) in exit_codes.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        swrite!(out, "{code}");
    }
    out.push('}');
    out
}

/// Displays a duration in seconds with millisecond precision, e.g. `12.345s`.
pub fn display_duration_secs(duration: Duration) -> String {
    let mut out = String::new();
    swrite!(out, "{:.3}s", duration.as_secs_f64());
    out
}

/// Checks that files can be created in `dir` by creating and removing a scratch file.
pub fn check_dir_writable(dir: &Utf8Path) -> io::Result<()> {
    let file = camino_tempfile::Builder::new()
        .prefix(".testfleet-write-check-")
        .tempfile_in(dir)?;
    file.close()
}
