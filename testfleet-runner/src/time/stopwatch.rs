// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long tests and runs take.
//!
//! A stopwatch records both a realtime start (used for stats file names) and a monotonic start
//! (used for durations). Durations are always measured on the monotonic clock.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

/// Starts a new stopwatch.
pub fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two syscalls will happen imperceptibly close to each other, which is good
            // enough for our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    /// Takes a snapshot of the stopwatch.
    pub fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

/// A snapshot of a stopwatch.
#[derive(Clone, Copy, Debug)]
pub struct StopwatchSnapshot {
    /// The wall-clock time the stopwatch was started at.
    pub start_time: DateTime<Local>,

    /// The time elapsed between the start and the snapshot.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_monotonic() {
        let before = Local::now();
        let start = stopwatch();
        std::thread::sleep(Duration::from_millis(50));
        let first = start.snapshot();
        let second = start.snapshot();
        assert!(first.duration >= Duration::from_millis(50));
        assert!(second.duration >= first.duration);
        assert_eq!(first.start_time, second.start_time);
        assert!(first.start_time >= before);
    }
}
