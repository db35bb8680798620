// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::RunConfig, env::PropagatedEnv};
use duct::cmd;
use tracing::{debug, warn};

/// The outcome of waiting for the system clock to be synchronized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockSyncOutcome {
    /// No clock-sync command is configured.
    Disabled,

    /// The clock-sync command succeeded.
    Synchronized {
        /// The number of attempts it took.
        attempts: u32,
    },

    /// The clock-sync command never succeeded.
    GaveUp {
        /// The number of attempts made.
        attempts: u32,
    },

    /// The clock-sync command could not be run at all.
    Unavailable,
}

/// Waits for the system clock to be synchronized before a test is timed.
///
/// This never fails: if the clock can't be confirmed to be synchronized, a warning is logged and
/// the test runs anyway.
pub fn wait_for_clock_sync(run_config: &RunConfig, env: &PropagatedEnv) -> ClockSyncOutcome {
    let Some((program, args)) = run_config
        .clock_sync_command()
        .and_then(|command| command.split_first())
    else {
        return ClockSyncOutcome::Disabled;
    };

    let max_attempts = run_config.clock_sync_max_attempts().max(1);
    for attempt in 1..=max_attempts {
        let expression = env
            .apply(cmd(program.as_str(), args))
            .stdout_null()
            .stderr_null()
            .unchecked();
        match expression.run() {
            Ok(output) if output.status.success() => {
                debug!("clock is synchronized after {attempt} attempt(s)");
                return ClockSyncOutcome::Synchronized { attempts: attempt };
            }
            Ok(_) => {
                if attempt < max_attempts {
                    std::thread::sleep(run_config.clock_sync_retry_delay());
                }
            }
            Err(error) => {
                warn!(
                    "could not run clock-sync command `{}`, not waiting for clock sync: {error}",
                    shell_words::join(std::iter::once(program).chain(args))
                );
                return ClockSyncOutcome::Unavailable;
            }
        }
    }

    warn!("clock is still not synchronized after {max_attempts} attempts, running test anyway");
    ClockSyncOutcome::GaveUp {
        attempts: max_attempts,
    }
}
