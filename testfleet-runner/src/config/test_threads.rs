// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::TestThreadsParseError;
use serde::Deserialize;
use std::{str::FromStr, sync::LazyLock};
use tracing::warn;

static AVAILABLE_PARALLELISM: LazyLock<usize> =
    LazyLock::new(|| match std::thread::available_parallelism() {
        Ok(count) => count.get(),
        Err(error) => {
            warn!("cannot determine available parallelism ({error}), running one partition at once");
            1
        }
    });

/// How many partitions a substrate runs at once.
///
/// Written as `num-cpus`, a positive count, or a negative count meaning "this many fewer than
/// `num-cpus`" (never less than one).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(try_from = "RawTestThreads")]
pub enum TestThreads {
    /// A fixed number of partition slots.
    Count(usize),

    /// One partition slot per available CPU on the controller.
    NumCpus,
}

impl TestThreads {
    /// Resolves the number of partition slots.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(slots) => slots,
            Self::NumCpus => *AVAILABLE_PARALLELISM,
        }
    }

    fn from_count(count: i64) -> Result<Self, TestThreadsParseError> {
        match usize::try_from(count) {
            Ok(0) => Err(TestThreadsParseError::new(
                count.to_string(),
                "at least one partition must run at a time",
            )),
            Ok(slots) => Ok(Self::Count(slots)),
            Err(_) => {
                let fewer = usize::try_from(count.unsigned_abs()).unwrap_or(usize::MAX);
                Ok(Self::Count(
                    AVAILABLE_PARALLELISM.saturating_sub(fewer).max(1),
                ))
            }
        }
    }
}

impl FromStr for TestThreads {
    type Err = TestThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }
        let count = s
            .parse::<i64>()
            .map_err(|_| TestThreadsParseError::new(s, "expected an integer or `num-cpus`"))?;
        Self::from_count(count)
    }
}

/// The config file accepts both `test-threads = 4` and `test-threads = "num-cpus"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTestThreads {
    Count(i64),
    Keyword(String),
}

impl TryFrom<RawTestThreads> for TestThreads {
    type Error = TestThreadsParseError;

    fn try_from(raw: RawTestThreads) -> Result<Self, Self::Error> {
        match raw {
            RawTestThreads::Count(count) => Self::from_count(count),
            RawTestThreads::Keyword(keyword) => keyword.parse(),
        }
    }
}
