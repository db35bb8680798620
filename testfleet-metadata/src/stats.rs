// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// The language a test belongs to.
///
/// Native tests are compiled test programs (typically gtest binaries) addressed by their path
/// relative to the build root. Managed-runtime tests are test classes addressed by their source
/// file path.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestLanguage {
    /// A native test program or a test case within one.
    Native,

    /// A managed-runtime test class.
    ManagedRuntime,
}

impl TestLanguage {
    /// Returns the string representation of this language, as used in stats files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::ManagedRuntime => "managed-runtime",
        }
    }

    /// Returns all known languages.
    pub fn variants() -> [&'static str; 2] {
        ["native", "managed-runtime"]
    }
}

impl fmt::Display for TestLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "managed-runtime" => Ok(Self::ManagedRuntime),
            other => Err(format!(
                "unknown test language `{other}` (known values: {})",
                Self::variants().join(", ")
            )),
        }
    }
}

#[cfg(feature = "proptest1")]
impl proptest::arbitrary::Arbitrary for TestLanguage {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_: ()) -> Self::Strategy {
        use proptest::prelude::*;
        prop_oneof![Just(Self::Native), Just(Self::ManagedRuntime)].boxed()
    }
}

/// Timing and outcome information for a single test, as stored in a stats file.
///
/// Fields are declared in alphabetical order so that the serialized JSON has sorted keys.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TestStats {
    /// Wall-clock time taken by the test, in seconds.
    pub elapsed_time_sec: f64,

    /// The retained output capture of this test, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_output_path: Option<Utf8PathBuf>,

    /// The exit code of the test. Zero means success.
    pub exit_code: i32,

    /// The language of the test.
    pub language: TestLanguage,
}

/// A record of a single testfleet run, persisted as one JSON document per run.
///
/// Stats files are write-once: nothing ever appends to or mutates an existing record.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StatsRecord {
    /// Per-test stats, keyed by descriptor string.
    pub tests: BTreeMap<String, TestStats>,

    /// Total wall-clock time taken by the run, in seconds.
    pub total_elapsed_time_sec: f64,
}

impl StatsRecord {
    /// Serializes this record in the canonical on-disk format: sorted keys, 2-space indentation
    /// and a trailing newline.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Parses a record from its on-disk format.
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Returns the number of tests in this record that failed.
    pub fn failed_count(&self) -> usize {
        self.tests
            .values()
            .filter(|stats| stats.exit_code != 0)
            .count()
    }
}
