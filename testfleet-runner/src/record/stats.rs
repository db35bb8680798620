// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::StatsConfig,
    descriptor::TestDescriptor,
    errors::{StatsReadError, StatsWriteError},
    runner::TestResult,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use std::{io, io::Write, time::Duration};
use testfleet_metadata::StatsRecord;
use tracing::debug;

/// The placeholder used when the CI job or build ID is not known.
const UNKNOWN: &str = "unknown";

/// The timestamp format used in stats file names. It sorts lexicographically by time.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H_%M_%S";

/// Identifies where a run's stats are stored: the build type, the CI job and the CI build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatsKey {
    build_type: String,
    job_name: Option<String>,
    build_id: Option<String>,
    user: String,
}

impl StatsKey {
    /// Creates a new key. Empty job names and build IDs are treated as unknown.
    pub fn new(
        build_type: impl Into<String>,
        job_name: Option<String>,
        build_id: Option<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            build_type: build_type.into(),
            job_name: job_name.filter(|name| !name.is_empty()),
            build_id: build_id.filter(|id| !id.is_empty()),
            user: user.into(),
        }
    }

    /// Reads the CI job and build ID from the environment variables named in `config`, and the
    /// user from the operating system.
    pub fn from_env(build_type: impl Into<String>, config: &StatsConfig) -> Self {
        Self::new(
            build_type,
            std::env::var(&config.job_name_env_var).ok(),
            std::env::var(&config.build_id_env_var).ok(),
            whoami::username().unwrap_or_else(|_| UNKNOWN.to_owned()),
        )
    }

    /// Returns the build type.
    pub fn build_type(&self) -> &str {
        &self.build_type
    }

    /// Returns the directory component for the CI job: `job_<name>`, or `unknown_job`.
    pub fn job_component(&self) -> String {
        match &self.job_name {
            Some(name) => format!("job_{name}"),
            None => format!("{UNKNOWN}_job"),
        }
    }

    /// Returns the directory holding every stats file for this build type and job.
    pub fn dir(&self, stats_dir: &Utf8Path) -> Utf8PathBuf {
        stats_dir.join(&self.build_type).join(self.job_component())
    }

    /// Returns the file name of a stats record written at `timestamp`.
    pub fn file_name(&self, timestamp: DateTime<Local>) -> String {
        format!(
            "{}_{}__user_{}__build_{}.json",
            self.build_type,
            timestamp.format(TIMESTAMP_FORMAT),
            self.user,
            self.build_id.as_deref().unwrap_or(UNKNOWN),
        )
    }
}

/// Builds the stats record for a run from its results.
///
/// If a descriptor appears more than once, the last result wins.
pub fn build_stats_record(results: &[TestResult], total_elapsed: Duration) -> StatsRecord {
    StatsRecord {
        tests: results
            .iter()
            .map(|result| (result.descriptor.to_string(), result.to_stats()))
            .collect(),
        total_elapsed_time_sec: total_elapsed.as_secs_f64(),
    }
}

/// Writes stats records into a stats directory.
#[derive(Clone, Debug)]
pub struct StatsRecorder {
    stats_dir: Utf8PathBuf,
    key: StatsKey,
}

impl StatsRecorder {
    /// Creates a new recorder writing under `stats_dir`.
    pub fn new(stats_dir: impl Into<Utf8PathBuf>, key: StatsKey) -> Self {
        Self {
            stats_dir: stats_dir.into(),
            key,
        }
    }

    /// Returns the path a record written at `timestamp` is stored at.
    pub fn stats_file_path(&self, timestamp: DateTime<Local>) -> Utf8PathBuf {
        self.key
            .dir(&self.stats_dir)
            .join(self.key.file_name(timestamp))
    }

    /// Writes `record`, creating intermediate directories as needed.
    ///
    /// The file is written atomically. If a file already exists at the destination, it is left
    /// alone and [`StatsWriteError::AlreadyExists`] is returned.
    pub fn write(
        &self,
        record: &StatsRecord,
        timestamp: DateTime<Local>,
    ) -> Result<Utf8PathBuf, StatsWriteError> {
        let path = self.stats_file_path(timestamp);
        let dir = self.key.dir(&self.stats_dir);
        // create_dir_all is fine with another run creating the same directories concurrently.
        std::fs::create_dir_all(&dir).map_err(|error| StatsWriteError::CreateDir {
            dir: dir.clone(),
            error,
        })?;

        let contents = record.to_json_string().map_err(StatsWriteError::Serialize)?;
        AtomicFile::new(&path, OverwriteBehavior::DisallowOverwrite)
            .write(|file| file.write_all(contents.as_bytes()))
            .map_err(|error| {
                let error = match error {
                    atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error) => {
                        error
                    }
                };
                if error.kind() == io::ErrorKind::AlreadyExists {
                    StatsWriteError::AlreadyExists { path: path.clone() }
                } else {
                    StatsWriteError::Write {
                        path: path.clone(),
                        error,
                    }
                }
            })?;
        debug!("wrote stats record to `{path}`");
        Ok(path)
    }
}

/// A stats record read back from disk.
#[derive(Clone, Debug)]
pub struct HistoricalStats {
    /// The stats file.
    pub path: Utf8PathBuf,

    /// Its contents.
    pub record: StatsRecord,
}

/// A timing estimate for a set of tests, based on a [`HistoricalStats`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimingEstimate {
    /// The sum of recorded durations of the tests that have one.
    pub total: Duration,

    /// The number of tests with a recorded duration.
    pub known: usize,

    /// The number of tests without one.
    pub unknown: usize,
}

impl HistoricalStats {
    /// Estimates the total time taken by `descriptors` from their recorded durations.
    pub fn estimate<'a>(
        &self,
        descriptors: impl IntoIterator<Item = &'a TestDescriptor>,
    ) -> TimingEstimate {
        let mut estimate = TimingEstimate {
            total: Duration::ZERO,
            known: 0,
            unknown: 0,
        };
        for descriptor in descriptors {
            match self.record.tests.get(descriptor.as_str()) {
                Some(stats) => {
                    estimate.known += 1;
                    estimate.total += Duration::try_from_secs_f64(stats.elapsed_time_sec)
                        .unwrap_or(Duration::ZERO);
                }
                None => estimate.unknown += 1,
            }
        }
        estimate
    }
}

/// Reads stats records from a stats directory.
#[derive(Clone, Debug)]
pub struct StatsStore {
    stats_dir: Utf8PathBuf,
}

impl StatsStore {
    /// Creates a new store reading from `stats_dir`.
    pub fn new(stats_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            stats_dir: stats_dir.into(),
        }
    }

    /// Reads the most recent record for the build type and job in `key`.
    ///
    /// Returns `Ok(None)` if there are no records yet.
    pub fn latest(&self, key: &StatsKey) -> Result<Option<HistoricalStats>, StatsReadError> {
        let dir = key.dir(&self.stats_dir);
        let entries = match dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StatsReadError::Read { path: dir, error }),
        };

        let prefix = format!("{}_", key.build_type());
        let mut latest: Option<String> = None;
        for entry in entries {
            let entry = entry.map_err(|error| StatsReadError::Read {
                path: dir.clone(),
                error,
            })?;
            let name = entry.file_name();
            if !(name.starts_with(&prefix) && name.ends_with(".json")) {
                continue;
            }
            if latest.as_deref().is_none_or(|latest| name > latest) {
                latest = Some(name.to_owned());
            }
        }

        let Some(name) = latest else {
            return Ok(None);
        };
        let path = dir.join(name);
        let contents = std::fs::read_to_string(&path).map_err(|error| StatsReadError::Read {
            path: path.clone(),
            error,
        })?;
        let record = StatsRecord::from_json_str(&contents).map_err(|error| {
            StatsReadError::Parse {
                path: path.clone(),
                error,
            }
        })?;
        debug!("read stats record from `{path}`");
        Ok(Some(HistoricalStats { path, record }))
    }
}
