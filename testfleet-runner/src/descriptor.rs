// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical identity for a single runnable unit of work.
//!
//! A [`TestDescriptor`] names one test case: a whole one-shot test program, a single case within
//! a gtest-style program, or a managed-runtime test class, optionally tagged with an attempt
//! index. Its string form is the currency of the whole system: it is what test listings produce,
//! what saved test lists contain, what is shipped to workers, and what stats files are keyed by.
//!
//! The string form is `path[:::case_name][:::attempt_N]`. The attempt suffix is only emitted for
//! attempts after the first.

use crate::errors::DescriptorParseError;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    num::NonZeroU32,
    str::FromStr,
};
use testfleet_metadata::TestLanguage;

/// Separates the path, the case name and the attempt suffix within a descriptor string.
pub const TEST_DESCRIPTOR_SEPARATOR: &str = ":::";

/// Introduces the attempt index within the last component of a descriptor string.
pub const ATTEMPT_PREFIX: &str = "attempt_";

/// File extensions that mark a path as a managed-runtime test class.
pub const MANAGED_RUNTIME_EXTENSIONS: &[&str] = &["java", "scala"];

/// Uniquely identifies one runnable test case.
///
/// Descriptors are immutable value objects. Equality, hashing and ordering are all defined on
/// the canonical string form, which is guaranteed to round-trip through [`TestDescriptor::parse`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestDescriptor {
    language: TestLanguage,
    path: Utf8PathBuf,
    case_name: Option<String>,
    attempt_index: NonZeroU32,
    descriptor_str: String,
}

impl TestDescriptor {
    /// Creates a descriptor for the first attempt of the given test.
    ///
    /// `case_name` is the inner test case within a program, if any.
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        case_name: Option<String>,
    ) -> Result<Self, DescriptorParseError> {
        Self::from_parts(path.into(), case_name, NonZeroU32::MIN)
    }

    /// Parses a descriptor from its canonical string form.
    pub fn parse(input: &str) -> Result<Self, DescriptorParseError> {
        let (rest, attempt_index) = split_attempt_suffix(input)?;
        let (path, case_name) = match rest.split_once(TEST_DESCRIPTOR_SEPARATOR) {
            Some((path, case_name)) => (path, Some(case_name.to_owned())),
            None => (rest, None),
        };
        Self::from_parts(path.into(), case_name, attempt_index)
            .map_err(|err| err.with_input(input))
    }

    /// Returns a copy of this descriptor with a different attempt index.
    pub fn with_attempt_index(&self, attempt_index: NonZeroU32) -> Self {
        let descriptor_str = serialize(&self.path, self.case_name.as_deref(), attempt_index);
        Self {
            language: self.language,
            path: self.path.clone(),
            case_name: self.case_name.clone(),
            attempt_index,
            descriptor_str,
        }
    }

    /// Returns the language of this test.
    pub fn language(&self) -> TestLanguage {
        self.language
    }

    /// Returns the path of the test program or test class.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the inner test case name, if this is a single case within a program.
    pub fn case_name(&self) -> Option<&str> {
        self.case_name.as_deref()
    }

    /// Returns the attempt index, starting from 1.
    pub fn attempt_index(&self) -> NonZeroU32 {
        self.attempt_index
    }

    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.descriptor_str
    }

    /// Returns the positional arguments passed to the single-test entry point.
    pub fn args_for_run_test(&self) -> Vec<&str> {
        let mut args = vec![self.path.as_str()];
        if let Some(case_name) = &self.case_name {
            args.push(case_name);
        }
        args
    }

    /// Returns the path that this test's combined output is captured to, within `log_dir`.
    ///
    /// The path mirrors the test's own path, with the case name and attempt folded into the file
    /// name, so it is unique per descriptor within a run.
    pub fn error_output_path(&self, log_dir: &Utf8Path) -> Utf8PathBuf {
        let mut out = log_dir.to_owned();
        let mut file_name = String::new();
        for component in self.path.components() {
            match component {
                Utf8Component::Normal(name) => {
                    if !file_name.is_empty() {
                        out.push(&file_name);
                    }
                    file_name = name.to_owned();
                }
                Utf8Component::ParentDir => {
                    if !file_name.is_empty() {
                        out.push(&file_name);
                    }
                    file_name = "__up".to_owned();
                }
                Utf8Component::CurDir | Utf8Component::RootDir | Utf8Component::Prefix(_) => {}
            }
        }

        if let Some(case_name) = &self.case_name {
            file_name.push_str("__");
            file_name.push_str(&case_name.replace('/', "_"));
        }
        if self.attempt_index.get() > 1 {
            file_name.push_str("__");
            file_name.push_str(ATTEMPT_PREFIX);
            file_name.push_str(&self.attempt_index.to_string());
        }
        file_name.push_str(".log");
        out.push(file_name);
        out
    }

    // ---
    // Helper methods
    // ---

    fn from_parts(
        path: Utf8PathBuf,
        case_name: Option<String>,
        attempt_index: NonZeroU32,
    ) -> Result<Self, DescriptorParseError> {
        validate_path(path.as_str())?;
        let language = language_for_path(&path);
        if let Some(case_name) = &case_name {
            validate_case_name(case_name)?;
            if language == TestLanguage::ManagedRuntime {
                return Err(DescriptorParseError::new(
                    path.as_str(),
                    "managed-runtime test classes cannot have a case name",
                ));
            }
        }

        let descriptor_str = serialize(&path, case_name.as_deref(), attempt_index);
        Ok(Self {
            language,
            path,
            case_name,
            attempt_index,
            descriptor_str,
        })
    }
}

impl fmt::Display for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor_str)
    }
}

impl FromStr for TestDescriptor {
    type Err = DescriptorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TestDescriptor {
    type Error = DescriptorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TestDescriptor> for String {
    fn from(descriptor: TestDescriptor) -> Self {
        descriptor.descriptor_str
    }
}

impl PartialEq for TestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor_str == other.descriptor_str
    }
}

impl Eq for TestDescriptor {}

impl Hash for TestDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.descriptor_str.hash(state);
    }
}

impl PartialOrd for TestDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TestDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.descriptor_str.cmp(&other.descriptor_str)
    }
}

/// Returns the language implied by a test path.
pub fn language_for_path(path: &Utf8Path) -> TestLanguage {
    match path.extension() {
        Some(ext) if MANAGED_RUNTIME_EXTENSIONS.contains(&ext) => TestLanguage::ManagedRuntime,
        _ => TestLanguage::Native,
    }
}

fn serialize(path: &Utf8Path, case_name: Option<&str>, attempt_index: NonZeroU32) -> String {
    let mut out = path.as_str().to_owned();
    if let Some(case_name) = case_name {
        out.push_str(TEST_DESCRIPTOR_SEPARATOR);
        out.push_str(case_name);
    }
    if attempt_index.get() > 1 {
        out.push_str(TEST_DESCRIPTOR_SEPARATOR);
        out.push_str(ATTEMPT_PREFIX);
        out.push_str(&attempt_index.to_string());
    }
    out
}

fn split_attempt_suffix(input: &str) -> Result<(&str, NonZeroU32), DescriptorParseError> {
    if let Some((rest, last)) = input.rsplit_once(TEST_DESCRIPTOR_SEPARATOR) {
        if let Some(index) = last.strip_prefix(ATTEMPT_PREFIX) {
            let attempt_index = index.parse::<NonZeroU32>().map_err(|_| {
                DescriptorParseError::new(
                    input,
                    format!("attempt index `{index}` is not a positive integer"),
                )
            })?;
            return Ok((rest, attempt_index));
        }
    }
    Ok((input, NonZeroU32::MIN))
}

fn validate_path(path: &str) -> Result<(), DescriptorParseError> {
    let reason = if path.is_empty() {
        "path is empty"
    } else if path.contains(TEST_DESCRIPTOR_SEPARATOR) {
        "path contains the reserved separator `:::`"
    } else if path.contains(['\n', '\r']) {
        "path contains a line break"
    } else if path.ends_with(':') {
        "path ends with `:`"
    } else if path.trim() != path {
        "path has leading or trailing whitespace"
    } else {
        return Ok(());
    };
    Err(DescriptorParseError::new(path, reason))
}

fn validate_case_name(case_name: &str) -> Result<(), DescriptorParseError> {
    let reason = if case_name.is_empty() {
        "case name is empty"
    } else if case_name.contains(TEST_DESCRIPTOR_SEPARATOR) {
        "case name contains the reserved separator `:::`"
    } else if case_name.contains(['\n', '\r', '#']) {
        "case name contains a line break or `#`"
    } else if case_name.starts_with(':') || case_name.ends_with(':') {
        "case name starts or ends with `:`"
    } else if case_name.starts_with(ATTEMPT_PREFIX) {
        "case name starts with the reserved prefix `attempt_`"
    } else if case_name.trim() != case_name {
        "case name has leading or trailing whitespace"
    } else {
        return Ok(());
    };
    Err(DescriptorParseError::new(case_name, reason))
}
