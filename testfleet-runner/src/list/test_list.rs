// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    descriptor::TestDescriptor,
    errors::{TestListReadError, WriteTestListError},
    helpers::plural,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::Utf8Path;
use std::{collections::HashSet, io::Write, num::NonZeroU32};
use tracing::warn;

/// Loads a saved test list: one descriptor per line.
///
/// Surrounding whitespace is trimmed and blank lines are ignored. Every other line must be a
/// valid descriptor.
pub fn load_test_list(path: &Utf8Path) -> Result<Vec<TestDescriptor>, TestListReadError> {
    let contents = std::fs::read_to_string(path).map_err(|error| TestListReadError::Read {
        path: path.to_owned(),
        error,
    })?;
    parse_test_list(path, &contents)
}

fn parse_test_list(
    path: &Utf8Path,
    contents: &str,
) -> Result<Vec<TestDescriptor>, TestListReadError> {
    contents
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(line_number, line)| {
            TestDescriptor::parse(line).map_err(|error| TestListReadError::Parse {
                path: path.to_owned(),
                line_number,
                error,
            })
        })
        .collect()
}

/// Resets every attempt index to 1, then drops duplicates, keeping the first occurrence.
///
/// Saved lists may hold several attempts of one test (the failed list of a repeated run does).
/// Repetitions are expanded after loading, so every test must appear exactly once here.
pub fn collapse_attempts(descriptors: Vec<TestDescriptor>) -> Vec<TestDescriptor> {
    let before = descriptors.len();
    let mut seen = HashSet::new();
    let collapsed: Vec<_> = descriptors
        .into_iter()
        .map(|descriptor| {
            if descriptor.attempt_index() == NonZeroU32::MIN {
                descriptor
            } else {
                descriptor.with_attempt_index(NonZeroU32::MIN)
            }
        })
        .filter(|descriptor| seen.insert(descriptor.as_str().to_owned()))
        .collect();

    let removed = before - collapsed.len();
    if removed > 0 {
        warn!(
            "test list has {removed} duplicate {} once attempts are ignored, running each test once",
            plural::tests_str(removed)
        );
    }
    collapsed
}

/// Formats descriptors in saved-list format: newline-joined, with a trailing newline.
pub fn format_test_list<'a>(descriptors: impl IntoIterator<Item = &'a TestDescriptor>) -> String {
    let mut out = String::new();
    for descriptor in descriptors {
        out.push_str(descriptor.as_str());
        out.push('\n');
    }
    out
}

/// Atomically writes descriptors to `path` in saved-list format, replacing any existing file.
pub fn write_test_list<'a>(
    path: &Utf8Path,
    descriptors: impl IntoIterator<Item = &'a TestDescriptor>,
) -> Result<(), WriteTestListError> {
    let contents = format_test_list(descriptors);
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(contents.as_bytes()))
        .map_err(|error| {
            let error = match error {
                atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error) => error,
            };
            WriteTestListError::new(path, error)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_trims_and_skips_blank_lines() {
        let contents = indoc! {"
            fleet-client/src/test/java/org/example/TestClient.java

              tests-util/split_args-test:::TestSplitArgs.Simple
            tests-rocksdb/merge_test:::attempt_2
        "};
        let descriptors =
            parse_test_list(Utf8Path::new("list.txt"), contents).expect("list is valid");
        let descriptors: Vec<_> = descriptors.iter().map(|d| d.as_str()).collect();
        assert_eq!(
            descriptors,
            vec![
                "fleet-client/src/test/java/org/example/TestClient.java",
                "tests-util/split_args-test:::TestSplitArgs.Simple",
                "tests-rocksdb/merge_test:::attempt_2",
            ]
        );
    }

    #[test]
    fn load_reports_line_number() {
        let contents = "bin/a-test:::A.One\n\nbin/b-test:::\n";
        let error = parse_test_list(Utf8Path::new("list.txt"), contents)
            .expect_err("third line is invalid");
        match error {
            TestListReadError::Parse { line_number, .. } => assert_eq!(line_number, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn write_then_load() {
        let dir = tempdir().expect("tempdir created");
        let path = dir.path().join("failed.txt");
        let descriptors = vec![
            TestDescriptor::parse("bin/a-test:::A.One").unwrap(),
            TestDescriptor::parse("bin/b-test:::attempt_3").unwrap(),
        ];
        write_test_list(&path, &descriptors).expect("write succeeds");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "bin/a-test:::A.One\nbin/b-test:::attempt_3\n"
        );
        assert_eq!(load_test_list(&path).expect("load succeeds"), descriptors);

        // Writing again replaces the file.
        write_test_list(&path, &descriptors[..1]).expect("overwrite succeeds");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "bin/a-test:::A.One\n"
        );
    }

    #[test]
    fn collapse_attempts_of_repeated_failures() {
        let contents = indoc! {"
            bin/a:::A.B
            bin/a:::A.B:::attempt_2
            bin/c:::attempt_3
            bin/a:::A.C
            bin/a:::A.B
        "};
        let descriptors =
            parse_test_list(Utf8Path::new("failed.txt"), contents).expect("list is valid");
        let collapsed = collapse_attempts(descriptors);
        let collapsed: Vec<_> = collapsed.iter().map(|d| d.as_str()).collect();
        assert_eq!(collapsed, vec!["bin/a:::A.B", "bin/c", "bin/a:::A.C"]);
    }

    #[test]
    fn empty_list() {
        assert_eq!(format_test_list([]), "");
    }
}
