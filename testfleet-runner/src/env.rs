// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Environment propagation from the controller to tests.
//!
//! The controller snapshots an allow-list of variables once. Workers never modify their own
//! process environment: the snapshot is applied explicitly to every child command they spawn.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ffi::OsString};
use tracing::{debug, warn};

/// A snapshot of the environment variables forwarded to every test.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PropagatedEnv {
    vars: BTreeMap<String, String>,
}

impl PropagatedEnv {
    /// Captures the named variables, plus every variable whose name starts with `prefix`, from
    /// the current process environment.
    pub fn capture(names: &[String], prefix: &str) -> Self {
        Self::capture_from(std::env::vars_os(), names, prefix)
    }

    /// Captures variables from the given iterator of `(name, value)` pairs.
    ///
    /// Matching variables whose name or value is not valid UTF-8 are skipped with a warning.
    /// Other variables are never inspected beyond their name.
    pub fn capture_from<K, V>(
        vars: impl IntoIterator<Item = (K, V)>,
        names: &[String],
        prefix: &str,
    ) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let has_prefix = |name: &[u8]| !prefix.is_empty() && name.starts_with(prefix.as_bytes());

        let mut captured = BTreeMap::new();
        for (name, value) in vars {
            let (name, value) = (name.into(), value.into());
            let propagated = match name.to_str() {
                Some(name) => names.iter().any(|n| n == name) || has_prefix(name.as_bytes()),
                None => has_prefix(name.as_encoded_bytes()),
            };
            if !propagated {
                continue;
            }
            match (name.to_str(), value.to_str()) {
                (Some(name), Some(value)) => {
                    captured.insert(name.to_owned(), value.to_owned());
                }
                _ => warn!(
                    "not propagating environment variable `{}`: it is not valid UTF-8",
                    name.to_string_lossy()
                ),
            }
        }
        debug!(
            "propagating environment variables: {}",
            itertools::join(captured.keys(), ", ")
        );
        Self { vars: captured }
    }

    /// Creates a snapshot from an existing map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns the captured value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Returns the underlying map.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Applies the captured variables to a command.
    pub fn apply(&self, mut expression: duct::Expression) -> duct::Expression {
        for (name, value) in &self.vars {
            expression = expression.env(name, value);
        }
        expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    #[test]
    fn capture_allow_list_and_prefix() {
        let vars = vec![
            ("BUILD_ID".to_owned(), "1234".to_owned()),
            ("HOME".to_owned(), "/home/fleet".to_owned()),
            ("JOB_NAME".to_owned(), "nightly".to_owned()),
            ("TESTFLEET_FOO".to_owned(), "bar".to_owned()),
            ("XTESTFLEET_FOO".to_owned(), "ignored".to_owned()),
        ];
        let names = vec![
            "BUILD_ID".to_owned(),
            "BUILD_URL".to_owned(),
            "JOB_NAME".to_owned(),
        ];
        let env = PropagatedEnv::capture_from(vars, &names, "TESTFLEET_");
        assert_eq!(
            env.as_map(),
            &btreemap! {
                "BUILD_ID".to_owned() => "1234".to_owned(),
                "JOB_NAME".to_owned() => "nightly".to_owned(),
                "TESTFLEET_FOO".to_owned() => "bar".to_owned(),
            }
        );
        assert_eq!(env.get("BUILD_URL"), None);
    }

    #[test]
    fn empty_prefix_matches_nothing() {
        let vars = vec![("PATH".to_owned(), "/bin".to_owned())];
        let env = PropagatedEnv::capture_from(vars, &[], "");
        assert_eq!(env, PropagatedEnv::default());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_entries_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        fn bytes(b: &[u8]) -> OsString {
            OsString::from_vec(b.to_vec())
        }

        let vars = vec![
            (OsString::from("UNRELATED_BYTES"), bytes(b"\xff\xfe")),
            (OsString::from("BUILD_ID"), OsString::from("1234")),
            (OsString::from("JOB_NAME"), bytes(b"night\xffly")),
            (bytes(b"TESTFLEET_\xff"), OsString::from("x")),
            (OsString::from("TESTFLEET_FOO"), OsString::from("bar")),
        ];
        let names = vec!["BUILD_ID".to_owned(), "JOB_NAME".to_owned()];
        let env = PropagatedEnv::capture_from(vars, &names, "TESTFLEET_");
        assert_eq!(
            env.as_map(),
            &btreemap! {
                "BUILD_ID".to_owned() => "1234".to_owned(),
                "TESTFLEET_FOO".to_owned() => "bar".to_owned(),
            }
        );
    }

    #[test]
    fn serializes_as_plain_map() {
        let env = PropagatedEnv::from_map(btreemap! {
            "BUILD_ID".to_owned() => "1234".to_owned(),
        });
        assert_eq!(
            serde_json::to_string(&env).unwrap(),
            r#"{"BUILD_ID":"1234"}"#
        );
    }
}
