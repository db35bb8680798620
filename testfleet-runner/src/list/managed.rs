// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{descriptor::TestDescriptor, errors::DiscoveryError};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

static MANAGED_TEST_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+/src/test/(java|scala)/[A-Za-z0-9_/.$-]+\.(java|scala)$")
        .expect("managed test path regex is valid")
});

const MANAGED_EXTENSIONS: &[&str] = &[".java", ".scala"];

/// Finds managed-runtime test classes under each of `roots`, relative to `src_root`.
///
/// Roots that don't exist are skipped. Each descriptor's path is relative to the root it was
/// found under.
pub fn discover_managed_tests(
    src_root: &Utf8Path,
    roots: &[Utf8PathBuf],
) -> Result<Vec<TestDescriptor>, DiscoveryError> {
    let mut descriptors = Vec::new();
    for root in roots {
        let root = src_root.join(root);
        if !root.is_dir() {
            debug!("managed-runtime source root `{root}` does not exist, skipping");
            continue;
        }
        descriptors.extend(walk_root(&root)?);
    }
    Ok(descriptors)
}

fn walk_root(root: &Utf8Path) -> Result<Vec<TestDescriptor>, DiscoveryError> {
    let mut descriptors = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|error| DiscoveryError::ManagedWalk {
            root: root.to_owned(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8Path::from_path(entry.path()).ok_or_else(|| {
            DiscoveryError::NonUtf8Path {
                root: root.to_owned(),
                path: entry.path().to_owned(),
            }
        })?;
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if !is_managed_test_file(relative) {
            continue;
        }

        if !MANAGED_TEST_PATH_RE.is_match(relative.as_str()) {
            warn!("skipping managed-runtime test with unexpected path `{relative}` under `{root}`");
            continue;
        }
        match TestDescriptor::new(relative, None) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(error) => warn!("skipping managed-runtime test: {error}"),
        }
    }
    debug!(
        "found {} managed-runtime tests under `{root}`",
        descriptors.len()
    );
    Ok(descriptors)
}

/// Returns true if `relative` names a test class inside a `src/test` tree.
fn is_managed_test_file(relative: &Utf8Path) -> bool {
    let Some(file_name) = relative.file_name() else {
        return false;
    };
    let Some(stem) = MANAGED_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
    else {
        return false;
    };
    if !(stem.starts_with("Test") || stem.ends_with("Test")) {
        return false;
    }
    let dir = match relative.parent() {
        Some(parent) => format!("/{parent}/"),
        None => return false,
    };
    dir.contains("/src/test/")
}
