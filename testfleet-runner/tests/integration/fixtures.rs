// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use maplit::btreemap;
use std::{num::NonZeroUsize, os::unix::fs::PermissionsExt};
use testfleet_runner::{
    config::{BuildRoots, FleetConfig, RunConfig},
    descriptor::TestDescriptor,
    dispatch::LocalSubstrate,
    env::PropagatedEnv,
};

pub(crate) const MANAGED_TEST: &str = "fleet-client/src/test/java/org/example/TestClient.java";
pub(crate) const ONE_SHOT_TEST: &str = "tests-rocksdb/merge_test";
pub(crate) const FAILING_CASE: &str = "tests-util/split_args-test:::TestSplitArgs.Fails";
pub(crate) const PASSING_CASE: &str = "tests-util/split_args-test:::TestSplitArgs.Simple";

const CONFIG: &str = r#"
[discovery]
program-list-command = "sh list-programs.sh"
managed-source-roots = ["java"]

[execution]
clock-sync-command = ""
"#;

const LIST_PROGRAMS: &str = r#"#!/bin/sh
[ "$TESTFLEET_LIST_CTEST_TESTS_ONLY" = 1 ] || exit 9
root=$(pwd -P)
echo "UpdateCTestConfiguration  from :$root/DartConfiguration.tcl"
echo "1: ctest test: \"$root/tests-util/split_args-test\""
echo "2: ctest test: \"$root/tests-rocksdb/merge_test\""
echo "3: ctest test: \"$root/tests-docdb/broken-test\""
echo "Test project $root"
"#;

const SPLIT_ARGS_TEST: &str = r#"#!/bin/sh
if [ "$1" = "--gtest_list_tests" ]; then
  echo "Starting tracking the heap"
  echo "TestSplitArgs."
  echo "  Simple"
  echo "  Fails"
fi
exit 0
"#;

const BROKEN_TEST: &str = "#!/bin/sh\necho 'cannot list tests' >&2\nexit 1\n";

const MERGE_TEST: &str = "#!/bin/sh\nexit 0\n";

const RUN_TEST: &str = r#"#!/bin/sh
case "$2" in
  *.Fails)
    echo "boom attempt=$TESTFLEET_TEST_ATTEMPT_INDEX build_type=$build_type fixture=$TESTFLEET_FIXTURE"
    exit 3
    ;;
esac
exit 0
"#;

/// A source tree with a build root, a fake program-listing command, fake test programs and a
/// fake single-test entry point.
pub(crate) struct FakeSourceTree {
    dir: Utf8TempDir,
    pub(crate) config: FleetConfig,
    pub(crate) run_config: RunConfig,
    pub(crate) env: PropagatedEnv,
}

impl FakeSourceTree {
    pub(crate) fn new() -> Self {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let src_root = dir.path().join("src");
        let build_root = src_root.join("build/debug-fake");

        write_file(&src_root.join(".config/testfleet.toml"), CONFIG, false);
        write_file(&src_root.join("build-support/run-test.sh"), RUN_TEST, true);
        write_file(&src_root.join("java").join(MANAGED_TEST), "", false);
        write_file(
            &src_root.join("java/fleet-client/src/main/java/org/example/Client.java"),
            "",
            false,
        );
        write_file(&build_root.join("list-programs.sh"), LIST_PROGRAMS, false);
        write_file(
            &build_root.join("tests-util/split_args-test"),
            SPLIT_ARGS_TEST,
            true,
        );
        write_file(&build_root.join(ONE_SHOT_TEST), MERGE_TEST, true);
        write_file(&build_root.join("tests-docdb/broken-test"), BROKEN_TEST, true);

        let config = FleetConfig::from_sources(&src_root, None).expect("config is valid");
        let roots = BuildRoots::resolve(&build_root, None).expect("roots resolve");
        let run_config = RunConfig::new(&roots, None, config.execution());
        let env = PropagatedEnv::from_map(btreemap! {
            "TESTFLEET_FIXTURE".to_owned() => "propagated".to_owned(),
        });

        Self {
            dir,
            config,
            run_config,
            env,
        }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// Loads a config file with the given contents instead of `.config/testfleet.toml`.
    pub(crate) fn load_config(&self, contents: &str) -> FleetConfig {
        let path = self.path().join("custom-config.toml");
        write_file(&path, contents, false);
        FleetConfig::from_sources(self.run_config.src_root(), Some(&path))
            .expect("custom config is valid")
    }

    pub(crate) fn local_substrate(&self) -> LocalSubstrate {
        LocalSubstrate::new(4, self.config.dispatch().max_task_failures)
            .expect("local substrate created")
    }
}

pub(crate) fn descriptors(strs: &[&str]) -> Vec<TestDescriptor> {
    strs.iter()
        .map(|s| TestDescriptor::parse(s).expect("valid descriptor"))
        .collect()
}

pub(crate) fn descriptor_strs(descriptors: &[TestDescriptor]) -> Vec<&str> {
    descriptors.iter().map(|d| d.as_str()).collect()
}

pub(crate) fn max_task_failures(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).expect("non-zero")
}

fn write_file(path: &Utf8Path, contents: &str, executable: bool) {
    let parent: Utf8PathBuf = path.parent().expect("path has a parent").to_owned();
    std::fs::create_dir_all(&parent).expect("parent created");
    std::fs::write(path, contents).expect("file written");
    if executable {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .expect("permissions set");
    }
}
