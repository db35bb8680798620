// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use indoc::indoc;
use std::{fmt, os::unix::fs::PermissionsExt, process::Output};

pub(crate) const FAILING_CASE: &str = "tests-util/split_args-test:::TestSplitArgs.Fails";
pub(crate) const PASSING_CASE: &str = "tests-util/split_args-test:::TestSplitArgs.Simple";
pub(crate) const ONE_SHOT_TEST: &str = "tests-rocksdb/merge_test";
pub(crate) const MANAGED_TEST: &str = "fleet-client/src/test/java/org/example/TestClient.java";

const CONFIG: &str = indoc! {r#"
    [discovery]
    program-list-command = "sh list-programs.sh"
    managed-source-roots = ["java"]

    [dispatch]
    max-task-failures = 2
    propagated-env-vars = []

    [execution]
    clock-sync-command = ""

    [driver]
    sleep-after-tests = "10ms"
"#};

const LIST_PROGRAMS: &str = indoc! {r#"
    #!/bin/sh
    root=$(pwd -P)
    echo "1: ctest test: \"$root/tests-util/split_args-test\""
    echo "2: ctest test: \"$root/tests-rocksdb/merge_test\""
"#};

const SPLIT_ARGS_TEST: &str = indoc! {r#"
    #!/bin/sh
    if [ "$1" = "--gtest_list_tests" ]; then
      echo "TestSplitArgs."
      echo "  Simple"
      echo "  Fails"
    fi
    exit 0
"#};

const RUN_TEST: &str = indoc! {r#"
    #!/bin/sh
    case "$2" in
      *.Fails) echo "boom"; exit 3 ;;
    esac
    exit 0
"#};

/// A source tree at `<tempdir>/src` with a build root at `src/build/debug-fake`.
pub(crate) struct FakeSourceTree {
    dir: Utf8TempDir,
}

impl FakeSourceTree {
    pub(crate) fn new() -> Self {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let tree = Self { dir };
        let src_root = tree.src_root();
        let build_root = tree.build_root();

        write_file(&src_root.join(".config/testfleet.toml"), CONFIG, false);
        write_file(&src_root.join("build-support/run-test.sh"), RUN_TEST, true);
        write_file(&src_root.join("java").join(MANAGED_TEST), "", false);
        write_file(&build_root.join("list-programs.sh"), LIST_PROGRAMS, false);
        write_file(
            &build_root.join("tests-util/split_args-test"),
            SPLIT_ARGS_TEST,
            true,
        );
        write_file(&build_root.join(ONE_SHOT_TEST), "#!/bin/sh\nexit 0\n", true);
        tree
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn src_root(&self) -> Utf8PathBuf {
        self.path().join("src")
    }

    pub(crate) fn build_root(&self) -> Utf8PathBuf {
        self.src_root().join("build/debug-fake")
    }

    /// Returns a command line for this tree, with `--build-root` already set.
    pub(crate) fn cli(&self, subcommand: &str) -> TestfleetCli {
        let mut cli = TestfleetCli::new();
        cli.args([subcommand, "--build-root", self.build_root().as_str()]);
        cli
    }
}

pub(crate) struct TestfleetCli {
    bin: Utf8PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl TestfleetCli {
    pub(crate) fn new() -> Self {
        Self {
            bin: env!("CARGO_BIN_EXE_testfleet").into(),
            args: vec!["--color".to_owned(), "never".to_owned()],
            envs: Vec::new(),
        }
    }

    pub(crate) fn args(&mut self, args: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub(crate) fn output(&self) -> TestfleetOutput {
        let mut expression = duct::cmd(self.bin.as_std_path(), &self.args)
            .env_remove("TESTFLEET_LOG")
            .env_remove("TESTFLEET_VERBOSE")
            .env_remove("TESTFLEET_TEST_THREADS")
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        for (key, value) in &self.envs {
            expression = expression.env(key, value);
        }
        let output = expression.run().expect("testfleet was spawned");
        TestfleetOutput {
            args: self.args.join(" "),
            output,
        }
    }
}

pub(crate) struct TestfleetOutput {
    args: String,
    output: Output,
}

impl TestfleetOutput {
    pub(crate) fn exit_code(&self) -> Option<i32> {
        self.output.status.code()
    }

    pub(crate) fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub(crate) fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }
}

impl fmt::Display for TestfleetOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "testfleet {}\n--- exit code: {:?}\n--- stdout:\n{}\n--- stderr:\n{}",
            self.args,
            self.exit_code(),
            self.stdout(),
            self.stderr(),
        )
    }
}

fn write_file(path: &Utf8Path, contents: &str, executable: bool) {
    let parent = path.parent().expect("path has a parent");
    std::fs::create_dir_all(parent).expect("parent created");
    std::fs::write(path, contents).expect("file written");
    if executable {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .expect("permissions set");
    }
}
