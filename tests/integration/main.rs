//! Integration tests for Strata

mod build_cache;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn strata() -> Command {
        let mut cmd = cargo_bin_cmd!("strata");
        cmd.env_remove("STRATA_CONFIG").env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn help_displays() {
        strata()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("incremental OCI image builder"));
    }

    #[test]
    fn version_displays() {
        strata()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("strata"));
    }

    #[test]
    fn build_help_lists_flags() {
        strata()
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--substitute"))
            .stdout(predicate::str::contains("--on-run-failure"))
            .stdout(predicate::str::contains("--leave-unladen"));
    }

    #[test]
    fn config_path() {
        strata()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        strata()
            .args(["--config", path.to_str().unwrap(), "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        strata()
            .current_dir(temp.path())
            .args(["--no-local", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[paths]"))
            .stdout(predicate::str::contains("[storage]"));
    }

    #[test]
    fn config_set_local_then_show() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global.toml");
        strata()
            .current_dir(temp.path())
            .args(["--config", global.to_str().unwrap()])
            .args(["config", "set", "--local", "storage.backend", "btrfs"])
            .assert()
            .success();
        assert!(temp.path().join(".strata.toml").exists());

        strata()
            .current_dir(temp.path())
            .args(["--config", global.to_str().unwrap(), "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("backend = \"btrfs\""));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global.toml");
        strata()
            .current_dir(temp.path())
            .args(["--config", global.to_str().unwrap()])
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn build_missing_stackfile_fails() {
        let temp = TempDir::new().unwrap();
        strata()
            .current_dir(temp.path())
            .args(["--no-local", "build", "-f", "missing.yaml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"))
            .stderr(predicate::str::contains("missing.yaml"));
    }

    #[test]
    fn build_invalid_stackfile_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("strata.yaml"),
            "base:\n  from:\n    type: nope\n",
        )
        .unwrap();
        strata()
            .current_dir(temp.path())
            .args(["--no-local", "build"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown from type"));
    }

    #[test]
    fn build_cycle_fails_before_building() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("strata.yaml"),
            "a:\n  from:\n    type: built\n    tag: b\nb:\n  from:\n    type: built\n    tag: a\n",
        )
        .unwrap();
        strata()
            .current_dir(temp.path())
            .args(["--no-local", "build"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cycle"));
        assert!(!temp.path().join("oci").exists());
    }

    #[test]
    fn inspect_without_layout() {
        let temp = TempDir::new().unwrap();
        strata()
            .current_dir(temp.path())
            .args(["--no-local", "inspect"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No OCI layout"));
    }

    #[test]
    fn clean_with_nothing_to_do() {
        let temp = TempDir::new().unwrap();
        strata()
            .current_dir(temp.path())
            .args(["--no-local", "clean", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to clean"));
    }

    #[test]
    fn status_runs() {
        // Tools may be missing on the test host; the command still reports
        let temp = TempDir::new().unwrap();
        strata()
            .current_dir(temp.path())
            .args(["--no-local", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Strata System Status"));
    }
}
