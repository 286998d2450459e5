//! Integration tests for lifecache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Command isolated from any user configuration
    fn lifecache(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("lifecache");
        cmd.env("LIFECACHE_CONFIG", dir.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Lazily-resolved entity cache"))
            .stdout(predicate::str::contains("simulate"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lifecache"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[entity]"))
            .stdout(predicate::str::contains("initial_life = 10.0"));
    }

    #[test]
    fn config_init_then_set() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir).args(["config", "init"]).assert().success();
        assert!(dir.path().join("config.toml").exists());

        lifecache(&dir)
            .args(["config", "set", "entity.keep", "true"])
            .assert()
            .success();
        lifecache(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("keep = true"));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir)
            .args(["config", "set", "entity.colour", "red"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[entity]\nlife_unit_ms = 0\n").unwrap();

        lifecache(&dir)
            .arg("simulate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("life_unit_ms"))
            .stderr(predicate::str::contains("config init --force"));
    }

    #[test]
    fn simulate_plain_trace() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir)
            .args(["simulate", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("0.00 a ready"))
            .stdout(predicate::str::contains("10.00 a afterRelease"))
            .stdout(predicate::str::contains("alive").not());
    }

    #[test]
    fn simulate_json_with_keep() {
        let dir = TempDir::new().unwrap();
        let output = lifecache(&dir)
            .args(["simulate", "--keep", "--advance", "30", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["elapsed"], 30.0);
        assert_eq!(report["survivors"][0]["key"], "a");
        assert_eq!(report["survivors"][0]["life"], 62.5);
    }

    #[test]
    fn simulate_table_lists_survivors() {
        let dir = TempDir::new().unwrap();
        lifecache(&dir)
            .args(["simulate", "-k", "x", "-k", "y", "--advance", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Event trace"))
            .stdout(predicate::str::contains("2 survivor(s)"));
    }
}
