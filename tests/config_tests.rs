//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Test fixture for configuration testing
struct ConfigFixture {
    temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self {
            temp_dir,
            config_path,
        }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("hitl-orchestrator").unwrap();
        for var in [
            "HITL_CONFIG",
            "HITL_DATA_DIR",
            "HITL_RULES_FILE",
            "HITL_ESCALATION_WINDOW_SECS",
            "HITL_WATCH_INTERVAL_SECS",
            "HITL_LOG_LEVEL",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    fn validate(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["config", "validate", "--config", self.path()])
            .assert()
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");
    fixture
        .validate()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[engine]
escalation_window_secs = 7200
watch_interval_secs = 30

[storage]
data_dir = "/tmp/hitl/data"

[rules]
file = "/tmp/hitl/rules.toml"

[logging]
level = "debug"
file = "/tmp/hitl/orchestrator.log"
max_file_size_mb = 50
max_files = 3
json_format = true
"#,
    );
    fixture.validate().success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_zero_escalation_window() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[engine]\nescalation_window_secs = 0\n");
    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("escalation_window_secs"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[logging]\nlevel = \"invalid_level\"\n");
    fixture.validate().failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[engine\nwatch_interval_secs = 5\n");
    fixture
        .validate()
        .failure()
        .stderr(predicate::str::contains("E101"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Overrides
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file_values() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[engine]\nescalation_window_secs = 7200\n");
    fixture
        .cmd()
        .env("HITL_ESCALATION_WINDOW_SECS", "120")
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("escalation_window_secs = 120"));
}

#[test]
fn test_env_override_can_invalidate() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");
    fixture
        .cmd()
        .env("HITL_WATCH_INTERVAL_SECS", "0")
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure();
}

#[test]
fn test_config_env_var_selects_file() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[storage]\ndata_dir = \"/tmp/hitl-from-env\"\n");
    fixture
        .cmd()
        .env("HITL_CONFIG", fixture.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/hitl-from-env"));
}

// ─────────────────────────────────────────────────────────────────
// Config Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_writes_valid_file() {
    let fixture = ConfigFixture::new();
    let path = fixture.temp_dir.path().join("nested").join("config.toml");
    let path = path.to_str().unwrap();

    fixture
        .cmd()
        .args(["config", "init", "--path", path])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written"));
    fixture
        .cmd()
        .args(["config", "validate", "--config", path])
        .assert()
        .success();

    // A second init without --force refuses to overwrite
    fixture
        .cmd()
        .args(["config", "init", "--path", path])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    fixture
        .cmd()
        .args(["config", "init", "--path", path, "--force"])
        .assert()
        .success();
}

#[test]
fn test_rules_file_errors_surface_on_commands() {
    let fixture = ConfigFixture::new();
    let rules = fixture.temp_dir.path().join("rules.toml");
    fs::write(
        &rules,
        "[[rule]]\nname = \"bad\"\nkind = \"forbidden-pattern\"\npattern = \"(\"\n",
    )
    .unwrap();
    fixture.write_config(&format!(
        "[storage]\ndata_dir = {:?}\n\n[rules]\nfile = {:?}\n",
        fixture.temp_dir.path().join("data").to_str().unwrap(),
        rules.to_str().unwrap()
    ));

    fixture
        .cmd()
        .args(["runs", "--config", fixture.path()])
        .assert()
        .code(10);
}
