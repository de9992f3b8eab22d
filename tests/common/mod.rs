//! Common test utilities and fixtures
//!
//! Each test gets its own data directory and config file so runs never
//! leak between tests.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A throwaway orchestrator home: config, data directory and input files
pub struct Workspace {
    dir: TempDir,
    config_path: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_config("")
    }

    /// Workspace whose config file carries `extra` after the storage section
    pub fn with_config(extra: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                "[storage]\ndata_dir = {:?}\n\n{}",
                data_dir.to_str().unwrap(),
                extra
            ),
        )
        .unwrap();
        Self { dir, config_path }
    }

    /// Workspace with a rule set file wired into the config
    pub fn with_rules(rules_toml: &str) -> Self {
        let ws = Self::new();
        let rules = ws.write("rules.toml", rules_toml);
        fs::write(
            &ws.config_path,
            format!(
                "{}\n[rules]\nfile = {:?}\n",
                fs::read_to_string(&ws.config_path).unwrap(),
                rules.to_str().unwrap()
            ),
        )
        .unwrap();
        ws
    }

    pub fn config_path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Write an input file into the workspace
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Orchestrator command bound to this workspace
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("hitl-orchestrator").unwrap();
        for var in [
            "HITL_CONFIG",
            "HITL_DATA_DIR",
            "HITL_RULES_FILE",
            "HITL_ESCALATION_WINDOW_SECS",
            "HITL_REVIEWER",
            "HITL_LOG_FILE",
        ] {
            cmd.env_remove(var);
        }
        cmd.env("HITL_LOG_LEVEL", "warn");
        cmd.arg("--config").arg(self.config_path());
        cmd
    }

    /// Run a command that must succeed and return its trimmed stdout
    pub fn run(&self, args: &[&str]) -> String {
        let output = self.cmd().args(args).assert().success().get_output().clone();
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    pub fn register(&self, id: &str, tags: &[&str]) {
        let file = self.write(
            &format!("{}.toml", id),
            &format!(
                "id = {:?}\nspecialization = {:?}\ncontext_scope = \"module\"\n",
                id, tags
            ),
        );
        self.run(&["capability", "register", "--file", file.to_str().unwrap()]);
    }

    pub fn start(&self, goal_toml: &str) -> String {
        let goal = self.write("goal.toml", goal_toml);
        self.run(&["start", "--goal", goal.to_str().unwrap()])
    }

    pub fn status(&self, run: &str) -> Value {
        serde_json::from_str(&self.run(&["status", run, "--json"])).unwrap()
    }

    pub fn task(&self, run: &str, task: &str) -> Value {
        let report = self.status(run);
        report["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["id"] == task)
            .cloned()
            .unwrap_or_else(|| panic!("task {} not in report", task))
    }

    pub fn task_status(&self, run: &str, task: &str) -> String {
        self.task(run, task)["status"].as_str().unwrap().to_string()
    }

    /// Submit a JSON artifact and return the printed checkpoint id
    pub fn submit(&self, run: &str, task: &str, artifact: &str) -> String {
        let file = self.write(&format!("{}-artifact.json", task), artifact);
        let out = self.run(&["submit", run, task, "--artifact", file.to_str().unwrap()]);
        out.split_whitespace().next().unwrap().to_string()
    }
}

/// Two tasks, the second depending on the first
pub const CHAIN_GOAL: &str = r#"
description = "add an endpoint"

[[task]]
id = "t1"
description = "design the handler"
requires = ["rust"]

[[task]]
id = "t2"
description = "implement the handler"
requires = ["rust"]
depends_on = ["t1"]
"#;
