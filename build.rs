//! Build script for the HITL orchestrator
//!
//! Stamps the binary with git revision, build time and toolchain details
//! so `hitl-orchestrator version` can report exactly what is running.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = run_trimmed("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = run_trimmed("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = git_dirty_flag();
    let rustc_version = run_trimmed("rustc", &["--version"]);

    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=HITL_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=HITL_GIT_BRANCH={}", git_branch);
    println!("cargo:rustc-env=HITL_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=HITL_BUILD_TIMESTAMP={}", built_at);
    println!("cargo:rustc-env=HITL_TARGET={}", target);
    println!("cargo:rustc-env=HITL_PROFILE={}", profile);
    println!("cargo:rustc-env=HITL_RUSTC_VERSION={}", rustc_version);
}

/// Run a command and return its trimmed stdout, or "unknown" on any failure
fn run_trimmed(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn git_dirty_flag() -> &'static str {
    match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(output) if output.status.success() => {
            if output.stdout.is_empty() {
                "false"
            } else {
                "true"
            }
        }
        _ => "unknown",
    }
}
