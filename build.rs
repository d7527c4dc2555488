//! Captures the git commit and build time for `docbridge --version`.
//!
//! Both values can be pinned through the environment for reproducible builds;
//! without git or `date` they fall back to "unknown" markers.

use std::env;
use std::fs;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const GIT_HASH_VAR: &str = "DOCBRIDGE_BUILD_GIT_HASH";
const TIMESTAMP_VAR: &str = "DOCBRIDGE_BUILD_TIMESTAMP";

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    if let Some(reference) = current_head_ref() {
        println!("cargo:rerun-if-changed=.git/{reference}");
    }
    for var in [GIT_HASH_VAR, TIMESTAMP_VAR] {
        println!("cargo:rerun-if-env-changed={var}");
    }

    let git_hash = env::var(GIT_HASH_VAR)
        .ok()
        .or_else(|| command_output("git", &["rev-parse", "--short=12", "HEAD"]))
        .unwrap_or_else(|| "unknown".to_string());
    let timestamp = env::var(TIMESTAMP_VAR)
        .ok()
        .or_else(|| command_output("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]))
        .unwrap_or_else(unix_timestamp_marker);

    println!("cargo:rustc-env={GIT_HASH_VAR}={git_hash}");
    println!("cargo:rustc-env={TIMESTAMP_VAR}={timestamp}");
}

/// Branch ref named by `.git/HEAD`, so new commits trigger a rebuild.
fn current_head_ref() -> Option<String> {
    let head = fs::read_to_string(".git/HEAD").ok()?;
    head.trim().strip_prefix("ref: ").map(str::to_string)
}

fn unix_timestamp_marker() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("unix:{secs}")
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
