//! Build script for orchestrator-server.
//!
//! Extracts a git version string for runtime version display, falling back
//! to the crate version when not built from a git checkout.

#![allow(
    clippy::panic,
    clippy::question_mark_used,
    clippy::expect_used,
    reason = "Build scripts use panic/expect for fatal errors"
)]

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs/tags");

    let version = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned());

    println!("cargo:rustc-env=GIT_VERSION={version}");

    let build_time = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    println!("cargo:rustc-env=BUILD_TIME={build_time}");
}
