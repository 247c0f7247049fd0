//! Shared fixtures for integration tests.
#![allow(dead_code)]

use codejudge::config::loader::{CompilersConfig, JudgeConfig, ToolchainConfig};
use codejudge::{MemoryBackendKind, TestCase};
use std::path::{Path, PathBuf};

/// Marker that makes the shell toolchain reject a source.
pub const COMPILE_ERROR_MARKER: &str = "COMPILE_ERROR";

/// A "compiler" that turns a shell-script source into an executable script,
/// failing with diagnostics when the source contains the error marker.
pub fn shell_toolchain() -> CompilersConfig {
    let script = format!(
        "if grep -n {marker} \"$1\" >&2; then echo \"$1: error: rejected\" >&2; exit 1; fi; \
         {{ echo '#!/bin/sh'; cat \"$1\"; }} > \"$2\"",
        marker = COMPILE_ERROR_MARKER
    );
    CompilersConfig {
        cpp: ToolchainConfig {
            path: "/bin/sh".to_string(),
            args: vec![
                "-c".to_string(),
                script,
                "shell-cc".to_string(),
                "{source}".to_string(),
                "{binary}".to_string(),
            ],
            timeout_ms: 10_000,
            memory_mb: 0,
        },
    }
}

pub fn unique_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("codejudge-{}-{}", label, uuid::Uuid::new_v4()))
}

/// Config with an isolated scratch root, rlimit memory backend and short
/// default deadline.
pub fn test_config(label: &str) -> JudgeConfig {
    let mut config = JudgeConfig::default();
    config.scratch_root = unique_dir(label);
    config.memory_backend = MemoryBackendKind::Rlimit;
    config.stale_scratch_secs = 0;
    config.limits.wall_clock_ms = 2_000;
    config.compilers = shell_toolchain();
    config
}

pub fn scratch_entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
}

pub fn case(id: i64, task_id: i64, input: &str, expected: &str, points: u64) -> TestCase {
    TestCase {
        id,
        task_id,
        input: input.to_string(),
        expected_output: expected.to_string(),
        points,
    }
}

pub fn gpp_available() -> bool {
    std::process::Command::new("g++")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}
