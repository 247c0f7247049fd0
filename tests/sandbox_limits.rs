//! Sandbox runner behaviour on shell-script artifacts.

mod common;

use codejudge::core::cancel::CancelToken;
use codejudge::core::runner::{ProcessSandbox, SandboxRunner};
use codejudge::core::types::CompiledArtifact;
use codejudge::kernel::cgroup::MemoryEnforcement;
use codejudge::safety::workspace::ScratchSpace;
use codejudge::{JudgeError, Language, ResourceLimits, RunVerdict};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::time::{Duration, Instant};

struct Fixture {
    space: ScratchSpace,
    sandbox: ProcessSandbox,
}

impl Fixture {
    fn new(label: &str) -> Self {
        // Orphans of a killed program must come back here to be reaped.
        codejudge::kernel::signal::enable_child_subreaper();
        Self {
            space: ScratchSpace::new(common::unique_dir(label)).unwrap(),
            sandbox: ProcessSandbox::new(MemoryEnforcement::Rlimit),
        }
    }

    fn artifact(&self, script: &str) -> CompiledArtifact {
        let location = self.space.create().unwrap();
        let path = location
            .write_file("main", format!("#!/bin/sh\n{}", script).as_bytes())
            .unwrap();
        location.mark_executable(&path).unwrap();
        let command = vec![path.to_string_lossy().to_string()];
        CompiledArtifact::new(location, path, command, Language::Cpp)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.space.root());
    }
}

/// PIDs a script appended to `pids` in its working directory.
fn recorded_pids(workdir: &Path) -> Vec<i32> {
    std::fs::read_to_string(workdir.join("pids"))
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

fn assert_gone(pids: &[i32]) {
    assert!(!pids.is_empty());
    for &pid in pids {
        assert_eq!(
            kill(Pid::from_raw(pid), None::<Signal>),
            Err(Errno::ESRCH),
            "pid {} still exists",
            pid
        );
    }
}

fn limits(wall_clock_ms: u64) -> ResourceLimits {
    ResourceLimits {
        wall_clock_ms,
        ..ResourceLimits::default()
    }
}

#[test]
fn test_input_reaches_program_and_output_is_normalised() {
    let fx = Fixture::new("echo");
    let artifact = fx.artifact("read a b\necho $((a + b))\necho\n");

    let outcome = fx
        .sandbox
        .run(&artifact, "2 2", &limits(2_000), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::Success);
    assert_eq!(outcome.captured_output, "4");
    assert_eq!(outcome.stats.exit_code, Some(0));
}

#[test]
fn test_artifact_is_reusable_across_runs() {
    let fx = Fixture::new("reuse");
    let artifact = fx.artifact("read x\necho \"$x$x\"\n");

    for input in ["a", "bc", "def"] {
        let outcome = fx
            .sandbox
            .run(&artifact, input, &limits(2_000), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.captured_output, format!("{}{}", input, input));
    }
}

#[test]
fn test_stderr_is_merged_into_captured_output() {
    let fx = Fixture::new("stderr");
    let artifact = fx.artifact("echo out\necho err >&2\n");

    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(2_000), &CancelToken::new())
        .unwrap();
    assert!(outcome.captured_output.contains("out"));
    assert!(outcome.captured_output.contains("err"));
}

#[test]
fn test_wall_clock_breach_is_time_limit() {
    let fx = Fixture::new("sleep");
    let artifact = fx.artifact("echo started\nsleep 30\n");

    let started = Instant::now();
    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(300), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::TimeLimitExceeded);
    assert!(outcome.captured_output.is_empty());
    assert!(outcome.stats.killed_by_judge);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_time_limit_leaves_no_process_behind() {
    let fx = Fixture::new("tle-tree");
    let artifact = fx.artifact(
        "echo $$ >> pids\nsleep 30 &\necho $! >> pids\n(sleep 30 & echo $! >> pids; wait)\n",
    );

    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(300), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::TimeLimitExceeded);
    let pids = recorded_pids(artifact.workdir());
    assert_eq!(pids.len(), 3);
    assert_gone(&pids);
}

#[test]
fn test_new_session_cannot_escape_the_kill() {
    let fx = Fixture::new("setsid");
    let artifact = fx.artifact(
        "setsid sleep 30 &\necho $! >> pids\nsleep 0.2\nsetsid sleep 30 > /dev/null 2>&1 || echo refused\nsleep 30\n",
    );

    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(500), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::TimeLimitExceeded);
    assert!(outcome.diagnostic.contains("refused"));
    assert_gone(&recorded_pids(artifact.workdir()));
}

#[test]
fn test_disabled_deadline_lets_slow_program_finish() {
    let fx = Fixture::new("no-deadline");
    let artifact = fx.artifact("sleep 0.5\necho done\n");
    let mut unbounded = limits(100);
    unbounded.enforce_wall_clock = false;

    let outcome = fx
        .sandbox
        .run(&artifact, "", &unbounded, &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::Success);
    assert_eq!(outcome.captured_output, "done");
}

#[test]
fn test_nonzero_exit_is_runtime_error() {
    let fx = Fixture::new("exit");
    let artifact = fx.artifact("echo boom\nexit 3\n");

    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(2_000), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::RuntimeError);
    assert_eq!(outcome.diagnostic, "Error Info: exit status 3 Output: boom\n");
}

#[test]
fn test_fatal_signal_is_runtime_error() {
    let fx = Fixture::new("signal");
    let artifact = fx.artifact("kill -SEGV $$\n");

    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(2_000), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::RuntimeError);
    assert!(outcome.diagnostic.contains("SIGSEGV"));
    assert_eq!(outcome.stats.signal, Some(libc::SIGSEGV));
}

#[test]
fn test_background_descendants_do_not_outlive_the_run() {
    let fx = Fixture::new("orphans");
    let artifact = fx.artifact(
        "(sleep 30 & echo $! >> pids)\nsleep 30 &\necho $! >> pids\necho leader-done\n",
    );

    let started = Instant::now();
    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(5_000), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::Success);
    assert_eq!(outcome.captured_output, "leader-done");
    assert!(started.elapsed() < Duration::from_secs(5));
    let pids = recorded_pids(artifact.workdir());
    assert_eq!(pids.len(), 2);
    assert_gone(&pids);
}

#[test]
fn test_allocation_failure_message_is_runtime_error() {
    let fx = Fixture::new("enomem-text");
    let artifact = fx.artifact("echo 'open: Cannot allocate memory'\nexit 1\n");

    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(2_000), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::RuntimeError);
    assert!(outcome.diagnostic.starts_with("Error Info: exit status 1 Output: open:"));
}

#[test]
fn test_resource_limits_are_installed_in_child() {
    let fx = Fixture::new("rlimits");
    let artifact = fx.artifact("ulimit -c\nulimit -v\n");
    let run_limits = ResourceLimits {
        memory_bytes: 256 * 1024 * 1024,
        ..limits(2_000)
    };

    let outcome = fx
        .sandbox
        .run(&artifact, "", &run_limits, &CancelToken::new())
        .unwrap();
    // RLIMIT_AS is twice the ceiling, in KiB
    let lines: Vec<&str> = outcome.captured_output.lines().collect();
    assert_eq!(lines, vec!["0", "524288"]);
}

#[test]
fn test_environment_is_scrubbed_and_cwd_is_scratch() {
    let fx = Fixture::new("env");
    let artifact = fx.artifact("pwd\necho \"$HOME\"\nenv | cut -d= -f1 | sort | tr '\\n' ' '\n");

    let outcome = fx
        .sandbox
        .run(&artifact, "", &limits(2_000), &CancelToken::new())
        .unwrap();
    let lines: Vec<&str> = outcome.captured_output.lines().collect();
    let workdir = artifact.workdir().to_string_lossy().to_string();
    assert_eq!(lines[0], workdir);
    assert_eq!(lines[1], workdir);
    assert!(!lines[2].contains("CARGO"));
    assert!(!lines[2].contains("RUST_LOG"));
}

#[test]
fn test_output_beyond_cap_is_truncated() {
    let fx = Fixture::new("flood");
    let artifact = fx.artifact("head -c 200000 /dev/zero | tr '\\0' a\n");
    let capped = ResourceLimits {
        output_limit_bytes: 1_000,
        ..limits(5_000)
    };

    let outcome = fx
        .sandbox
        .run(&artifact, "", &capped, &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.verdict, RunVerdict::Success);
    assert!(outcome.stats.output_truncated);
    assert_eq!(outcome.captured_output.len(), 1_000);
    assert!(outcome.diagnostic.contains("truncated"));
}

#[test]
fn test_destroyed_artifact_is_refused() {
    let fx = Fixture::new("destroyed");
    let mut artifact = fx.artifact("echo hi\n");
    artifact.destroy();

    let err = fx
        .sandbox
        .run(&artifact, "", &limits(2_000), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, JudgeError::Filesystem(_)));
}

#[test]
fn test_cancel_interrupts_running_program() {
    let fx = Fixture::new("cancel");
    let artifact = fx.artifact("sleep 30\n");
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        trigger.cancel();
    });

    let started = Instant::now();
    let err = fx
        .sandbox
        .run(&artifact, "", &limits(20_000), &cancel)
        .unwrap_err();
    assert!(matches!(err, JudgeError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
}
