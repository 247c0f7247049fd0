//! Process supervision: spawn, police, kill, reap.
//!
//! One call supervises one process tree:
//! - child gets its own process group, a scrubbed environment, rlimits
//!   (plus a self-attach to its run cgroup) and a seccomp filter that keeps
//!   it and its descendants in that group, all installed before exec
//! - stdout and stderr share one pipe, so output interleaves as written
//! - the leader is polled with `wait4(WNOHANG)` against the deadline and the
//!   cancel token; on expiry the whole group is SIGKILLed
//! - once the leader is reaped, survivors in the group are killed and reaped

use crate::config::types::{JudgeError, Result};
use crate::core::cancel::CancelToken;
use crate::core::types::{LaunchOutcome, LaunchSpec};
use crate::kernel::cgroup::{MemoryEnforcement, RunCgroup};
use crate::kernel::rlimit::RlimitPlan;
use crate::kernel::seccomp::GroupConfinement;
use crate::kernel::signal::{reap_process_group, terminate_process_group};
use crate::observability::audit;
use crate::utils::output::{OutputCollector, OutputLimits};
use nix::unistd::Pid;
use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(2);
const REAP_SETTLE: Duration = Duration::from_millis(500);
const OUTPUT_GRACE_MS: u64 = 2000;
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> JudgeError {
    JudgeError::Process(format!("{prefix}: {err}"))
}

/// Close-on-exec pipe as (read, write).
fn output_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(to_process_error("pipe2", std::io::Error::last_os_error()));
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Runs in the forked child: only async-signal-safe calls.
fn attach_self_to_cgroup(procs_path: &CString) -> std::io::Result<()> {
    let fd = unsafe { libc::open(procs_path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // "0" moves the writing process itself.
    let written = unsafe { libc::write(fd, b"0".as_ptr() as *const libc::c_void, 1) };
    let err = std::io::Error::last_os_error();
    unsafe {
        libc::close(fd);
    }
    if written != 1 {
        return Err(err);
    }
    Ok(())
}

fn feed_stdin(mut stdin: ChildStdin, data: Vec<u8>) {
    std::thread::spawn(move || {
        if let Err(e) = stdin.write_all(&data) {
            // The program may legitimately exit without reading its input.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                log::debug!("stdin feed failed: {}", e);
            }
        }
    });
}

struct WaitResult {
    exit_code: Option<i32>,
    signal: Option<i32>,
    max_rss_bytes: Option<u64>,
}

fn decode_wait(status: libc::c_int, usage: &libc::rusage) -> WaitResult {
    let (exit_code, signal) = if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    };
    let max_rss_bytes = (usage.ru_maxrss > 0).then(|| usage.ru_maxrss as u64 * 1024);
    WaitResult {
        exit_code,
        signal,
        max_rss_bytes,
    }
}

/// `Ok(None)` while the process is still running.
fn try_wait(pid: libc::pid_t, flags: libc::c_int) -> Result<Option<WaitResult>> {
    loop {
        let mut status: libc::c_int = 0;
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid, &mut status, flags, &mut usage) };
        if rc == pid {
            return Ok(Some(decode_wait(status, &usage)));
        }
        if rc == 0 {
            return Ok(None);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(to_process_error("wait4", err));
    }
}

fn wait_blocking(pid: libc::pid_t) -> Result<WaitResult> {
    loop {
        if let Some(result) = try_wait(pid, 0)? {
            return Ok(result);
        }
    }
}

/// Supervise one process to completion.
///
/// Returns [`JudgeError::Cancelled`] when `cancel` fires; the process tree is
/// killed and reaped before returning either way.
pub fn launch(spec: &LaunchSpec<'_>, cancel: &CancelToken) -> Result<LaunchOutcome> {
    if cancel.is_cancelled() {
        return Err(JudgeError::Cancelled);
    }
    let program = spec
        .argv
        .first()
        .ok_or_else(|| JudgeError::Process("empty command line".to_string()))?;

    let mut cgroup: Option<RunCgroup> = match spec.enforcement {
        MemoryEnforcement::CgroupV2(root) => Some(root.create_run(spec.label, spec.limits)?),
        MemoryEnforcement::Rlimit => None,
    };
    let procs_path = cgroup.as_ref().map(|cg| cg.procs_path().to_owned());
    let plan = RlimitPlan::for_limits(spec.limits, cgroup.is_none());
    let confinement = GroupConfinement::build()?;

    let (read_end, write_end) = output_pipe()?;
    let stderr_end = write_end.try_clone()?;
    let search_path = std::env::var_os("PATH").unwrap_or_else(|| FALLBACK_PATH.into());

    let started = Instant::now();
    let spawned = {
        let mut command = Command::new(program);
        command
            .args(&spec.argv[1..])
            .current_dir(spec.workdir)
            .env_clear()
            .env("PATH", &search_path)
            .env("HOME", spec.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .process_group(0);
        unsafe {
            command.pre_exec(move || {
                if let Some(path) = &procs_path {
                    attach_self_to_cgroup(path)?;
                }
                plan.apply()?;
                confinement.apply()
            });
        }
        command.spawn()
        // `command` drops here, closing the parent's copies of the write end.
    };
    let mut child = spawned.map_err(|source| JudgeError::Toolchain {
        program: program.clone(),
        source,
    })?;

    let pid = child.id() as libc::pid_t;
    let pgid = Pid::from_raw(pid);
    log::debug!("[{}] spawned {} as pid {}", spec.label, program, pid);

    if let Some(stdin) = child.stdin.take() {
        feed_stdin(stdin, spec.stdin.to_vec());
    }
    let collector = OutputCollector::new(OutputLimits {
        max_bytes: spec.limits.output_limit_bytes,
        collection_timeout_ms: OUTPUT_GRACE_MS,
    })
    .spawn(File::from(read_end));

    let deadline = spec.limits.wall_clock().map(|limit| started + limit);
    let mut outcome = LaunchOutcome::default();
    let mut cancelled = false;

    let waited = loop {
        match try_wait(pid, libc::WNOHANG) {
            Ok(Some(result)) => break Ok(result),
            Ok(None) => {}
            Err(e) => break Err(e),
        }

        let expired = deadline.map_or(false, |d| Instant::now() >= d);
        if expired || cancel.is_cancelled() {
            outcome.timed_out = expired;
            cancelled = !expired;
            let report = terminate_process_group(pgid, cgroup.as_ref());
            if expired {
                audit::wall_clock_violation(
                    spec.label,
                    started.elapsed().as_millis() as u64,
                    spec.limits.wall_clock_ms,
                );
            }
            audit::process_group_killed(spec.label, &report);
            outcome.kill_report = Some(report);
            break wait_blocking(pid);
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    outcome.wall_time = started.elapsed();

    // Survivors are killed whether or not the leader exited on its own.
    outcome.reap = reap_process_group(pgid, REAP_SETTLE);
    if outcome.reap.lingering {
        audit::lingering_descendants(spec.label, outcome.reap.reaped, outcome.reap.group_gone);
    }

    let waited = match waited {
        Ok(result) => result,
        Err(e) => {
            terminate_process_group(pgid, cgroup.as_ref());
            return Err(e);
        }
    };
    outcome.exit_code = waited.exit_code;
    outcome.signal = waited.signal;
    outcome.resident_peak_bytes = waited.max_rss_bytes;
    outcome.peak_memory_bytes = waited.max_rss_bytes;

    if let Some(cg) = cgroup.as_mut() {
        outcome.oom_killed = cg.oom_kill_count() > 0;
        if let Some(peak) = cg.peak_memory() {
            outcome.peak_memory_bytes = Some(peak);
        }
        if let Err(e) = cg.remove() {
            log::warn!("[{}] {}", spec.label, e);
        }
    }

    let collected = collector.finish();
    outcome.output = collected.bytes;
    outcome.output_truncated = collected.truncated;

    log::debug!(
        "[{}] finished in {:?}: {} (timed_out={}, oom_killed={})",
        spec.label,
        outcome.wall_time,
        outcome.status_text(),
        outcome.timed_out,
        outcome.oom_killed
    );

    if cancelled {
        return Err(JudgeError::Cancelled);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ResourceLimits;

    fn run(script: &str, limits: &ResourceLimits, stdin: &[u8]) -> Result<LaunchOutcome> {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];
        let workdir = std::env::temp_dir();
        let spec = LaunchSpec {
            argv: &argv,
            workdir: &workdir,
            stdin,
            limits,
            enforcement: &MemoryEnforcement::Rlimit,
            label: "supervisor-test",
        };
        launch(&spec, &CancelToken::new())
    }

    #[test]
    fn captures_combined_output_and_exit_code() {
        let limits = ResourceLimits::default();
        let outcome = run("echo out; echo err 1>&2; exit 3", &limits, b"").unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.timed_out);
        let text = String::from_utf8_lossy(&outcome.output);
        assert!(text.contains("out\n") && text.contains("err\n"));
    }

    #[test]
    fn feeds_stdin() {
        let limits = ResourceLimits::default();
        let outcome = run("read a b; echo $((a + b))", &limits, b"2 3\n").unwrap();
        assert!(outcome.exited_cleanly());
        assert_eq!(outcome.output, b"5\n");
    }

    #[test]
    fn deadline_kills_process_group() {
        let limits = ResourceLimits {
            wall_clock_ms: 200,
            ..ResourceLimits::default()
        };
        let started = Instant::now();
        let outcome = run("sleep 30 & sleep 30", &limits, b"").unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.signal, Some(libc::SIGKILL));
        assert!(outcome.kill_report.as_ref().map_or(false, |r| r.kill_sent));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_a_toolchain_error() {
        let argv = vec!["/nonexistent/program".to_string()];
        let workdir = std::env::temp_dir();
        let limits = ResourceLimits::default();
        let spec = LaunchSpec {
            argv: &argv,
            workdir: &workdir,
            stdin: b"",
            limits: &limits,
            enforcement: &MemoryEnforcement::Rlimit,
            label: "supervisor-test",
        };
        let err = launch(&spec, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, JudgeError::Toolchain { .. }));
    }

    #[test]
    fn pre_cancelled_launch_spawns_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let argv = vec!["/bin/true".to_string()];
        let workdir = std::env::temp_dir();
        let limits = ResourceLimits::default();
        let spec = LaunchSpec {
            argv: &argv,
            workdir: &workdir,
            stdin: b"",
            limits: &limits,
            enforcement: &MemoryEnforcement::Rlimit,
            label: "supervisor-test",
        };
        assert!(matches!(launch(&spec, &cancel), Err(JudgeError::Cancelled)));
    }
}
