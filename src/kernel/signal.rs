//! Process-group termination, descendant reaping, and shutdown signals.

use crate::core::cancel::CancelToken;
use crate::core::types::{KillReport, ReapReport};
use crate::kernel::cgroup::RunCgroup;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

/// Set from the async signal handler; polled by [`SignalHandler`].
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

static SUBREAPER: Once = Once::new();
static SUBREAPER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Make this process the reaper of orphaned descendants, so children of a
/// killed program come back here instead of escaping to init.
pub fn enable_child_subreaper() -> bool {
    SUBREAPER.call_once(|| {
        let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
        if rc == 0 {
            SUBREAPER_ACTIVE.store(true, Ordering::SeqCst);
            debug!("Registered as child subreaper");
        } else {
            warn!(
                "PR_SET_CHILD_SUBREAPER failed: {}",
                std::io::Error::last_os_error()
            );
        }
    });
    SUBREAPER_ACTIVE.load(Ordering::SeqCst)
}

/// True while any member of the group exists.
pub fn group_alive(pgid: Pid) -> bool {
    !matches!(signal::killpg(pgid, None::<Signal>), Err(Errno::ESRCH))
}

/// SIGKILL the whole process group (and its cgroup when there is one).
pub fn terminate_process_group(pgid: Pid, cgroup: Option<&RunCgroup>) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();

    match signal::killpg(pgid, Signal::SIGKILL) {
        Ok(()) => {
            report.group_signalled = true;
            report.kill_sent = true;
        }
        Err(Errno::ESRCH) => report.notes.push("process group already gone".to_string()),
        Err(e) => {
            let _ = signal::kill(pgid, Signal::SIGKILL);
            report.kill_sent = true;
            report.notes.push(format!("group SIGKILL failed, killed leader only: {}", e));
        }
    }

    if let Some(cgroup) = cgroup {
        report.cgroup_killed = cgroup.kill_all();
    }

    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

/// Kill and reap whatever is left in `pgid` after its leader was waited for.
///
/// Reaping only works for descendants that are our children, which holds once
/// [`enable_child_subreaper`] succeeded. Either way the sweep stops when the
/// group is empty or `settle` elapses.
pub fn reap_process_group(pgid: Pid, settle: Duration) -> ReapReport {
    let mut report = ReapReport {
        lingering: group_alive(pgid),
        ..ReapReport::default()
    };
    if report.lingering {
        let _ = signal::killpg(pgid, Signal::SIGKILL);
    }

    let deadline = Instant::now() + settle;
    let group = Pid::from_raw(-pgid.as_raw());
    loop {
        match waitpid(group, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => {
                report.reaped += 1;
                continue;
            }
            Err(Errno::EINTR) => continue,
            // ECHILD: nothing in the group is our child any more
            Err(_) => {}
        }

        if !group_alive(pgid) {
            report.group_gone = true;
            break;
        }
        if Instant::now() >= deadline {
            warn!("Process group {} still present after {:?}", pgid, settle);
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    report
}

/// Installs SIGINT/SIGTERM/SIGHUP handlers that only flip atomics.
pub struct SignalHandler;

impl SignalHandler {
    /// Must be called before worker threads are spawned.
    pub fn init() -> Result<Self, String> {
        let action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
            unsafe { signal::sigaction(sig, &action) }
                .map_err(|e| format!("Failed to install {} handler: {}", sig.as_str(), e))?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(Self)
    }

    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// Signal that was received (0 if none)
    pub fn received_signal(&self) -> i32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    /// Spawn a watcher that cancels `token` once a shutdown signal arrives.
    pub fn cancel_on_shutdown(&self, token: CancelToken) {
        std::thread::spawn(move || loop {
            if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                info!(
                    "Signal {} received, cancelling judgement",
                    SIGNAL_RECEIVED.load(Ordering::SeqCst)
                );
                token.cancel();
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        });
    }
}
