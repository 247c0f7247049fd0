use crate::config::types::{Language, ResourceLimits};
use crate::kernel::cgroup::MemoryEnforcement;
use crate::safety::workspace::{DestroyOutcome, ScratchLocation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Executable produced from one submission.
///
/// Owns its scratch location, so destroying (or dropping) the artifact removes
/// both source and binary. Runs may reuse it sequentially.
#[derive(Debug)]
pub struct CompiledArtifact {
    location: ScratchLocation,
    executable: PathBuf,
    command: Vec<String>,
    language: Language,
}

impl CompiledArtifact {
    pub fn new(
        location: ScratchLocation,
        executable: PathBuf,
        command: Vec<String>,
        language: Language,
    ) -> Self {
        Self {
            location,
            executable,
            command,
            language,
        }
    }

    pub fn run_id(&self) -> &str {
        self.location.run_id()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// argv used to start one run
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn workdir(&self) -> &Path {
        self.location.dir()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_destroyed(&self) -> bool {
        self.location.is_destroyed()
    }

    pub fn destroy(&mut self) -> DestroyOutcome {
        self.location.destroy()
    }
}

/// Everything the supervisor needs to start and police one process.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    pub argv: &'a [String],
    pub workdir: &'a Path,
    pub stdin: &'a [u8],
    pub limits: &'a ResourceLimits,
    pub enforcement: &'a MemoryEnforcement,
    /// Correlates logs and audit events (scratch run id)
    pub label: &'a str,
}

/// Record of a judge-initiated process-group kill.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub group_signalled: bool,
    pub kill_sent: bool,
    pub cgroup_killed: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// Post-exit sweep of the process group.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReapReport {
    /// Descendants were still alive when the main process exited
    pub lingering: bool,
    pub reaped: usize,
    /// `kill(-pgid, 0)` reported ESRCH before the sweep gave up
    pub group_gone: bool,
}

/// Raw evidence from one supervised process, before classification.
#[derive(Clone, Debug, Default)]
pub struct LaunchOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub wall_time: Duration,
    pub peak_memory_bytes: Option<u64>,
    /// Kernel-reported `ru_maxrss` of the program and its reaped descendants
    pub resident_peak_bytes: Option<u64>,
    /// cgroup `memory.events` reported an OOM kill
    pub oom_killed: bool,
    pub output: Vec<u8>,
    pub output_truncated: bool,
    pub kill_report: Option<KillReport>,
    pub reap: ReapReport,
}

impl LaunchOutcome {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none() && !self.timed_out
    }

    /// Human-readable termination status
    pub fn status_text(&self) -> String {
        match (self.exit_code, self.signal) {
            (_, Some(sig)) => match nix::sys::signal::Signal::try_from(sig) {
                Ok(signal) => format!("signal: {}", signal.as_str()),
                Err(_) => format!("signal: {}", sig),
            },
            (Some(code), None) => format!("exit status {}", code),
            (None, None) => "unknown status".to_string(),
        }
    }
}
