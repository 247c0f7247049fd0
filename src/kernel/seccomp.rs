//! Syscall filter that pins a judged program to its process group.
//!
//! Group-wide SIGKILL and `waitpid(-pgid)` only reach processes that stay in
//! the group. `setsid` and `setpgid` are the two ways out, so the child gets
//! a filter making both fail with `EPERM`. Everything else is allowed.

use crate::config::types::{JudgeError, Result};
use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use std::collections::BTreeMap;

/// Syscalls that move a process into another session or process group.
const GROUP_ESCAPE_SYSCALLS: &[libc::c_long] = &[libc::SYS_setsid, libc::SYS_setpgid];

/// Compiled BPF program, built in the parent and installed in `pre_exec`.
pub struct GroupConfinement {
    program: BpfProgram,
}

impl GroupConfinement {
    pub fn build() -> Result<Self> {
        let arch: TargetArch = std::env::consts::ARCH
            .try_into()
            .map_err(|e| JudgeError::Process(format!("seccomp target arch: {}", e)))?;

        let rules: BTreeMap<i64, Vec<SeccompRule>> = GROUP_ESCAPE_SYSCALLS
            .iter()
            .map(|&nr| (nr as i64, Vec::new()))
            .collect();
        let filter = SeccompFilter::new(
            rules,
            SeccompAction::Allow,
            SeccompAction::Errno(libc::EPERM as u32),
            arch,
        )
        .map_err(|e| JudgeError::Process(format!("seccomp filter: {}", e)))?;
        let program: BpfProgram = filter
            .try_into()
            .map_err(|e| JudgeError::Process(format!("seccomp compile: {}", e)))?;

        Ok(Self { program })
    }

    /// Install in the calling process (sets `no_new_privs` first).
    ///
    /// Runs between fork and exec: the error path reads errno instead of
    /// formatting, so nothing allocates.
    pub fn apply(&self) -> std::io::Result<()> {
        seccompiler::apply_filter(&self.program).map_err(|_| std::io::Error::last_os_error())
    }

    pub fn instruction_count(&self) -> usize {
        self.program.len()
    }
}
