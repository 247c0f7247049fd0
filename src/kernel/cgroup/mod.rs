//! Memory ceiling backends.
//!
//! - rlimit: `RLIMIT_AS` installed in `pre_exec`; breach is inferred from
//!   abnormal termination plus allocation-failure evidence
//! - cgroup v2: `memory.max` on a per-run cgroup; breach is read from
//!   `memory.events`

pub mod v2;

use crate::config::types::{JudgeError, MemoryBackendKind, Result};
use std::path::Path;

pub use v2::{CgroupV2, RunCgroup};

/// Resolved memory enforcement mechanism, shared by every run.
#[derive(Debug, Clone)]
pub enum MemoryEnforcement {
    Rlimit,
    CgroupV2(CgroupV2),
}

impl MemoryEnforcement {
    /// Resolve the configured backend. An explicit `cgroup` request fails
    /// when the hierarchy is unusable; `auto` falls back to rlimit.
    pub fn resolve(kind: MemoryBackendKind, cgroup_root: &Path) -> Result<Self> {
        match kind {
            MemoryBackendKind::Rlimit => Ok(Self::Rlimit),
            MemoryBackendKind::Cgroup => CgroupV2::probe(cgroup_root).map(Self::CgroupV2),
            MemoryBackendKind::Auto => match CgroupV2::probe(cgroup_root) {
                Ok(cgroup) => {
                    log::info!("Memory ceilings enforced by cgroup v2 at {}", cgroup.root().display());
                    Ok(Self::CgroupV2(cgroup))
                }
                Err(e) => {
                    log::info!("cgroup v2 unavailable ({}), using RLIMIT_AS", e);
                    Ok(Self::Rlimit)
                }
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rlimit => "rlimit",
            Self::CgroupV2(_) => "cgroup_v2",
        }
    }

    pub fn uses_cgroup(&self) -> bool {
        matches!(self, Self::CgroupV2(_))
    }
}

impl TryFrom<&str> for MemoryBackendKind {
    type Error = JudgeError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "auto" => Ok(Self::Auto),
            "rlimit" => Ok(Self::Rlimit),
            "cgroup" | "cgroup_v2" => Ok(Self::Cgroup),
            other => Err(JudgeError::Config(format!("unknown memory backend: {}", other))),
        }
    }
}
