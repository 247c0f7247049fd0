//! Resource limits applied in the child between fork and exec.

use crate::config::types::ResourceLimits;
use nix::sys::resource::{setrlimit, Resource};

/// `RLIMIT_AS` is set to this multiple of the memory ceiling. Address space
/// runs well ahead of resident memory, so the breach itself is judged on
/// peak RSS and the address-space limit only stops runaway growth.
pub const ADDRESS_SPACE_HEADROOM: u64 = 2;

/// Limits to install in the child. Built in the parent, applied in
/// `pre_exec`, so [`RlimitPlan::apply`] must stay async-signal-safe: no
/// allocation, no locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlimitPlan {
    pub address_space: Option<u64>,
    pub stack: Option<u64>,
    pub core_dumps_disabled: bool,
}

impl RlimitPlan {
    /// `address_space_ceiling` is false when another mechanism (cgroup)
    /// already enforces the memory limit.
    pub fn for_limits(limits: &ResourceLimits, address_space_ceiling: bool) -> Self {
        Self {
            address_space: limits
                .memory_ceiling()
                .filter(|_| address_space_ceiling)
                .map(|ceiling| ceiling.saturating_mul(ADDRESS_SPACE_HEADROOM)),
            stack: limits.stack_bytes,
            core_dumps_disabled: true,
        }
    }

    pub fn apply(&self) -> std::io::Result<()> {
        if self.core_dumps_disabled {
            apply_rlimit_value(Resource::RLIMIT_CORE, 0)?;
        }
        if let Some(bytes) = self.stack {
            apply_rlimit_value(Resource::RLIMIT_STACK, bytes)?;
        }
        if let Some(bytes) = self.address_space {
            apply_rlimit_value(Resource::RLIMIT_AS, bytes)?;
        }
        Ok(())
    }
}

fn apply_rlimit_value(resource: Resource, value: u64) -> std::io::Result<()> {
    setrlimit(resource, value as libc::rlim_t, value as libc::rlim_t).map_err(std::io::Error::from)
}
