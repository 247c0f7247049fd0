//! Kernel primitives
//!
//! Thin wrappers over the Linux mechanisms the supervisor relies on:
//! resource limits, cgroup v2 memory accounting, process-group signalling
//! and the seccomp filter that keeps a program inside its group.

pub mod cgroup;
pub mod rlimit;
pub mod seccomp;
pub mod signal;
