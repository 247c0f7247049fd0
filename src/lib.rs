//! codejudge: compile untrusted submissions and judge them against hidden
//! test cases under wall-clock and memory ceilings.
//!
//! # Architecture
//!
//! ## Judging pipeline ([`judge`])
//! - [`judge::adapter`]: Per-language compile/run commands
//! - [`judge::compiler`]: Toolchain invocation producing a compiled artifact
//! - [`judge::engine`]: Admission, ordered test execution and short-circuit scoring
//!
//! ## Sandbox runtime ([`core`])
//! - [`core::supervisor`]: Spawn, deadline polling, process-group kill and reap
//! - [`core::runner`]: Sandbox runner contract and the process-backed implementation
//! - [`core::cancel`]: Cooperative cancellation token
//!
//! ## Kernel primitives ([`kernel`])
//! - [`kernel::cgroup`]: cgroup v2 memory ceilings and accounting
//! - [`kernel::rlimit`]: Address-space, stack and core-dump rlimits
//! - [`kernel::signal`]: Subreaper, process-group termination, shutdown signals
//!
//! ## Verdicts ([`verdict`])
//! - [`verdict::classifier`]: Evidence to run verdict, output normalisation
//!
//! ## Safety & cleanup ([`safety`])
//! - [`safety::workspace`]: Per-submission scratch locations
//! - [`safety::safe_cleanup`]: Symlink-safe recursive removal
//! - [`safety::admission`]: Bounded concurrency with queue timeout
//!
//! ## Storage, configuration and observability
//! - [`store`]: Test-case store contract and JSON-backed memory store
//! - [`config`]: Shared types and `judge.json` loading
//! - [`observability`]: Audit trail and Prometheus metrics
//! - [`utils::output`]: Bounded output collection

pub mod kernel;

pub mod core;

pub mod judge;

pub mod verdict;

pub mod safety;

pub mod store;

pub mod observability;

pub mod config;

pub mod utils;

// CLI entrypoint for the `judge` binary.
pub mod cli;

pub use config::types::*;
pub use judge::Judge;
pub use store::{MemoryStore, TestCaseStore};
