//! Language-agnostic execution core.
//!
//! Core owns the process model: spawning, deadline and cancellation
//! enforcement, process-group reaping, and evidence collection.
//! Language-specific compile/run commands live in judge adapters.

pub mod cancel;
pub mod runner;
pub mod supervisor;
pub mod types;
