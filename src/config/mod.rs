//! Configuration
//!
//! Shared domain types, the error enum, and judge.json loading.

pub mod loader;
pub mod types;

pub use loader::JudgeConfig;
