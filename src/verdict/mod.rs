//! Verdict classification
//!
//! Turns supervisor evidence into a [`crate::config::types::RunVerdict`].

pub mod classifier;

pub use classifier::{normalize_output, VerdictClassifier};
