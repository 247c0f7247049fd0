//! Safety and cleanup
//!
//! Scratch locations that are destroyed on every exit path, symlink-safe
//! tree removal, and the admission gate bounding concurrent judgements.

pub mod admission;
pub mod safe_cleanup;
pub mod workspace;
