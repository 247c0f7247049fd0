/// Scratch locations for submitted sources and compiled binaries.
///
/// Every judge invocation gets its own directory named by a v4 UUID, so
/// concurrent submissions never collide. Destruction is idempotent and never
/// fails loudly: problems go to the audit trail and metrics.
use crate::config::types::{JudgeError, Result};
use crate::observability::{audit, metrics};
use crate::safety::safe_cleanup;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// How a destroy call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    Removed,
    /// Directory was already missing on disk
    AlreadyGone,
    /// An earlier destroy call already ran
    AlreadyDestroyed,
    Failed(String),
}

/// Root directory under which scratch locations are created.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    /// Create (if needed) a private root directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&root)
            .map_err(|e| {
                JudgeError::Filesystem(format!(
                    "Failed to create scratch root {}: {}",
                    root.display(),
                    e
                ))
            })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, uniquely named location.
    pub fn create(&self) -> Result<ScratchLocation> {
        let run_id = Uuid::new_v4().to_string();
        let dir = self.root.join(&run_id);

        fs::DirBuilder::new().mode(0o700).create(&dir).map_err(|e| {
            JudgeError::Filesystem(format!(
                "Failed to create scratch directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        log::debug!("Created scratch location {}", dir.display());
        Ok(ScratchLocation {
            run_id,
            dir,
            destroyed: false,
        })
    }

    /// Destroy a location created by this space.
    pub fn destroy(&self, location: &mut ScratchLocation) -> DestroyOutcome {
        location.destroy()
    }

    /// Remove leftovers of crashed processes older than `max_age`.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(JudgeError::Filesystem(format!(
                    "Failed to read scratch root {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let now = SystemTime::now();
        let mut swept = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_run_dir = entry
                .file_name()
                .to_str()
                .map(|name| Uuid::parse_str(name).is_ok())
                .unwrap_or(false);
            if !is_run_dir {
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if !matches!(age, Some(age) if age >= max_age) {
                continue;
            }

            match safe_cleanup::remove_tree_secure(&path) {
                Ok(_) => {
                    log::info!("Swept stale scratch location {}", path.display());
                    swept += 1;
                }
                Err(e) => log::warn!("Failed to sweep {}: {}", path.display(), e),
            }
        }
        Ok(swept)
    }
}

/// One submission's private directory.
#[derive(Debug)]
pub struct ScratchLocation {
    run_id: String,
    dir: PathBuf,
    destroyed: bool,
}

impl ScratchLocation {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Write a file inside the location and return its path.
    pub fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, content).map_err(|e| {
            JudgeError::Filesystem(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    pub fn mark_executable(&self, path: &Path) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| {
            JudgeError::Filesystem(format!("Failed to chmod {}: {}", path.display(), e))
        })
    }

    /// Remove the location (idempotent).
    pub fn destroy(&mut self) -> DestroyOutcome {
        if self.destroyed {
            return DestroyOutcome::AlreadyDestroyed;
        }
        self.destroyed = true;

        let outcome = match safe_cleanup::remove_tree_secure(&self.dir) {
            Ok(report) if report.dirs == 0 && report.files == 0 => DestroyOutcome::AlreadyGone,
            Ok(_) => DestroyOutcome::Removed,
            Err(e) => DestroyOutcome::Failed(e.to_string()),
        };

        let registry = metrics::get_metrics();
        match &outcome {
            DestroyOutcome::Failed(reason) => {
                registry.record_cleanup(false);
                log::warn!(
                    "Failed to remove scratch location {}: {}",
                    self.dir.display(),
                    reason
                );
                audit::cleanup_failure(&self.run_id, reason);
            }
            _ => {
                registry.record_cleanup(true);
                audit::cleanup_success(&self.run_id, &self.dir);
            }
        }
        outcome
    }
}

impl Drop for ScratchLocation {
    fn drop(&mut self) {
        if !self.destroyed {
            let _ = self.destroy();
        }
    }
}
