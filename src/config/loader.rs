/// Configuration loading from judge.json
use crate::config::types::{JudgeError, MemoryBackendKind, ResourceLimits, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

fn check_mib(field: &str, mb: u64) -> Result<u64> {
    mb.checked_mul(MIB).ok_or_else(|| {
        JudgeError::Config(format!("{} = {} MiB overflows a byte count", field, mb))
    })
}

/// Default per-run ceilings, overridable per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub wall_clock_ms: u64,
    pub memory_mb: u64,
    pub enforce_wall_clock: bool,
    pub enforce_memory: bool,
    pub stack_mb: Option<u64>,
    pub output_limit_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            wall_clock_ms: 10_000,
            memory_mb: 1024,
            enforce_wall_clock: true,
            enforce_memory: true,
            stack_mb: None,
            output_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLimitOverride {
    pub wall_clock_ms: Option<u64>,
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Simultaneous compile+run pipelines
    pub max_concurrent: usize,
    /// How long a request may queue for a slot before being rejected
    pub queue_timeout_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_timeout_ms: 30_000,
        }
    }
}

impl AdmissionConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

/// External compiler invocation. `{source}` and `{binary}` in `args` are
/// substituted with the scratch paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub path: String,
    pub args: Vec<String>,
    pub timeout_ms: u64,
    pub memory_mb: u64,
}

impl ToolchainConfig {
    pub fn gpp() -> Self {
        Self {
            path: "g++".to_string(),
            args: [
                "-O2", "-std=c++17", "-pipe", "-x", "c++", "-o", "{binary}", "{source}",
            ]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
            timeout_ms: 30_000,
            memory_mb: 2048,
        }
    }

    /// Ceilings applied to the compiler process itself
    pub fn limits(&self, output_limit_bytes: usize) -> ResourceLimits {
        ResourceLimits {
            enforce_wall_clock: true,
            enforce_memory: self.memory_mb > 0,
            wall_clock_ms: self.timeout_ms,
            memory_bytes: self.memory_mb.saturating_mul(MIB),
            stack_bytes: None,
            output_limit_bytes,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self::gpp()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilersConfig {
    pub cpp: ToolchainConfig,
}

/// Full judge.json structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Parent directory of every per-submission scratch location
    pub scratch_root: PathBuf,
    pub limits: LimitsConfig,
    pub task_limits: HashMap<i64, TaskLimitOverride>,
    pub memory_backend: MemoryBackendKind,
    pub cgroup_root: PathBuf,
    pub admission: AdmissionConfig,
    pub compilers: CompilersConfig,
    /// JSON-lines audit trail; `None` keeps events on the log facade only
    pub audit_log: Option<PathBuf>,
    /// Re-parent orphaned descendants of judged programs to this process
    pub child_subreaper: bool,
    /// Scratch directories older than this are swept on startup
    pub stale_scratch_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            scratch_root: Self::default_scratch_root(),
            limits: LimitsConfig::default(),
            task_limits: HashMap::new(),
            memory_backend: MemoryBackendKind::Auto,
            cgroup_root: PathBuf::from("/sys/fs/cgroup/codejudge"),
            admission: AdmissionConfig::default(),
            compilers: CompilersConfig::default(),
            audit_log: None,
            child_subreaper: true,
            stale_scratch_secs: 3600,
        }
    }
}

impl JudgeConfig {
    /// UID-scoped so unrelated users never share scratch space.
    pub fn default_scratch_root() -> PathBuf {
        std::env::temp_dir().join(format!("codejudge-uid-{}", nix::unistd::geteuid()))
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            JudgeError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: JudgeConfig = serde_json::from_str(&content)
            .map_err(|e| JudgeError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load ./judge.json when present, built-in defaults otherwise
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| JudgeError::Config(format!("Failed to get current directory: {}", e)))?
            .join("judge.json");

        if !config_path.exists() {
            log::debug!("judge.json not found, using built-in defaults");
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.admission.max_concurrent == 0 {
            return Err(JudgeError::Config(
                "admission.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.limits.enforce_wall_clock && self.limits.wall_clock_ms == 0 {
            return Err(JudgeError::Config(
                "limits.wall_clock_ms must be positive when enforced".to_string(),
            ));
        }
        if self.limits.enforce_memory && self.limits.memory_mb == 0 {
            return Err(JudgeError::Config(
                "limits.memory_mb must be positive when enforced".to_string(),
            ));
        }
        if self.compilers.cpp.path.trim().is_empty() {
            return Err(JudgeError::Config(
                "compilers.cpp.path must not be empty".to_string(),
            ));
        }
        check_mib("limits.memory_mb", self.limits.memory_mb)?;
        if let Some(stack_mb) = self.limits.stack_mb {
            check_mib("limits.stack_mb", stack_mb)?;
        }
        check_mib("compilers.cpp.memory_mb", self.compilers.cpp.memory_mb)?;
        for (task_id, limits) in &self.task_limits {
            if limits.wall_clock_ms == Some(0) || limits.memory_mb == Some(0) {
                return Err(JudgeError::Config(format!(
                    "task_limits.{}: limits must be positive",
                    task_id
                )));
            }
            if let Some(memory_mb) = limits.memory_mb {
                check_mib(&format!("task_limits.{}.memory_mb", task_id), memory_mb)?;
            }
        }
        Ok(())
    }

    /// Effective run ceilings for a task, applying any per-task override.
    pub fn limits_for(&self, task_id: i64) -> ResourceLimits {
        let overrides = self.task_limits.get(&task_id).cloned().unwrap_or_default();
        let wall_clock_ms = overrides.wall_clock_ms.unwrap_or(self.limits.wall_clock_ms);
        let memory_mb = overrides.memory_mb.unwrap_or(self.limits.memory_mb);

        ResourceLimits {
            enforce_wall_clock: self.limits.enforce_wall_clock,
            enforce_memory: self.limits.enforce_memory,
            wall_clock_ms,
            memory_bytes: memory_mb.saturating_mul(MIB),
            stack_bytes: self.limits.stack_mb.map(|mb| mb.saturating_mul(MIB)),
            output_limit_bytes: self.limits.output_limit_bytes,
        }
    }
}
