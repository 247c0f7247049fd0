use crate::config::loader::JudgeConfig;
use crate::config::types::{ExecutionOutcome, JudgeError, ResourceLimits, Result, RunVerdict};
use crate::core::cancel::CancelToken;
use crate::core::supervisor;
use crate::core::types::{CompiledArtifact, LaunchSpec};
use crate::kernel::cgroup::MemoryEnforcement;
use crate::kernel::signal::enable_child_subreaper;
use crate::observability::{audit, metrics};
use crate::verdict::VerdictClassifier;

/// Executes a compiled artifact against one input under resource ceilings.
///
/// Implementations keep no state between calls and must allow concurrent
/// calls against different artifacts.
pub trait SandboxRunner: Send + Sync {
    fn run(
        &self,
        artifact: &CompiledArtifact,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome>;
}

/// Input is delivered newline-terminated, as line-oriented readers expect.
fn stdin_bytes(input: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(input.len() + 1);
    bytes.extend_from_slice(input.as_bytes());
    if !input.ends_with('\n') {
        bytes.push(b'\n');
    }
    bytes
}

/// Runs artifacts as real child processes via the supervisor.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    enforcement: MemoryEnforcement,
}

impl ProcessSandbox {
    pub fn new(enforcement: MemoryEnforcement) -> Self {
        Self { enforcement }
    }

    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        if config.child_subreaper {
            enable_child_subreaper();
        }
        let enforcement = MemoryEnforcement::resolve(config.memory_backend, &config.cgroup_root)?;
        Ok(Self::new(enforcement))
    }

    pub fn enforcement(&self) -> &MemoryEnforcement {
        &self.enforcement
    }
}

impl SandboxRunner for ProcessSandbox {
    fn run(
        &self,
        artifact: &CompiledArtifact,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        if artifact.is_destroyed() {
            return Err(JudgeError::Filesystem(format!(
                "artifact {} was already destroyed",
                artifact.run_id()
            )));
        }

        let stdin = stdin_bytes(input);
        let spec = LaunchSpec {
            argv: artifact.command(),
            workdir: artifact.workdir(),
            stdin: &stdin,
            limits,
            enforcement: &self.enforcement,
            label: artifact.run_id(),
        };
        let evidence = supervisor::launch(&spec, cancel)?;
        let outcome = VerdictClassifier::classify(&evidence, limits);

        if outcome.verdict == RunVerdict::MemoryLimitExceeded {
            audit::memory_limit_violation(
                artifact.run_id(),
                outcome.stats.peak_memory_bytes,
                limits.memory_bytes,
            );
        }
        let registry = metrics::get_metrics();
        registry.record_run(outcome.verdict);
        registry.record_run_duration(evidence.wall_time);
        log::debug!(
            "[{}] run verdict {} in {} ms",
            artifact.run_id(),
            outcome.verdict,
            outcome.stats.wall_time_ms
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_gets_exactly_one_trailing_newline() {
        assert_eq!(stdin_bytes("2 2"), b"2 2\n");
        assert_eq!(stdin_bytes("2 2\n"), b"2 2\n");
        assert_eq!(stdin_bytes(""), b"\n");
    }
}
