use crate::config::loader::JudgeConfig;
use crate::config::types::{
    JudgeError, JudgeResult, ResourceLimits, Result, ResultCode, RunVerdict, Submission, TestCase,
};
use crate::core::cancel::CancelToken;
use crate::core::runner::{ProcessSandbox, SandboxRunner};
use crate::core::types::CompiledArtifact;
use crate::judge::compiler::{CompileFailure, Compiler, ToolchainCompiler};
use crate::kernel::cgroup::MemoryEnforcement;
use crate::kernel::signal::enable_child_subreaper;
use crate::observability::{audit, metrics};
use crate::safety::admission::AdmissionGate;
use crate::safety::workspace::ScratchSpace;
use crate::store::TestCaseStore;
use crate::verdict::normalize_output;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Orchestrates compile, run-per-test and scoring for one submission at a time
/// per admission slot. Cheap to share behind an `Arc` across worker threads.
pub struct Judge {
    compiler: Arc<dyn Compiler>,
    runner: Arc<dyn SandboxRunner>,
    admission: AdmissionGate,
    config: Arc<JudgeConfig>,
}

impl Judge {
    /// Production wiring: g++ toolchain, process sandbox and the configured
    /// memory backend. Also sweeps scratch directories left by a crashed
    /// previous process.
    pub fn new(config: JudgeConfig) -> Result<Self> {
        config.validate()?;
        if config.child_subreaper {
            enable_child_subreaper();
        }

        let enforcement = MemoryEnforcement::resolve(config.memory_backend, &config.cgroup_root)?;
        let scratch = Arc::new(ScratchSpace::new(&config.scratch_root)?);
        if config.stale_scratch_secs > 0 {
            let swept = scratch.sweep_stale(Duration::from_secs(config.stale_scratch_secs))?;
            if swept > 0 {
                log::info!("Removed {} stale scratch location(s)", swept);
            }
        }
        log::info!(
            "Judge ready: scratch {}, memory backend {}, {} slot(s)",
            scratch.root().display(),
            enforcement.name(),
            config.admission.max_concurrent
        );

        let compiler = ToolchainCompiler::from_config(&config, scratch, enforcement.clone());
        let runner = ProcessSandbox::new(enforcement);
        Self::with_components(config, Arc::new(compiler), Arc::new(runner))
    }

    /// Assemble from explicit parts; used to substitute the compiler or
    /// runner.
    pub fn with_components(
        config: JudgeConfig,
        compiler: Arc<dyn Compiler>,
        runner: Arc<dyn SandboxRunner>,
    ) -> Result<Self> {
        config.validate()?;
        let admission = AdmissionGate::from_config(&config.admission)?;
        Ok(Self {
            compiler,
            runner,
            admission,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionGate {
        &self.admission
    }

    /// Judge one submission against every test case of its task.
    ///
    /// Returns `Ok` for every verdict, compile errors included. `Err` is
    /// reserved for request errors (unknown language, no tests, admission
    /// timeout, cancellation) and infrastructure failures.
    pub fn judge(
        &self,
        submission: &Submission,
        tests: &dyn TestCaseStore,
        cancel: &CancelToken,
    ) -> Result<JudgeResult> {
        let started = Instant::now();
        let outcome = self.judge_inner(submission, tests, cancel);

        let registry = metrics::get_metrics();
        match &outcome {
            Ok(result) => registry.record_judgement(result.result_code, started.elapsed()),
            Err(e) => {
                registry.judge_errors.inc();
                if e.is_request_error() {
                    log::info!("Task {} rejected: {}", submission.task_id, e);
                } else {
                    log::error!("Task {} failed: {}", submission.task_id, e);
                }
            }
        }
        outcome
    }

    fn judge_inner(
        &self,
        submission: &Submission,
        tests: &dyn TestCaseStore,
        cancel: &CancelToken,
    ) -> Result<JudgeResult> {
        let language = submission.language;
        if !self.compiler.supports(language) {
            return Err(JudgeError::UnknownLanguage(language.to_string()));
        }

        let _slot = self.admission.acquire(cancel)?;

        // Fetched before compiling so a task without tests never spawns anything.
        let mut cases = tests.fetch_by_task_id(submission.task_id)?;
        if cases.is_empty() {
            return Err(JudgeError::TestsNotFound(submission.task_id));
        }
        cases.sort_by_key(|case| case.id);

        let digest = audit::source_digest(&submission.source_code);
        audit::judge_start(submission.task_id, language, &digest, cases.len());

        let mut artifact = match self
            .compiler
            .compile(&submission.source_code, language, cancel)
        {
            Ok(artifact) => artifact,
            Err(CompileFailure::Diagnostics(diagnostics)) => {
                let result = JudgeResult::compile_error(diagnostics);
                audit::judge_end(submission.task_id, language, &digest, result.result_code, 0);
                return Ok(result);
            }
            Err(CompileFailure::UnsupportedLanguage(language)) => {
                return Err(JudgeError::UnknownLanguage(language.to_string()));
            }
            Err(CompileFailure::Infrastructure(e)) => return Err(e),
        };

        let limits = self.config.limits_for(submission.task_id);
        let scored = self.run_tests(&artifact, &cases, &limits, cancel);
        artifact.destroy();

        let result = scored?;
        audit::judge_end(
            submission.task_id,
            language,
            &digest,
            result.result_code,
            result.points,
        );
        Ok(result)
    }

    /// Run cases in ascending id order, stopping at the first failure.
    fn run_tests(
        &self,
        artifact: &CompiledArtifact,
        cases: &[TestCase],
        limits: &ResourceLimits,
        cancel: &CancelToken,
    ) -> Result<JudgeResult> {
        let mut points: u64 = 0;

        for case in cases {
            if cancel.is_cancelled() {
                return Err(JudgeError::Cancelled);
            }
            let outcome = self.runner.run(artifact, &case.input, limits, cancel)?;
            log::debug!(
                "[{}] test {}: {}",
                artifact.run_id(),
                case.id,
                outcome.verdict
            );

            match outcome.verdict {
                RunVerdict::TimeLimitExceeded => {
                    return Ok(JudgeResult::new(ResultCode::TimeLimit, "", points));
                }
                RunVerdict::MemoryLimitExceeded => {
                    return Ok(JudgeResult::new(ResultCode::MemoryLimit, "", points));
                }
                RunVerdict::RuntimeError => {
                    return Ok(JudgeResult::new(
                        ResultCode::RuntimeError,
                        outcome.diagnostic,
                        points,
                    ));
                }
                RunVerdict::Success => {
                    if outcome.captured_output != normalize_output(&case.expected_output) {
                        return Ok(JudgeResult::incorrect_answer(case.id, points));
                    }
                    points = points.saturating_add(case.points);
                }
            }
        }

        Ok(JudgeResult::new(ResultCode::Success, "", points))
    }
}
