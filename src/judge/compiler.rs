use crate::config::loader::{CompilersConfig, JudgeConfig};
use crate::config::types::{JudgeError, Language};
use crate::core::cancel::CancelToken;
use crate::core::supervisor;
use crate::core::types::{CompiledArtifact, LaunchSpec};
use crate::judge::adapter_for;
use crate::kernel::cgroup::MemoryEnforcement;
use crate::observability::{audit, metrics};
use crate::safety::workspace::ScratchSpace;
use std::sync::Arc;
use thiserror::Error;

/// Why compilation produced no artifact.
#[derive(Error, Debug)]
pub enum CompileFailure {
    /// Recognised language with no configured toolchain
    #[error("no compiler backend for {0}")]
    UnsupportedLanguage(Language),

    /// The toolchain rejected the source; carries its diagnostics verbatim
    #[error("compilation failed")]
    Diagnostics(String),

    #[error(transparent)]
    Infrastructure(#[from] JudgeError),
}

pub type CompileResult<T> = std::result::Result<T, CompileFailure>;

pub trait Compiler: Send + Sync {
    fn supports(&self, language: Language) -> bool;

    /// Turn source text into a runnable artifact. Nothing is written to disk
    /// when the language has no backend, and a failed attempt leaves no
    /// scratch location behind.
    fn compile(
        &self,
        source_code: &str,
        language: Language,
        cancel: &CancelToken,
    ) -> CompileResult<CompiledArtifact>;
}

/// Invokes an external toolchain under the supervisor.
pub struct ToolchainCompiler {
    scratch: Arc<ScratchSpace>,
    compilers: CompilersConfig,
    enforcement: MemoryEnforcement,
    output_limit_bytes: usize,
}

impl ToolchainCompiler {
    pub fn new(
        scratch: Arc<ScratchSpace>,
        compilers: CompilersConfig,
        enforcement: MemoryEnforcement,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            scratch,
            compilers,
            enforcement,
            output_limit_bytes,
        }
    }

    pub fn from_config(
        config: &JudgeConfig,
        scratch: Arc<ScratchSpace>,
        enforcement: MemoryEnforcement,
    ) -> Self {
        Self::new(
            scratch,
            config.compilers.clone(),
            enforcement,
            config.limits.output_limit_bytes,
        )
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }
}

impl Compiler for ToolchainCompiler {
    fn supports(&self, language: Language) -> bool {
        adapter_for(language, &self.compilers).is_ok()
    }

    fn compile(
        &self,
        source_code: &str,
        language: Language,
        cancel: &CancelToken,
    ) -> CompileResult<CompiledArtifact> {
        let adapter = adapter_for(language, &self.compilers)?;

        // Early returns drop `location`, which removes the directory.
        let mut location = self.scratch.create()?;
        let source = location.write_file(adapter.source_file_name(), source_code.as_bytes())?;
        let binary = location.dir().join(adapter.binary_file_name());
        let argv = adapter.compile_command(&source, &binary);
        let limits = adapter.toolchain().limits(self.output_limit_bytes);

        log::debug!("[{}] compiling: {}", location.run_id(), argv.join(" "));
        let spec = LaunchSpec {
            argv: &argv,
            workdir: location.dir(),
            stdin: b"",
            limits: &limits,
            enforcement: &self.enforcement,
            label: location.run_id(),
        };
        let evidence = supervisor::launch(&spec, cancel)?;

        let registry = metrics::get_metrics();
        if !evidence.exited_cleanly() {
            registry.record_compile(false);
            let diagnostics = if evidence.timed_out {
                format!("compilation exceeded {} ms", limits.wall_clock_ms)
            } else if evidence.output.is_empty() {
                format!("compiler terminated with {}", evidence.status_text())
            } else {
                String::from_utf8_lossy(&evidence.output).into_owned()
            };
            audit::compile_failure(location.run_id(), language, diagnostics.len());
            location.destroy();
            return Err(CompileFailure::Diagnostics(diagnostics));
        }

        if !binary.is_file() {
            location.destroy();
            return Err(JudgeError::Filesystem(format!(
                "{} reported success but wrote no {}",
                adapter.toolchain().path,
                adapter.binary_file_name()
            ))
            .into());
        }
        location.mark_executable(&binary)?;
        registry.record_compile(true);

        let command = adapter.run_command(&binary);
        Ok(CompiledArtifact::new(location, binary, command, language))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::ToolchainConfig;

    fn scratch() -> Arc<ScratchSpace> {
        let root = std::env::temp_dir().join(format!("codejudge-compiler-{}", uuid::Uuid::new_v4()));
        Arc::new(ScratchSpace::new(root).unwrap())
    }

    fn entries(space: &ScratchSpace) -> usize {
        std::fs::read_dir(space.root()).unwrap().count()
    }

    /// A shell script standing in for g++: copies a prebuilt script to the
    /// binary path, or fails when the source contains "error".
    fn fake_toolchain() -> CompilersConfig {
        CompilersConfig {
            cpp: ToolchainConfig {
                path: "/bin/sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    "if grep -q error \"$1\"; then echo \"$1: error: bad\" >&2; exit 1; fi; \
                     printf '#!/bin/sh\\ncat\\n' > \"$2\""
                        .to_string(),
                    "fake-gpp".to_string(),
                    "{source}".to_string(),
                    "{binary}".to_string(),
                ],
                timeout_ms: 5_000,
                memory_mb: 0,
            },
        }
    }

    #[test]
    fn unsupported_language_touches_nothing() {
        let space = scratch();
        let compiler = ToolchainCompiler::new(
            space.clone(),
            fake_toolchain(),
            MemoryEnforcement::Rlimit,
            1 << 20,
        );

        assert!(!compiler.supports(Language::Python));
        let err = compiler
            .compile("print(1)", Language::Python, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CompileFailure::UnsupportedLanguage(Language::Python)));
        assert_eq!(entries(&space), 0);
        std::fs::remove_dir_all(space.root()).unwrap();
    }

    #[test]
    fn diagnostics_are_returned_and_location_removed() {
        let space = scratch();
        let compiler = ToolchainCompiler::new(
            space.clone(),
            fake_toolchain(),
            MemoryEnforcement::Rlimit,
            1 << 20,
        );

        let err = compiler
            .compile("int main() { error }", Language::Cpp, &CancelToken::new())
            .unwrap_err();
        match err {
            CompileFailure::Diagnostics(text) => assert!(text.contains("error: bad")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(entries(&space), 0);
        std::fs::remove_dir_all(space.root()).unwrap();
    }

    #[test]
    fn success_yields_runnable_artifact() {
        let space = scratch();
        let compiler = ToolchainCompiler::new(
            space.clone(),
            fake_toolchain(),
            MemoryEnforcement::Rlimit,
            1 << 20,
        );

        let mut artifact = compiler
            .compile("int main() {}", Language::Cpp, &CancelToken::new())
            .unwrap();
        assert!(artifact.executable().is_file());
        assert_eq!(artifact.command()[0], artifact.executable().to_string_lossy());
        assert_eq!(entries(&space), 1);

        artifact.destroy();
        assert_eq!(entries(&space), 0);
        std::fs::remove_dir_all(space.root()).unwrap();
    }

    #[test]
    fn missing_toolchain_is_infrastructure() {
        let space = scratch();
        let mut compilers = fake_toolchain();
        compilers.cpp.path = "/nonexistent/g++".to_string();
        let compiler =
            ToolchainCompiler::new(space.clone(), compilers, MemoryEnforcement::Rlimit, 1 << 20);

        let err = compiler
            .compile("int main() {}", Language::Cpp, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileFailure::Infrastructure(JudgeError::Toolchain { .. })
        ));
        assert_eq!(entries(&space), 0);
        std::fs::remove_dir_all(space.root()).unwrap();
    }
}
