//! Judging pipeline.
//!
//! Adapters define compile/run commands per language; the compiler turns
//! source into a [`crate::core::types::CompiledArtifact`]; the engine runs it
//! against a task's test cases and scores the result.

pub mod adapter;
pub mod compiler;
pub mod engine;
pub mod languages;

use crate::config::loader::CompilersConfig;
use crate::config::types::Language;
use crate::judge::adapter::JudgeAdapter;
use crate::judge::compiler::CompileFailure;
use crate::judge::languages::cpp::CppAdapter;

pub use compiler::{Compiler, ToolchainCompiler};
pub use engine::Judge;

/// Adapter registry. Recognised languages without a backend fail explicitly.
pub fn adapter_for(
    language: Language,
    compilers: &CompilersConfig,
) -> Result<Box<dyn JudgeAdapter>, CompileFailure> {
    match language {
        Language::Cpp => Ok(Box::new(CppAdapter::new(compilers.cpp.clone()))),
        Language::CSharp | Language::Python => Err(CompileFailure::UnsupportedLanguage(language)),
    }
}
