use crate::config::loader::ToolchainConfig;
use crate::config::types::Language;
use crate::judge::adapter::{expand_toolchain_args, JudgeAdapter};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct CppAdapter {
    toolchain: ToolchainConfig,
}

impl CppAdapter {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }
}

impl JudgeAdapter for CppAdapter {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn source_file_name(&self) -> &'static str {
        "main.cpp"
    }

    fn binary_file_name(&self) -> &'static str {
        "main"
    }

    fn toolchain(&self) -> &ToolchainConfig {
        &self.toolchain
    }

    fn compile_command(&self, source: &Path, binary: &Path) -> Vec<String> {
        expand_toolchain_args(&self.toolchain, source, binary)
    }

    fn run_command(&self, binary: &Path) -> Vec<String> {
        vec![binary.to_string_lossy().to_string()]
    }
}
