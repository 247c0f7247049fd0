use crate::config::loader::ToolchainConfig;
use crate::config::types::Language;
use std::path::Path;

/// Judge adapter contract for language-specific compile/run commands.
pub trait JudgeAdapter: Send + Sync {
    fn language(&self) -> Language;
    fn source_file_name(&self) -> &'static str;
    fn binary_file_name(&self) -> &'static str;
    fn toolchain(&self) -> &ToolchainConfig;
    fn compile_command(&self, source: &Path, binary: &Path) -> Vec<String>;
    fn run_command(&self, binary: &Path) -> Vec<String>;
}

/// Expand `{source}` / `{binary}` placeholders in configured arguments.
pub fn expand_toolchain_args(toolchain: &ToolchainConfig, source: &Path, binary: &Path) -> Vec<String> {
    let source = source.to_string_lossy();
    let binary = binary.to_string_lossy();
    std::iter::once(toolchain.path.clone())
        .chain(toolchain.args.iter().map(|arg| {
            arg.replace("{source}", &source)
                .replace("{binary}", &binary)
        }))
        .collect()
}
