use crate::config::loader::JudgeConfig;
use crate::config::types::{JudgeError, Language, Submission, TestCase};
use crate::core::cancel::CancelToken;
use crate::judge::compiler::{CompileFailure, Compiler, ToolchainCompiler};
use crate::judge::Judge;
use crate::kernel::cgroup::MemoryEnforcement;
use crate::kernel::signal::SignalHandler;
use crate::observability::{audit, metrics};
use crate::safety::workspace::ScratchSpace;
use crate::store::{MemoryStore, TestCaseStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Compile and judge submissions against hidden test cases", long_about = None)]
struct Cli {
    /// judge.json to load (defaults to ./judge.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a source file against every test case of a task
    Run {
        /// JSON array of test cases
        #[arg(long)]
        tests: PathBuf,
        /// Task whose test cases are used
        #[arg(long)]
        task: i64,
        /// Submission language (cpp, csharp, python)
        #[arg(long)]
        language: String,
        /// Source file, or `-` for stdin
        #[arg(long)]
        source: String,
        /// Print Prometheus metrics to stderr afterwards
        #[arg(long)]
        metrics: bool,
    },
    /// Compile a source file without running it
    Compile {
        #[arg(long)]
        language: String,
        #[arg(long)]
        source: PathBuf,
        /// Copy the produced binary here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Manage the JSON test-case store
    Tests {
        #[arg(long)]
        store: PathBuf,
        #[command(subcommand)]
        action: TestsAction,
    },
    /// Check whether configured toolchains are runnable
    CheckDeps {
        /// Show toolchain version lines
        #[arg(long)]
        verbose: bool,
    },
}

#[derive(Subcommand)]
enum TestsAction {
    /// List all cases, or the cases of one task
    List {
        #[arg(long)]
        task: Option<i64>,
    },
    Get {
        id: i64,
    },
    Add {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        task: i64,
        #[arg(long)]
        input: String,
        #[arg(long)]
        expected: String,
        #[arg(long, default_value_t = 0)]
        points: u64,
    },
    /// Replace fields of an existing case; `--new-id` re-keys it
    Update {
        id: i64,
        #[arg(long)]
        new_id: Option<i64>,
        #[arg(long)]
        task: Option<i64>,
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        expected: Option<String>,
        #[arg(long)]
        points: Option<u64>,
    },
    Delete {
        id: i64,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => JudgeConfig::load_from_file(path)?,
        None => JudgeConfig::load_default()?,
    };

    if let Err(e) = audit::init_audit_log(config.audit_log.clone()) {
        eprintln!("Failed to initialize audit log: {}", e);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Run {
            tests,
            task,
            language,
            source,
            metrics,
        } => run_judgement(config, &tests, task, &language, &source, metrics),
        Commands::Compile {
            language,
            source,
            output,
        } => compile_only(&config, &language, &source, output.as_deref()),
        Commands::Tests { store, action } => manage_tests(&store, action),
        Commands::CheckDeps { verbose } => check_toolchains(&config, verbose),
    }
}

fn exit_for(err: &JudgeError) -> ! {
    eprintln!("Error: {}", err);
    std::process::exit(if err.is_request_error() { 2 } else { 1 });
}

fn parse_language(name: &str) -> Language {
    Language::parse(name).unwrap_or_else(|e| exit_for(&e))
}

fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read source from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read source {}", source))
}

fn run_judgement(
    config: JudgeConfig,
    tests: &Path,
    task: i64,
    language: &str,
    source: &str,
    print_metrics: bool,
) -> Result<()> {
    let language = parse_language(language);
    let code = read_source(source)?;
    let store = MemoryStore::load_from_file(tests)
        .with_context(|| format!("Failed to load test cases from {}", tests.display()))?;

    let signals = SignalHandler::init().map_err(anyhow::Error::msg)?;
    let cancel = CancelToken::new();
    signals.cancel_on_shutdown(cancel.clone());

    let judge = Judge::new(config)?;
    let outcome = judge.judge(&Submission::new(language, code, task), &store, &cancel);

    if print_metrics {
        eprint!("{}", metrics::get_metrics().export_prometheus());
    }

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => exit_for(&e),
    }
}

fn compile_only(
    config: &JudgeConfig,
    language: &str,
    source: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let language = parse_language(language);
    let code = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read source {}", source.display()))?;

    let enforcement = MemoryEnforcement::resolve(config.memory_backend, &config.cgroup_root)?;
    let scratch = Arc::new(ScratchSpace::new(&config.scratch_root)?);
    let compiler = ToolchainCompiler::from_config(config, scratch, enforcement);

    let mut artifact = match compiler.compile(&code, language, &CancelToken::new()) {
        Ok(artifact) => artifact,
        Err(CompileFailure::Diagnostics(diagnostics)) => {
            print!("{}", diagnostics);
            std::process::exit(1);
        }
        Err(CompileFailure::UnsupportedLanguage(language)) => {
            exit_for(&JudgeError::UnknownLanguage(language.to_string()))
        }
        Err(CompileFailure::Infrastructure(e)) => exit_for(&e),
    };

    let copied = match output {
        Some(dest) => std::fs::copy(artifact.executable(), dest)
            .map(|_| Some(dest))
            .with_context(|| format!("Failed to copy binary to {}", dest.display())),
        None => Ok(None),
    };
    artifact.destroy();

    match copied? {
        Some(dest) => eprintln!("Compiled {} -> {}", source.display(), dest.display()),
        None => eprintln!("Compiled {} (binary discarded)", source.display()),
    }
    Ok(())
}

fn manage_tests(path: &Path, action: TestsAction) -> Result<()> {
    let store = MemoryStore::load_from_file(path)
        .with_context(|| format!("Failed to load test store {}", path.display()))?;

    let changed = match action {
        TestsAction::List { task } => {
            let cases = match task {
                Some(task) => {
                    let mut cases = store.fetch_by_task_id(task)?;
                    cases.sort_by_key(|case| case.id);
                    cases
                }
                None => store.get_all()?,
            };
            println!("{}", serde_json::to_string_pretty(&cases)?);
            false
        }
        TestsAction::Get { id } => {
            println!("{}", serde_json::to_string_pretty(&store.get_by_id(id)?)?);
            false
        }
        TestsAction::Add {
            id,
            task,
            input,
            expected,
            points,
        } => {
            store.add(TestCase {
                id,
                task_id: task,
                input,
                expected_output: expected,
                points,
            })?;
            true
        }
        TestsAction::Update {
            id,
            new_id,
            task,
            input,
            expected,
            points,
        } => {
            let current = store.get_by_id(id)?;
            let updated = TestCase {
                id: new_id.unwrap_or(current.id),
                task_id: task.unwrap_or(current.task_id),
                input: input.unwrap_or(current.input),
                expected_output: expected.unwrap_or(current.expected_output),
                points: points.unwrap_or(current.points),
            };
            store.update(id, updated)?;
            true
        }
        TestsAction::Delete { id } => {
            store.delete(id)?;
            true
        }
    };

    if changed {
        store.save_to_file(path)?;
        eprintln!("{} test case(s) in {}", store.len(), path.display());
    }
    Ok(())
}

fn check_toolchains(config: &JudgeConfig, verbose: bool) -> Result<()> {
    use std::process::Command;

    let toolchains = [(Language::Cpp, &config.compilers.cpp.path)];
    let mut missing = Vec::new();

    for (language, program) in toolchains {
        match Command::new(program).arg("--version").output() {
            Ok(output) if output.status.success() => {
                println!("{} - OK ({})", language, program);
                if verbose {
                    let first_line = String::from_utf8_lossy(&output.stdout)
                        .lines()
                        .next()
                        .unwrap_or("")
                        .to_string();
                    println!("  {}", first_line.trim());
                }
            }
            Ok(_) => {
                println!("{} - FAILED ({} --version exited non-zero)", language, program);
                missing.push(language);
            }
            Err(e) => {
                println!("{} - MISSING ({}: {})", language, program, e);
                missing.push(language);
            }
        }
    }
    for language in [Language::CSharp, Language::Python] {
        println!("{} - no compiler backend", language);
    }

    let enforcement = MemoryEnforcement::resolve(config.memory_backend, &config.cgroup_root);
    match enforcement {
        Ok(backend) => println!("memory backend: {}", backend.name()),
        Err(e) => println!("memory backend: unavailable ({})", e),
    }

    if missing.is_empty() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
