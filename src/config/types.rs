/// Core types shared across the judging pipeline
use crate::store::StoreError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Source languages a submission may declare.
///
/// Every variant is recognised on the wire; whether it can actually be
/// compiled is decided by the adapter registry in [`crate::judge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
    #[serde(rename = "csharp")]
    CSharp,
    Python,
}

impl Language {
    /// Parse a user-supplied language name, accepting common aliases.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cpp" | "c++" | "cxx" | "cc" => Ok(Self::Cpp),
            "csharp" | "c#" | "cs" => Ok(Self::CSharp),
            "python" | "py" | "python3" => Ok(Self::Python),
            other => Err(JudgeError::UnknownLanguage(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One judging request. Immutable once received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub language: Language,
    #[serde(rename = "code")]
    pub source_code: String,
    #[serde(rename = "taskID")]
    pub task_id: i64,
}

impl Submission {
    pub fn new(language: Language, source_code: impl Into<String>, task_id: i64) -> Self {
        Self {
            language,
            source_code: source_code.into(),
            task_id,
        }
    }
}

/// Hidden test case belonging to a task.
///
/// Numeric fields are written as JSON numbers but read from either numbers
/// or numeric strings (`"id": "1"`), which is how existing test exports
/// encode them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(deserialize_with = "number_or_string")]
    pub id: i64,
    #[serde(rename = "taskID", deserialize_with = "number_or_string")]
    pub task_id: i64,
    pub input: String,
    #[serde(rename = "expectedResult")]
    pub expected_output: String,
    #[serde(deserialize_with = "number_or_string")]
    pub points: u64,
}

fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + std::str::FromStr,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Number(T),
        Text(String),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Classification of a single sandboxed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunVerdict {
    Success,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
}

impl RunVerdict {
    pub fn short_code(self) -> &'static str {
        match self {
            Self::Success => "OK",
            Self::TimeLimitExceeded => "TLE",
            Self::MemoryLimitExceeded => "MLE",
            Self::RuntimeError => "RE",
        }
    }
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::MemoryLimitExceeded => "memory_limit_exceeded",
            Self::RuntimeError => "runtime_error",
        };
        f.write_str(name)
    }
}

/// Measurements taken while one run was supervised.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub wall_time_ms: u64,
    /// Peak resident memory in bytes (cgroup `memory.peak` or `ru_maxrss`)
    pub peak_memory_bytes: Option<u64>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub output_truncated: bool,
    /// Judge had to kill the process group before the program exited on its own
    pub killed_by_judge: bool,
}

/// Result of one Sandbox Runner call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub verdict: RunVerdict,
    /// Normalised program output; empty unless the run succeeded
    pub captured_output: String,
    pub diagnostic: String,
    pub stats: RunStats,
}

/// Closed set of submission-level result codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    #[serde(rename = "CE")]
    CompileError,
    #[serde(rename = "TL")]
    TimeLimit,
    #[serde(rename = "ML")]
    MemoryLimit,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "SC")]
    Success,
    #[serde(rename = "IA")]
    IncorrectAnswer,
}

impl ResultCode {
    pub const ALL: [ResultCode; 6] = [
        ResultCode::CompileError,
        ResultCode::TimeLimit,
        ResultCode::MemoryLimit,
        ResultCode::RuntimeError,
        ResultCode::Success,
        ResultCode::IncorrectAnswer,
    ];

    /// Two-letter wire code
    pub fn code(self) -> &'static str {
        match self {
            Self::CompileError => "CE",
            Self::TimeLimit => "TL",
            Self::MemoryLimit => "ML",
            Self::RuntimeError => "RE",
            Self::Success => "SC",
            Self::IncorrectAnswer => "IA",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Final output of one judge invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeResult {
    pub result_code: ResultCode,
    pub description: String,
    pub points: u64,
}

impl JudgeResult {
    pub fn new(result_code: ResultCode, description: impl Into<String>, points: u64) -> Self {
        Self {
            result_code,
            description: description.into(),
            points,
        }
    }

    pub fn compile_error(diagnostics: impl Into<String>) -> Self {
        Self::new(ResultCode::CompileError, diagnostics, 0)
    }

    pub fn incorrect_answer(test_id: i64, points: u64) -> Self {
        Self::new(
            ResultCode::IncorrectAnswer,
            format!("Test Failed: {}", test_id),
            points,
        )
    }
}

/// Selected mechanism for the memory ceiling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackendKind {
    /// cgroup v2 when the configured root is usable, rlimit otherwise
    #[default]
    Auto,
    Rlimit,
    Cgroup,
}

/// Per-run resource envelope.
///
/// Each ceiling carries its own enforcement flag, so a caller can for example
/// disable the memory ceiling for a toolchain without losing the deadline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub enforce_wall_clock: bool,
    pub enforce_memory: bool,
    pub wall_clock_ms: u64,
    pub memory_bytes: u64,
    pub stack_bytes: Option<u64>,
    pub output_limit_bytes: usize,
}

impl ResourceLimits {
    pub fn wall_clock(&self) -> Option<Duration> {
        self.enforce_wall_clock
            .then(|| Duration::from_millis(self.wall_clock_ms))
    }

    pub fn memory_ceiling(&self) -> Option<u64> {
        self.enforce_memory.then_some(self.memory_bytes)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            enforce_wall_clock: true,
            enforce_memory: true,
            wall_clock_ms: 10_000,
            memory_bytes: 1024 * 1024 * 1024,
            stack_bytes: None,
            output_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Error type for judging operations.
///
/// Verdicts are never errors: a submission that times out or fails to compile
/// produces a [`JudgeResult`]. Errors are request-shape problems or
/// infrastructure failures.
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("tests not found for task {0}")]
    TestsNotFound(i64),

    #[error("admission rejected: no judging slot became free within {waited_ms} ms")]
    AdmissionRejected { waited_ms: u64 },

    #[error("judgement cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("toolchain {program} could not be started: {source}")]
    Toolchain {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Cgroup error: {0}")]
    Cgroup(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JudgeError {
    /// Caller mistakes, as opposed to infrastructure failures.
    pub fn is_request_error(&self) -> bool {
        matches!(self, Self::UnknownLanguage(_) | Self::TestsNotFound(_))
    }
}

impl From<nix::errno::Errno> for JudgeError {
    fn from(err: nix::errno::Errno) -> Self {
        JudgeError::Process(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, JudgeError>;
