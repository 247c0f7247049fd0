/// Judge audit trail.
///
/// Every event is mirrored to the `log` facade at a level matching its
/// severity and, when an audit path is configured, appended as one JSON
/// object per line.
use crate::config::types::{JudgeError, Language, Result, ResultCode};
use crate::core::types::KillReport;
use chrono::{SecondsFormat, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeEventType {
    JudgeStart,
    JudgeEnd,
    CompileFailure,
    AdmissionRejected,
    WallClockViolation,
    MemoryLimitViolation,
    ProcessGroupKilled,
    LingeringDescendants,
    CleanupSuccess,
    CleanupFailure,
}

impl JudgeEventType {
    pub fn default_severity(&self) -> Severity {
        match self {
            JudgeEventType::CleanupFailure | JudgeEventType::LingeringDescendants => Severity::High,
            JudgeEventType::AdmissionRejected
            | JudgeEventType::WallClockViolation
            | JudgeEventType::MemoryLimitViolation
            | JudgeEventType::ProcessGroupKilled => Severity::Medium,
            JudgeEventType::JudgeStart
            | JudgeEventType::JudgeEnd
            | JudgeEventType::CompileFailure
            | JudgeEventType::CleanupSuccess => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeEvent {
    /// RFC 3339, UTC
    pub timestamp: String,
    pub event_type: JudgeEventType,
    pub severity: Severity,
    pub details: String,
    pub process_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<ResultCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_report: Option<KillReport>,
}

impl JudgeEvent {
    pub fn new(event_type: JudgeEventType, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            severity: event_type.default_severity(),
            event_type,
            details: details.into(),
            process_id: std::process::id(),
            run_id: None,
            task_id: None,
            language: None,
            source_sha256: None,
            result_code: None,
            kill_report: None,
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_submission(mut self, task_id: i64, language: Language, source_sha256: &str) -> Self {
        self.task_id = Some(task_id);
        self.language = Some(language);
        self.source_sha256 = Some(source_sha256.to_string());
        self
    }

    pub fn with_result_code(mut self, code: ResultCode) -> Self {
        self.result_code = Some(code);
        self
    }

    pub fn with_kill_report(mut self, report: KillReport) -> Self {
        self.kill_report = Some(report);
        self
    }
}

/// File-backed JSON-lines sink
pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                JudgeError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| JudgeError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn write_event(&self, event: &JudgeEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialise audit event: {}", e);
                return;
            }
        };

        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write audit log {}: {}", self.path.display(), e);
                }
            }
            Err(_) => error!("Audit log lock poisoned"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

static AUDIT_LOG: OnceLock<AuditLog> = OnceLock::new();

/// Install the process-wide audit sink. `None` keeps events on the log facade.
pub fn init_audit_log(path: Option<PathBuf>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let sink = AuditLog::open(path)?;
    let shown = sink.path().display().to_string();
    if AUDIT_LOG.set(sink).is_err() {
        warn!("Audit log already initialised; ignoring {}", shown);
    } else {
        info!("Audit log writing to {}", shown);
    }
    Ok(())
}

pub fn record(event: JudgeEvent) {
    let label = serde_json::to_value(event.event_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let run = event.run_id.as_deref().unwrap_or("-");
    match event.severity {
        Severity::High => error!("AUDIT {} [{}] {}", label, run, event.details),
        Severity::Medium => warn!("AUDIT {} [{}] {}", label, run, event.details),
        Severity::Low => info!("AUDIT {} [{}] {}", label, run, event.details),
    }

    if let Some(sink) = AUDIT_LOG.get() {
        sink.write_event(&event);
    }
}

/// Hex SHA-256 of submitted source; the audit trail never stores source text.
pub fn source_digest(source: &str) -> String {
    Sha256::digest(source.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn judge_start(task_id: i64, language: Language, digest: &str, test_count: usize) {
    record(
        JudgeEvent::new(
            JudgeEventType::JudgeStart,
            format!("judging task {} against {} test(s)", task_id, test_count),
        )
        .with_submission(task_id, language, digest),
    );
}

pub fn judge_end(task_id: i64, language: Language, digest: &str, code: ResultCode, points: u64) {
    record(
        JudgeEvent::new(
            JudgeEventType::JudgeEnd,
            format!("task {} finished {} with {} point(s)", task_id, code, points),
        )
        .with_submission(task_id, language, digest)
        .with_result_code(code),
    );
}

pub fn compile_failure(run_id: &str, language: Language, diagnostic_bytes: usize) {
    record(
        JudgeEvent::new(
            JudgeEventType::CompileFailure,
            format!("{} compilation rejected ({} bytes of diagnostics)", language, diagnostic_bytes),
        )
        .with_run_id(run_id),
    );
}

pub fn admission_rejected(capacity: usize, waited_ms: u64) {
    record(JudgeEvent::new(
        JudgeEventType::AdmissionRejected,
        format!("all {} slot(s) busy after {} ms", capacity, waited_ms),
    ));
}

pub fn wall_clock_violation(label: &str, used_ms: u64, limit_ms: u64) {
    record(
        JudgeEvent::new(
            JudgeEventType::WallClockViolation,
            format!("wall clock {} ms exceeded limit {} ms", used_ms, limit_ms),
        )
        .with_run_id(label),
    );
}

pub fn memory_limit_violation(run_id: &str, peak: Option<u64>, limit: u64) {
    let observed = peak.map_or_else(|| "unknown".to_string(), |p| format!("{} bytes", p));
    record(
        JudgeEvent::new(
            JudgeEventType::MemoryLimitViolation,
            format!("memory ceiling {} bytes breached (peak {})", limit, observed),
        )
        .with_run_id(run_id),
    );
}

pub fn process_group_killed(label: &str, report: &KillReport) {
    record(
        JudgeEvent::new(
            JudgeEventType::ProcessGroupKilled,
            format!("process group terminated after {} ms", report.waited_ms),
        )
        .with_run_id(label)
        .with_kill_report(report.clone()),
    );
}

pub fn lingering_descendants(label: &str, reaped: usize, group_gone: bool) {
    record(
        JudgeEvent::new(
            JudgeEventType::LingeringDescendants,
            format!(
                "descendants outlived the leader: {} reaped, group {}",
                reaped,
                if group_gone { "gone" } else { "still present" }
            ),
        )
        .with_run_id(label),
    );
}

pub fn cleanup_success(run_id: &str, dir: &Path) {
    record(
        JudgeEvent::new(
            JudgeEventType::CleanupSuccess,
            format!("removed {}", dir.display()),
        )
        .with_run_id(run_id),
    );
}

pub fn cleanup_failure(run_id: &str, reason: &str) {
    record(JudgeEvent::new(JudgeEventType::CleanupFailure, reason).with_run_id(run_id));
}
