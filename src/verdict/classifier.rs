/// Run verdict classification
///
/// A pure function over the evidence gathered by the supervisor. Precedence:
/// judge-initiated deadline kill, then memory breach evidence, then abnormal
/// termination, then success.
use crate::config::types::{ExecutionOutcome, ResourceLimits, RunStats, RunVerdict};
use crate::core::types::LaunchOutcome;

/// Longest output excerpt kept in a timeout diagnostic.
const PARTIAL_OUTPUT_EXCERPT: usize = 4096;

/// Strip trailing newlines (LF or CRLF) for comparison.
pub fn normalize_output(raw: &str) -> &str {
    raw.trim_end_matches(|c: char| c == '\n' || c == '\r')
}

pub struct VerdictClassifier;

impl VerdictClassifier {
    pub fn classify(evidence: &LaunchOutcome, limits: &ResourceLimits) -> ExecutionOutcome {
        let output = String::from_utf8_lossy(&evidence.output);
        let stats = Self::stats(evidence);

        if evidence.timed_out {
            return ExecutionOutcome {
                verdict: RunVerdict::TimeLimitExceeded,
                captured_output: String::new(),
                diagnostic: Self::timeout_diagnostic(limits, &output),
                stats,
            };
        }

        if Self::memory_breached(evidence, limits) {
            return ExecutionOutcome {
                verdict: RunVerdict::MemoryLimitExceeded,
                captured_output: String::new(),
                diagnostic: format!(
                    "memory limit of {} bytes exceeded ({})",
                    limits.memory_bytes,
                    evidence.status_text()
                ),
                stats,
            };
        }

        if !evidence.exited_cleanly() {
            return ExecutionOutcome {
                verdict: RunVerdict::RuntimeError,
                captured_output: String::new(),
                diagnostic: format!("Error Info: {} Output: {}", evidence.status_text(), output),
                stats,
            };
        }

        let mut diagnostic = String::new();
        if evidence.output_truncated {
            diagnostic = format!(
                "output truncated to {} bytes",
                limits.output_limit_bytes
            );
        }
        ExecutionOutcome {
            verdict: RunVerdict::Success,
            captured_output: normalize_output(&output).to_string(),
            diagnostic,
            stats,
        }
    }

    fn stats(evidence: &LaunchOutcome) -> RunStats {
        RunStats {
            wall_time_ms: evidence.wall_time.as_millis() as u64,
            peak_memory_bytes: evidence.peak_memory_bytes,
            exit_code: evidence.exit_code,
            signal: evidence.signal,
            output_truncated: evidence.output_truncated,
            killed_by_judge: evidence.kill_report.is_some(),
        }
    }

    fn timeout_diagnostic(limits: &ResourceLimits, partial: &str) -> String {
        let mut cut = partial.len().min(PARTIAL_OUTPUT_EXCERPT);
        while !partial.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "wall clock limit of {} ms exceeded; partial output: {}",
            limits.wall_clock_ms,
            &partial[..cut]
        )
    }

    /// Breach evidence comes from the kernel only: a cgroup OOM kill, or a
    /// resident peak at or above the ceiling. Program output is never
    /// consulted. Under rlimit a single allocation larger than the
    /// address-space headroom fails before any memory is touched, leaves no
    /// kernel trace and is judged by how the program then terminates.
    fn memory_breached(evidence: &LaunchOutcome, limits: &ResourceLimits) -> bool {
        let Some(ceiling) = limits.memory_ceiling() else {
            return false;
        };
        evidence.oom_killed
            || evidence
                .resident_peak_bytes
                .map_or(false, |peak| peak >= ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::KillReport;
    use std::time::Duration;

    fn exited(code: i32, output: &str) -> LaunchOutcome {
        LaunchOutcome {
            exit_code: Some(code),
            output: output.as_bytes().to_vec(),
            wall_time: Duration::from_millis(12),
            ..LaunchOutcome::default()
        }
    }

    #[test]
    fn clean_exit_is_success_with_normalized_output() {
        let outcome = VerdictClassifier::classify(&exited(0, "4\n\n"), &ResourceLimits::default());
        assert_eq!(outcome.verdict, RunVerdict::Success);
        assert_eq!(outcome.captured_output, "4");
        assert_eq!(outcome.stats.wall_time_ms, 12);
    }

    #[test]
    fn nonzero_exit_is_runtime_error_with_status() {
        let outcome = VerdictClassifier::classify(&exited(1, "partial"), &ResourceLimits::default());
        assert_eq!(outcome.verdict, RunVerdict::RuntimeError);
        assert_eq!(outcome.diagnostic, "Error Info: exit status 1 Output: partial");
        assert!(outcome.captured_output.is_empty());
    }

    #[test]
    fn fatal_signal_is_runtime_error() {
        let evidence = LaunchOutcome {
            signal: Some(libc::SIGSEGV),
            ..LaunchOutcome::default()
        };
        let outcome = VerdictClassifier::classify(&evidence, &ResourceLimits::default());
        assert_eq!(outcome.verdict, RunVerdict::RuntimeError);
        assert!(outcome.diagnostic.contains("SIGSEGV"));
    }

    #[test]
    fn timeout_takes_precedence_and_discards_output() {
        let evidence = LaunchOutcome {
            timed_out: true,
            signal: Some(libc::SIGKILL),
            output: b"1\n2\n".to_vec(),
            kill_report: Some(KillReport::default()),
            ..LaunchOutcome::default()
        };
        let outcome = VerdictClassifier::classify(&evidence, &ResourceLimits::default());
        assert_eq!(outcome.verdict, RunVerdict::TimeLimitExceeded);
        assert!(outcome.captured_output.is_empty());
        assert!(outcome.diagnostic.contains("1\n2\n"));
        assert!(outcome.stats.killed_by_judge);
    }

    #[test]
    fn cgroup_oom_is_memory_limit() {
        let evidence = LaunchOutcome {
            signal: Some(libc::SIGKILL),
            oom_killed: true,
            ..LaunchOutcome::default()
        };
        let outcome = VerdictClassifier::classify(&evidence, &ResourceLimits::default());
        assert_eq!(outcome.verdict, RunVerdict::MemoryLimitExceeded);
    }

    #[test]
    fn allocation_failure_message_alone_is_runtime_error() {
        let evidence = LaunchOutcome {
            exit_code: Some(1),
            output: b"open: Cannot allocate memory\n".to_vec(),
            resident_peak_bytes: Some(1_613_824),
            ..LaunchOutcome::default()
        };
        let outcome = VerdictClassifier::classify(&evidence, &ResourceLimits::default());
        assert_eq!(outcome.verdict, RunVerdict::RuntimeError);
        assert!(outcome.diagnostic.contains("Cannot allocate memory"));
    }

    #[test]
    fn resident_peak_at_ceiling_is_memory_limit() {
        let limits = ResourceLimits {
            memory_bytes: 64 << 20,
            ..ResourceLimits::default()
        };
        let aborted = LaunchOutcome {
            signal: Some(libc::SIGABRT),
            resident_peak_bytes: Some(70 << 20),
            ..LaunchOutcome::default()
        };
        assert_eq!(
            VerdictClassifier::classify(&aborted, &limits).verdict,
            RunVerdict::MemoryLimitExceeded
        );

        let clean = LaunchOutcome {
            exit_code: Some(0),
            resident_peak_bytes: Some(64 << 20),
            output: b"done\n".to_vec(),
            ..LaunchOutcome::default()
        };
        assert_eq!(
            VerdictClassifier::classify(&clean, &limits).verdict,
            RunVerdict::MemoryLimitExceeded
        );
    }

    #[test]
    fn resident_peak_below_ceiling_keeps_crash_a_runtime_error() {
        let limits = ResourceLimits {
            memory_bytes: 64 << 20,
            ..ResourceLimits::default()
        };
        let evidence = LaunchOutcome {
            signal: Some(libc::SIGSEGV),
            resident_peak_bytes: Some(4 << 20),
            ..LaunchOutcome::default()
        };
        assert_eq!(
            VerdictClassifier::classify(&evidence, &limits).verdict,
            RunVerdict::RuntimeError
        );
    }

    #[test]
    fn unenforced_memory_never_reports_breach() {
        let evidence = LaunchOutcome {
            exit_code: Some(1),
            oom_killed: true,
            ..LaunchOutcome::default()
        };
        let limits = ResourceLimits {
            enforce_memory: false,
            ..ResourceLimits::default()
        };
        let outcome = VerdictClassifier::classify(&evidence, &limits);
        assert_eq!(outcome.verdict, RunVerdict::RuntimeError);
    }

    #[test]
    fn normalization_strips_only_trailing_newlines() {
        assert_eq!(normalize_output("a\nb\r\n\n"), "a\nb");
        assert_eq!(normalize_output("  x  \n"), "  x  ");
        assert_eq!(normalize_output(""), "");
    }
}
