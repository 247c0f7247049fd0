// Judge metrics.
//
// Counters, gauges and latency histograms covering admission, per-run
// verdicts, final result codes and scratch cleanup, exported in the
// Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{ResultCode, RunVerdict};

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down, never below zero)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Cumulative-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for compile-plus-run pipelines (10 ms to 60 s)
    pub fn new_latency() -> Self {
        let bounds = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];
        Self {
            buckets: bounds
                .iter()
                .map(|&le| HistogramBucket {
                    le,
                    count: AtomicU64::new(0),
                })
                .collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for bucket in &self.buckets {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, self.get_count());
        let _ = writeln!(out, "{}_sum {}", name, self.get_sum_micros() as f64 / 1_000_000.0);
        let _ = writeln!(out, "{}_count {}", name, self.get_count());
    }
}

#[derive(Debug, Default)]
pub struct RunCounters {
    pub success: Counter,
    pub time_limit: Counter,
    pub memory_limit: Counter,
    pub runtime_error: Counter,
}

#[derive(Debug, Default)]
pub struct ResultCounters {
    pub compile_error: Counter,
    pub time_limit: Counter,
    pub memory_limit: Counter,
    pub runtime_error: Counter,
    pub success: Counter,
    pub incorrect_answer: Counter,
}

impl ResultCounters {
    pub fn for_code(&self, code: ResultCode) -> &Counter {
        match code {
            ResultCode::CompileError => &self.compile_error,
            ResultCode::TimeLimit => &self.time_limit,
            ResultCode::MemoryLimit => &self.memory_limit,
            ResultCode::RuntimeError => &self.runtime_error,
            ResultCode::Success => &self.success,
            ResultCode::IncorrectAnswer => &self.incorrect_answer,
        }
    }
}

/// Process-wide metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Admission
    pub admission_accepted: Counter,
    pub admission_rejected: Counter,
    pub active_judgements: Gauge,

    // Outcomes
    pub runs: RunCounters,
    pub results: ResultCounters,
    pub judge_errors: Counter,
    pub compilations_ok: Counter,
    pub compilations_failed: Counter,

    // Scratch cleanup
    pub cleanup_success: Counter,
    pub cleanup_failure: Counter,

    pub judgement_duration: Histogram,
    pub run_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            admission_accepted: Counter::new(),
            admission_rejected: Counter::new(),
            active_judgements: Gauge::new(),
            runs: RunCounters::default(),
            results: ResultCounters::default(),
            judge_errors: Counter::new(),
            compilations_ok: Counter::new(),
            compilations_failed: Counter::new(),
            cleanup_success: Counter::new(),
            cleanup_failure: Counter::new(),
            judgement_duration: Histogram::new_latency(),
            run_duration: Histogram::new_latency(),
        }
    }

    pub fn record_run(&self, verdict: RunVerdict) {
        match verdict {
            RunVerdict::Success => self.runs.success.inc(),
            RunVerdict::TimeLimitExceeded => self.runs.time_limit.inc(),
            RunVerdict::MemoryLimitExceeded => self.runs.memory_limit.inc(),
            RunVerdict::RuntimeError => self.runs.runtime_error.inc(),
        }
    }

    pub fn record_run_duration(&self, elapsed: Duration) {
        self.run_duration.observe(elapsed);
    }

    pub fn record_compile(&self, success: bool) {
        if success {
            self.compilations_ok.inc();
        } else {
            self.compilations_failed.inc();
        }
    }

    pub fn record_judgement(&self, code: ResultCode, elapsed: Duration) {
        self.results.for_code(code).inc();
        self.judgement_duration.observe(elapsed);
    }

    pub fn record_cleanup(&self, success: bool) {
        if success {
            self.cleanup_success.inc();
        } else {
            self.cleanup_failure.inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP codejudge_admission_total Admission decisions");
        let _ = writeln!(out, "# TYPE codejudge_admission_total counter");
        let _ = writeln!(
            out,
            "codejudge_admission_total{{decision=\"accepted\"}} {}",
            self.admission_accepted.get()
        );
        let _ = writeln!(
            out,
            "codejudge_admission_total{{decision=\"rejected\"}} {}",
            self.admission_rejected.get()
        );

        let _ = writeln!(out, "# HELP codejudge_active_judgements Judgements holding a slot");
        let _ = writeln!(out, "# TYPE codejudge_active_judgements gauge");
        let _ = writeln!(out, "codejudge_active_judgements {}", self.active_judgements.get());

        let _ = writeln!(out, "# HELP codejudge_results_total Final judgement result codes");
        let _ = writeln!(out, "# TYPE codejudge_results_total counter");
        for code in ResultCode::ALL {
            let _ = writeln!(
                out,
                "codejudge_results_total{{code=\"{}\"}} {}",
                code.code(),
                self.results.for_code(code).get()
            );
        }
        let _ = writeln!(out, "# HELP codejudge_judge_errors_total Judgements ending in an error");
        let _ = writeln!(out, "# TYPE codejudge_judge_errors_total counter");
        let _ = writeln!(out, "codejudge_judge_errors_total {}", self.judge_errors.get());

        let _ = writeln!(out, "# HELP codejudge_runs_total Per-test sandbox verdicts");
        let _ = writeln!(out, "# TYPE codejudge_runs_total counter");
        for (verdict, counter) in [
            ("success", &self.runs.success),
            ("time_limit_exceeded", &self.runs.time_limit),
            ("memory_limit_exceeded", &self.runs.memory_limit),
            ("runtime_error", &self.runs.runtime_error),
        ] {
            let _ = writeln!(
                out,
                "codejudge_runs_total{{verdict=\"{}\"}} {}",
                verdict,
                counter.get()
            );
        }

        let _ = writeln!(out, "# HELP codejudge_compilations_total Compiler invocations");
        let _ = writeln!(out, "# TYPE codejudge_compilations_total counter");
        let _ = writeln!(
            out,
            "codejudge_compilations_total{{outcome=\"ok\"}} {}",
            self.compilations_ok.get()
        );
        let _ = writeln!(
            out,
            "codejudge_compilations_total{{outcome=\"failed\"}} {}",
            self.compilations_failed.get()
        );

        let _ = writeln!(out, "# HELP codejudge_cleanup_total Scratch location removals");
        let _ = writeln!(out, "# TYPE codejudge_cleanup_total counter");
        let _ = writeln!(
            out,
            "codejudge_cleanup_total{{outcome=\"success\"}} {}",
            self.cleanup_success.get()
        );
        let _ = writeln!(
            out,
            "codejudge_cleanup_total{{outcome=\"failure\"}} {}",
            self.cleanup_failure.get()
        );

        self.judgement_duration.export(
            &mut out,
            "codejudge_judgement_duration_seconds",
            "End-to-end judgement latency",
        );
        self.run_duration.export(
            &mut out,
            "codejudge_run_duration_seconds",
            "Single test execution latency",
        );
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}
