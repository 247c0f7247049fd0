/// Admission control: a bounded pool of judging slots.
///
/// The pool is a bounded channel pre-filled with one token per slot. Taking a
/// slot receives a token; dropping the [`AdmissionSlot`] sends it back.
use crate::config::loader::AdmissionConfig;
use crate::config::types::{JudgeError, Result};
use crate::core::cancel::CancelToken;
use crate::observability::{audit, metrics};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Cancellation is checked at least this often while queued.
const QUEUE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    tokens_tx: Sender<()>,
    tokens_rx: Receiver<()>,
    capacity: usize,
    queue_timeout: Duration,
}

impl AdmissionGate {
    pub fn new(capacity: usize, queue_timeout: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(JudgeError::Config(
                "admission capacity must be at least 1".to_string(),
            ));
        }
        let (tokens_tx, tokens_rx) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            tokens_tx
                .send(())
                .map_err(|e| JudgeError::Process(format!("admission pool setup: {}", e)))?;
        }
        Ok(Self {
            tokens_tx,
            tokens_rx,
            capacity,
            queue_timeout,
        })
    }

    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        Self::new(config.max_concurrent, config.queue_timeout())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.tokens_rx.len()
    }

    /// Wait up to the queue timeout for a slot.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<AdmissionSlot> {
        let registry = metrics::get_metrics();
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(JudgeError::Cancelled);
            }
            let remaining = self.queue_timeout.saturating_sub(started.elapsed());
            match self.tokens_rx.recv_timeout(remaining.min(QUEUE_POLL)) {
                Ok(()) => {
                    registry.admission_accepted.inc();
                    registry.active_judgements.inc();
                    log::debug!(
                        "Admitted after {:?} ({} of {} slots free)",
                        started.elapsed(),
                        self.available(),
                        self.capacity
                    );
                    return Ok(AdmissionSlot {
                        tokens_tx: self.tokens_tx.clone(),
                    });
                }
                Err(RecvTimeoutError::Timeout) if remaining > QUEUE_POLL => continue,
                Err(RecvTimeoutError::Timeout) => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    registry.admission_rejected.inc();
                    audit::admission_rejected(self.capacity, waited_ms);
                    return Err(JudgeError::AdmissionRejected { waited_ms });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(JudgeError::Process(
                        "admission pool disconnected".to_string(),
                    ))
                }
            }
        }
    }
}

/// Held for the lifetime of one judgement.
#[derive(Debug)]
pub struct AdmissionSlot {
    tokens_tx: Sender<()>,
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        metrics::get_metrics().active_judgements.dec();
        if self.tokens_tx.try_send(()).is_err() {
            log::error!("Admission token could not be returned to the pool");
        }
    }
}
