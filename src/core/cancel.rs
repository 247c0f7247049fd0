use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller-initiated cancellation of a judgement.
///
/// Clones share one flag. The supervisor polls it between wait attempts, so a
/// cancelled run has its process group killed within one poll interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
