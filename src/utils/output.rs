/// Bounded output collection
///
/// A reader thread forwards at most `max_bytes` over a channel while the
/// program runs. Anything beyond is read and dropped in the reader itself,
/// so the program never blocks on a full pipe and the judge never buffers
/// more than the cap.
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CHUNK: usize = 8192;

#[derive(Debug, Clone)]
pub struct OutputLimits {
    /// Bytes retained from the combined stream
    pub max_bytes: usize,
    /// How long to wait for EOF once the process is gone (milliseconds)
    pub collection_timeout_ms: u64,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            max_bytes: 64 * 1024 * 1024,
            collection_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedOutput {
    pub bytes: Vec<u8>,
    /// More than `max_bytes` were produced
    pub truncated: bool,
    /// EOF was observed before the collection timeout
    pub complete: bool,
}

pub struct OutputCollector {
    limits: OutputLimits,
}

impl OutputCollector {
    pub fn new(limits: OutputLimits) -> Self {
        OutputCollector { limits }
    }

    /// Start draining `stream` on a background thread.
    pub fn spawn<R: Read + Send + 'static>(&self, stream: R) -> CollectorHandle {
        let (tx, rx) = crossbeam_channel::unbounded();
        let forwarded = Arc::new(AtomicUsize::new(0));
        let reader = {
            let forwarded = Arc::clone(&forwarded);
            let max_bytes = self.limits.max_bytes;
            thread::spawn(move || drain(stream, tx, max_bytes, &forwarded))
        };
        CollectorHandle {
            rx,
            reader: Some(reader),
            limits: self.limits.clone(),
            forwarded,
        }
    }
}

enum Chunk {
    Data(Vec<u8>),
    /// The stream went past `max_bytes`; sent once
    Truncated,
}

fn drain<R: Read>(mut stream: R, tx: Sender<Chunk>, max_bytes: usize, forwarded: &AtomicUsize) {
    let mut chunk = [0u8; CHUNK];
    let mut kept = 0usize;
    let mut truncated = false;
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let take = n.min(max_bytes - kept);
                if take > 0 {
                    if tx.send(Chunk::Data(chunk[..take].to_vec())).is_err() {
                        break;
                    }
                    kept += take;
                    forwarded.store(kept, Ordering::Release);
                }
                if take < n && !truncated {
                    truncated = true;
                    if tx.send(Chunk::Truncated).is_err() {
                        break;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("output stream closed with error: {}", e);
                break;
            }
        }
    }
}

pub struct CollectorHandle {
    rx: Receiver<Chunk>,
    reader: Option<thread::JoinHandle<()>>,
    limits: OutputLimits,
    forwarded: Arc<AtomicUsize>,
}

impl CollectorHandle {
    /// Bytes the reader has handed over so far; never above `max_bytes`.
    pub fn buffered_bytes(&self) -> usize {
        self.forwarded.load(Ordering::Acquire)
    }

    /// Gather everything up to EOF or the collection timeout.
    ///
    /// Call after the writers are gone. If a writer survives (it escaped the
    /// process group), the reader thread is detached and the output is marked
    /// incomplete.
    pub fn finish(mut self) -> CollectedOutput {
        let deadline = Instant::now() + Duration::from_millis(self.limits.collection_timeout_ms);
        let mut output = CollectedOutput::default();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(Chunk::Data(bytes)) => output.bytes.extend_from_slice(&bytes),
                Ok(Chunk::Truncated) => output.truncated = true,
                Err(RecvTimeoutError::Disconnected) => {
                    output.complete = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("output collection timed out; reader thread detached");
                    break;
                }
            }
        }

        if output.complete {
            if let Some(reader) = self.reader.take() {
                let _ = reader.join();
            }
        }
        output
    }
}
