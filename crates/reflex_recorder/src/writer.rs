//! Background writer thread.
//!
//! Producers on any thread submit records; the writer drains them in
//! timestamp order, encodes them, and flushes at least once per flush
//! interval even when nothing arrives. A record that shows up after a later
//! one was already written is clamped to the last written timestamp.

use crate::codec::{Payload, Record};
use crate::encoder::RecordEncoder;
use crate::pool::BufferPool;
use anyhow::{anyhow, Context as _};
use parking_lot::{Condvar, Mutex};
use reflex_core::{RecorderConfig, ReflexError};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Queue entry ordered by timestamp, then by submission order.
struct Pending {
    sequence: u64,
    record: Record,
}

impl Pending {
    fn key(&self) -> (u64, u64) {
        (self.record.timestamp, self.sequence)
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct Queue {
    pending: BinaryHeap<Reverse<Pending>>,
    closing: bool,
}

struct WriterShared {
    label: String,
    queue: Mutex<Queue>,
    ready: Condvar,
    pool: Arc<BufferPool>,
    sequence: AtomicU64,
    alive: AtomicBool,
}

pub struct BackgroundWriter<W: Write + Send + 'static> {
    shared: Arc<WriterShared>,
    thread: Option<JoinHandle<io::Result<W>>>,
}

impl<W: Write + Send + 'static> BackgroundWriter<W> {
    /// Write the recording header to `inner` and start the writer thread.
    pub fn spawn(label: impl Into<String>, inner: W, config: &RecorderConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let label = label.into();
        let shared = Arc::new(WriterShared {
            label: label.clone(),
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            pool: Arc::new(BufferPool::new(config.pool_capacity)),
            sequence: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        });
        let encoder = RecordEncoder::new(inner, config.flush_threshold_bytes);
        let flush_interval = config.flush_interval();

        let thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("recorder-{}", label))
                .spawn(move || {
                    let result = write_loop(&shared, encoder, flush_interval);
                    shared.alive.store(false, Ordering::Release);
                    if let Err(e) = &result {
                        tracing::error!("Recorder '{}' writer failed: {}", shared.label, e);
                    }
                    result
                })
                .with_context(|| format!("Failed to spawn recorder writer '{}'", label))?
        };
        tracing::debug!("Recorder '{}' writer started", label);

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Buffers for byte payloads; they come back here once encoded.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.shared.pool
    }

    /// Queue a record. Records may arrive out of timestamp order.
    pub fn submit(&self, record: Record) -> Result<(), ReflexError> {
        if !self.shared.alive.load(Ordering::Acquire) {
            return Err(ReflexError::illegal(format!("recorder '{}' writer has stopped", self.shared.label)));
        }
        let mut queue = self.shared.queue.lock();
        if queue.closing {
            return Err(ReflexError::illegal(format!("recorder '{}' is closing", self.shared.label)));
        }
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        queue.pending.push(Reverse(Pending { sequence, record }));
        drop(queue);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Write everything still queued, flush, and hand back the sink.
    pub fn close(mut self) -> anyhow::Result<W> {
        self.begin_close();
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("recorder '{}' writer already joined", self.shared.label))?;
        match thread.join() {
            Ok(result) => result.with_context(|| format!("Failed to finish recording '{}'", self.shared.label)),
            Err(_) => Err(anyhow!("recorder '{}' writer panicked", self.shared.label)),
        }
    }

    fn begin_close(&self) {
        self.shared.queue.lock().closing = true;
        self.shared.ready.notify_one();
    }
}

impl<W: Write + Send + 'static> Drop for BackgroundWriter<W> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.begin_close();
        }
    }
}

fn write_loop<W: Write>(shared: &WriterShared, mut encoder: RecordEncoder<W>, flush_interval: Duration) -> io::Result<W> {
    let mut last_flush = Instant::now();
    loop {
        let (batch, closing) = {
            let mut queue = shared.queue.lock();
            if queue.pending.is_empty() && !queue.closing {
                shared.ready.wait_until(&mut queue, last_flush + flush_interval);
            }
            let mut batch = Vec::with_capacity(queue.pending.len());
            while let Some(Reverse(pending)) = queue.pending.pop() {
                batch.push(pending.record);
            }
            (batch, queue.closing)
        };

        for mut record in batch {
            let floor = encoder.last_timestamp();
            if record.timestamp < floor {
                tracing::warn!(
                    "Recorder '{}': channel {} record at {} arrived after {}, clamping",
                    shared.label,
                    record.channel,
                    record.timestamp,
                    floor
                );
                record.timestamp = floor;
            }
            if let Err(e) = encoder.encode(&record) {
                if e.kind() != io::ErrorKind::InvalidInput {
                    return Err(e);
                }
                tracing::error!(
                    "Recorder '{}': dropping unencodable record on channel {}: {}",
                    shared.label,
                    record.channel,
                    e
                );
            }
            if let Payload::Bytes(buffer) = record.payload {
                shared.pool.give(buffer);
            }
        }

        if closing {
            return encoder.finish();
        }
        if last_flush.elapsed() >= flush_interval {
            encoder.flush()?;
            last_flush = Instant::now();
        }
    }
}
