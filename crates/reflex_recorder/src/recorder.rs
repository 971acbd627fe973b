//! Recording sessions: tap signals and events into one binary stream.
//!
//! Each tapped signal gets its own channel, declared on the metadata channel
//! the first time it is recorded. The recorder observes signals through their
//! change notifications and never feeds anything back into the control graph.

use crate::codec::{self, ChannelKind, Metadata, Payload, Record};
use crate::writer::BackgroundWriter;
use anyhow::Context as _;
use parking_lot::Mutex;
use reflex_core::{
    event_fn, BooleanInput, DiscreteInput, EventSource, FloatInput, Observable, RecorderConfig, ReflexError,
    SharedClock, SignalValue, Subscription,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// An open recording session writing to `W`.
pub struct Recorder<W: Write + Send + 'static> {
    label: String,
    clock: SharedClock,
    origin: Duration,
    writer: Mutex<Option<BackgroundWriter<W>>>,
    next_channel: AtomicU64,
    taps: Mutex<Vec<Subscription>>,
}

impl<W: Write + Send + 'static> Recorder<W> {
    /// Start a session. Timestamps count from the clock's current time.
    pub fn start(
        label: impl Into<String>,
        sink: W,
        clock: SharedClock,
        config: &RecorderConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let label = label.into();
        let writer = BackgroundWriter::spawn(label.clone(), sink, config)?;
        let origin = clock.now();
        tracing::info!("Recording '{}' started", label);
        Ok(Arc::new(Self {
            label,
            clock,
            origin,
            writer: Mutex::new(Some(writer)),
            next_channel: AtomicU64::new(codec::METADATA_CHANNEL + 1),
            taps: Mutex::new(Vec::new()),
        }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Current recording time in ticks.
    pub fn now_ticks(&self) -> u64 {
        codec::ticks(self.clock.now().saturating_sub(self.origin))
    }

    /// Allocate a channel and announce it on the metadata channel.
    pub fn declare(&self, name: &str, kind: ChannelKind) -> Result<u64, ReflexError> {
        if name.contains('\0') {
            return Err(ReflexError::invalid(format!("channel name {:?} contains a NUL separator", name)));
        }
        let channel = self.next_channel.fetch_add(1, Ordering::AcqRel);
        let meta = Metadata::Declare {
            channel,
            kind,
            name: name.to_string(),
        };
        self.submit_record(Record::metadata(self.now_ticks(), &meta))?;
        tracing::debug!("Recording '{}': channel {} = {} {}", self.label, channel, kind, name);
        Ok(channel)
    }

    /// Write one sample on `channel` stamped with the current time.
    pub fn submit(&self, channel: u64, payload: Payload) -> Result<(), ReflexError> {
        self.submit_record(Record::new(self.now_ticks(), channel, payload))
    }

    fn submit_record(&self, record: Record) -> Result<(), ReflexError> {
        match self.writer.lock().as_ref() {
            Some(writer) => writer.submit(record),
            None => Err(ReflexError::illegal(format!("recording '{}' is closed", self.label))),
        }
    }

    // ========================================================================
    // Signal taps
    // ========================================================================

    /// Record a float signal: its current value now, then every change.
    pub fn record_float(self: &Arc<Self>, name: &str, input: &FloatInput) -> Result<u64, ReflexError> {
        self.tap(name, ChannelKind::Float, input, |v: f32| Payload::Int(v.to_bits() as i32))
    }

    pub fn record_boolean(self: &Arc<Self>, name: &str, input: &BooleanInput) -> Result<u64, ReflexError> {
        self.tap(name, ChannelKind::Boolean, input, |v: bool| Payload::Byte(u8::from(v)))
    }

    pub fn record_discrete(self: &Arc<Self>, name: &str, input: &DiscreteInput) -> Result<u64, ReflexError> {
        self.tap(name, ChannelKind::Discrete, input, Payload::VarInt)
    }

    /// Record every firing of `source`.
    pub fn record_event<S: EventSource + ?Sized>(self: &Arc<Self>, name: &str, source: &S) -> Result<u64, ReflexError> {
        let channel = self.declare(name, ChannelKind::Event)?;
        let recorder = Arc::downgrade(self);
        let subscription = source.on_event(event_fn(move || {
            if let Some(recorder) = recorder.upgrade() {
                recorder.submit(channel, Payload::Null)?;
            }
            Ok(())
        }));
        self.taps.lock().push(subscription);
        Ok(channel)
    }

    fn tap<T, F>(
        self: &Arc<Self>,
        name: &str,
        kind: ChannelKind,
        input: &Arc<dyn Observable<T>>,
        encode: F,
    ) -> Result<u64, ReflexError>
    where
        T: SignalValue,
        F: Fn(T) -> Payload + Send + Sync + 'static,
    {
        let channel = self.declare(name, kind)?;
        self.submit(channel, encode(input.get()))?;

        let recorder = Arc::downgrade(self);
        let source: Weak<dyn Observable<T>> = Arc::downgrade(input);
        let subscription = input.on_event(event_fn(move || {
            if let (Some(recorder), Some(source)) = (recorder.upgrade(), source.upgrade()) {
                recorder.submit(channel, encode(source.get()))?;
            }
            Ok(())
        }));
        self.taps.lock().push(subscription);
        Ok(channel)
    }

    // ========================================================================
    // Byte streams
    // ========================================================================

    /// Open a byte-stream channel. Close it with [`StreamChannel::close`] to
    /// retire the channel before the session ends.
    pub fn open_stream(self: &Arc<Self>, name: &str) -> Result<StreamChannel<W>, ReflexError> {
        let channel = self.declare(name, ChannelKind::Bytes)?;
        Ok(StreamChannel {
            channel,
            recorder: Arc::downgrade(self),
            closed: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Detach every tap, append the end sentinel, and wait for the writer to
    /// flush. Returns the underlying sink.
    pub fn close(&self) -> anyhow::Result<W> {
        for tap in self.taps.lock().drain(..) {
            tap.unsubscribe();
        }
        let writer = self
            .writer
            .lock()
            .take()
            .ok_or_else(|| ReflexError::illegal(format!("recording '{}' already closed", self.label)))?;
        writer.submit(Record::metadata(self.now_ticks(), &Metadata::End))?;
        let sink = writer.close()?;
        tracing::info!("Recording '{}' closed", self.label);
        Ok(sink)
    }
}

impl<W: Write + Send + 'static> std::fmt::Debug for Recorder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .field("channels", &(self.next_channel.load(Ordering::Acquire) - 1))
            .finish()
    }
}

impl Recorder<File> {
    /// Create a new recording file in `dir`, named after the local start time.
    pub fn create_file(
        dir: &Path,
        clock: SharedClock,
        config: &RecorderConfig,
    ) -> anyhow::Result<(PathBuf, Arc<Self>)> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create recording dir: {}", dir.display()))?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let (path, file) = create_unique(dir, &stamp)?;
        let recorder = Self::start(stamp, file, clock, config)?;
        tracing::info!("Recording to {}", path.display());
        Ok((path, recorder))
    }
}

fn create_unique(dir: &Path, stamp: &str) -> anyhow::Result<(PathBuf, File)> {
    for attempt in 0u32..100 {
        let name = match attempt {
            0 => format!("reflex-{}.rec", stamp),
            n => format!("reflex-{}-{}.rec", stamp, n),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("Failed to create recording file: {}", path.display())),
        }
    }
    anyhow::bail!("Failed to find a free recording file name in {}", dir.display())
}

/// A byte-stream channel inside a recording.
pub struct StreamChannel<W: Write + Send + 'static> {
    channel: u64,
    recorder: Weak<Recorder<W>>,
    closed: AtomicBool,
}

impl<W: Write + Send + 'static> StreamChannel<W> {
    pub fn channel(&self) -> u64 {
        self.channel
    }

    /// Record one chunk of bytes.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ReflexError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReflexError::illegal(format!("stream channel {} is closed", self.channel)));
        }
        let recorder = self.recorder()?;
        let buffer = match recorder.writer.lock().as_ref() {
            Some(writer) => writer.pool().take_copy(bytes),
            None => bytes.to_vec(),
        };
        recorder.submit(self.channel, Payload::Bytes(buffer))
    }

    /// Retire the channel. Later writes fail.
    pub fn close(&self) -> Result<(), ReflexError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let recorder = self.recorder()?;
        let retire = Metadata::Retire { channel: self.channel };
        recorder.submit_record(Record::metadata(recorder.now_ticks(), &retire))
    }

    fn recorder(&self) -> Result<Arc<Recorder<W>>, ReflexError> {
        self.recorder
            .upgrade()
            .ok_or_else(|| ReflexError::illegal("recording session dropped"))
    }
}
