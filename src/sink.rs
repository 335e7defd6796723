//! Event sinks - where the simulator's output stream lands.
//!
//! A sink exposes `write` and `flush` and absorbs its own I/O failures:
//! the hot loop never unwinds because a disk filled up. Construction is
//! the only fallible step and reports [`SinkError`] to the driver.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

use crate::event::Event;
use crate::kv::KvSink;

/// Errors raised while opening a sink. Runtime write failures are
/// logged and swallowed instead.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open event log: {0}")]
    Io(#[from] std::io::Error),
    #[error("key-value store error: {0}")]
    Kv(#[from] heed::Error),
}

/// Destination for serialized events.
///
/// `thread_safe` reports whether concurrent `write` calls are allowed;
/// the driver refuses to pair a single-threaded sink with a
/// multi-threaded run.
pub trait Sink: Send + Sync {
    fn write(&self, e: &Event);
    fn flush(&self);

    fn thread_safe(&self) -> bool {
        false
    }
}

/// Discards everything.
pub struct NullSink;

impl Sink for NullSink {
    fn write(&self, _e: &Event) {}
    fn flush(&self) {}

    fn thread_safe(&self) -> bool {
        true
    }
}

/// Append-only binary log: each record is a little-endian u32 length
/// followed by the serialized event. Writes are serialized internally
/// with a mutex, so any number of simulator threads may share it.
pub struct BinaryLogSink {
    out: Mutex<BufWriter<File>>,
    path: String,
}

impl BinaryLogSink {
    pub fn create(path: &str) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
            path: path.to_string(),
        })
    }

    fn write_record(&self, e: &Event) -> std::io::Result<()> {
        let bytes = e.serialize();
        let mut out = self.out.lock().unwrap();
        out.write_all(&(bytes.len() as u32).to_le_bytes())?;
        out.write_all(&bytes)
    }
}

impl Sink for BinaryLogSink {
    fn write(&self, e: &Event) {
        if let Err(err) = self.write_record(e) {
            warn!(path = %self.path, %err, "event log write failed; continuing");
        }
    }

    fn flush(&self) {
        if let Err(err) = self.out.lock().unwrap().flush() {
            warn!(path = %self.path, %err, "event log flush failed");
        }
    }

    fn thread_safe(&self) -> bool {
        true
    }
}

/// True when `path` names an LMDB environment rather than a flat log.
pub fn is_kv_path(path: &str) -> bool {
    path.ends_with(".mdb") || path.contains(".mdb/")
}

/// Pick a sink from a log path: empty means discard, a `.mdb` path means
/// the key-value store, anything else is the append-only binary log.
pub fn make_sink(path: &str) -> Result<Box<dyn Sink>, SinkError> {
    if path.is_empty() {
        return Ok(Box::new(NullSink));
    }
    if is_kv_path(path) {
        return Ok(Box::new(KvSink::open(path)?));
    }
    Ok(Box::new(BinaryLogSink::create(path)?))
}
