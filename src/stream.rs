//! Batching event publisher.
//!
//! The simulator thread pushes events into an SPSC ring; a publisher
//! thread drains the ring, groups events into batches of 512 and hands
//! each batch to a [`StreamTransport`]. The in-tree transport frames
//! batches over TCP using the wire codec; tests plug in an in-memory one.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::event::Event;
use crate::spsc::{self, Consumer, Producer};

/// Events per outgoing batch.
const BATCH_SIZE: usize = 512;
/// Ring capacity between the simulator and the publisher thread.
const RING_CAP: usize = 4096;

/// Byte transport for event batches. Returns `false` when the connection
/// is gone; the publisher thread then stops.
pub trait StreamTransport: Send {
    fn send_batch(&mut self, batch: &[Event]) -> bool;
}

/// Length-prefixed TCP framing: u32 event count, then each event as a
/// u32 length plus its wire encoding. All integers little-endian.
pub struct TcpTransport {
    stream: TcpStream,
    target: String,
}

impl TcpTransport {
    pub fn connect(target: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(target)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            target: target.to_string(),
        })
    }
}

impl StreamTransport for TcpTransport {
    fn send_batch(&mut self, batch: &[Event]) -> bool {
        let mut frame = Vec::with_capacity(batch.len() * 32 + 4);
        frame.extend_from_slice(&(batch.len() as u32).to_le_bytes());
        for e in batch {
            let bytes = e.serialize();
            frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            frame.extend_from_slice(&bytes);
        }

        match self.stream.write_all(&frame) {
            Ok(()) => true,
            Err(err) => {
                warn!(target = %self.target, %err, "stream transport write failed");
                false
            }
        }
    }
}

/// Publisher endpoint held by the simulator thread.
///
/// Single-producer: exactly one thread may call `write_event`, matching
/// the ring's discipline. `close` flushes the final partial batch and
/// joins the publisher thread.
pub struct StreamPublisher {
    tx: Producer<Event, RING_CAP>,
    closed: Arc<AtomicBool>,
    worker: Option<JoinHandle<u64>>,
}

impl StreamPublisher {
    pub fn connect(target: &str) -> std::io::Result<Self> {
        Ok(Self::with_transport(TcpTransport::connect(target)?))
    }

    pub fn with_transport<T: StreamTransport + 'static>(transport: T) -> Self {
        let (tx, rx) = spsc::channel::<Event, RING_CAP>();
        let closed = Arc::new(AtomicBool::new(false));
        let worker_closed = Arc::clone(&closed);

        let worker = std::thread::Builder::new()
            .name("stream-publisher".to_string())
            .spawn(move || run_publisher(rx, transport, worker_closed))
            .expect("failed to spawn publisher thread");

        Self {
            tx,
            closed,
            worker: Some(worker),
        }
    }

    /// Enqueue one event. Returns `false` when the publisher thread has
    /// stopped (broken transport) and the event cannot be delivered.
    pub fn write_event(&mut self, e: &Event) -> bool {
        let mut v = e.clone();
        loop {
            match self.tx.try_push(v) {
                Ok(()) => return true,
                Err(back) => {
                    match &self.worker {
                        Some(w) if !w.is_finished() => {}
                        _ => return false,
                    }
                    v = back;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Flush outstanding events and join the publisher thread. Returns
    /// the number of events delivered to the transport.
    pub fn close(&mut self) -> u64 {
        self.closed.store(true, Ordering::Release);
        let sent = match self.worker.take() {
            Some(w) => w.join().unwrap_or(0),
            None => 0,
        };
        info!(sent, "stream publisher closed");
        sent
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close();
        }
    }
}

fn run_publisher<T: StreamTransport>(
    mut rx: Consumer<Event, RING_CAP>,
    mut transport: T,
    closed: Arc<AtomicBool>,
) -> u64 {
    let mut batch: Vec<Event> = Vec::with_capacity(BATCH_SIZE);
    let mut sent = 0u64;

    loop {
        match rx.try_pop() {
            Some(e) => {
                batch.push(e);
                if batch.len() >= BATCH_SIZE {
                    if !transport.send_batch(&batch) {
                        return sent;
                    }
                    sent += batch.len() as u64;
                    batch.clear();
                }
            }
            None => {
                // The producer stops pushing before it raises `closed`,
                // so empty-and-closed means fully drained.
                if closed.load(Ordering::Acquire) {
                    if !batch.is_empty() && transport.send_batch(&batch) {
                        sent += batch.len() as u64;
                    }
                    return sent;
                }
                std::thread::yield_now();
            }
        }
    }
}
