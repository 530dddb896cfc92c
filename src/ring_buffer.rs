//! Fixed-capacity byte ring buffer for inter-stage audio transfer
//!
//! Every pipeline stage moves bytes through one of these: single producer,
//! single consumer, short-count non-blocking writes, and reads that can
//! optionally wait for payload with a bounded timeout.
//!
//! Design:
//! - Backed by a lock-free `ringbuf::HeapRb<u8>` split at construction; each
//!   half sits behind a `std::sync::Mutex` because slice push/pop require
//!   `&mut self`. The mutexes are uncontended (one producer task, one
//!   consumer task).
//! - Occupancy is tracked in an atomic so `available()`/`free()` never take a
//!   lock.
//! - Timed reads park on a `tokio::sync::Notify` that the producer signals
//!   after every successful write.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Single-producer single-consumer byte ring buffer
///
/// Invariant: `available() + free() == capacity()` after every operation.
/// Exactly one task writes and exactly one task reads a given instance;
/// `reset()` is only safe when neither is in flight (owner between worker
/// lifecycles).
pub struct RingBuffer {
    /// Producer half (writer task)
    prod: Mutex<HeapProd<u8>>,

    /// Consumer half (reader task)
    cons: Mutex<HeapCons<u8>>,

    /// Total capacity in bytes, fixed at construction
    capacity: usize,

    /// Current occupancy in bytes
    fill: AtomicUsize,

    /// Signalled by the producer after each successful write; timed reads
    /// park here instead of polling
    data_ready: Notify,
}

impl RingBuffer {
    /// Create a ring buffer with the given byte capacity
    ///
    /// Fails on a zero capacity. Callers treat a failed construction as fatal
    /// for that worker only, not the whole process.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Buffer("ring buffer capacity must be non-zero".to_string()));
        }

        debug!("Creating ring buffer with capacity {} bytes", capacity);

        let rb = HeapRb::<u8>::new(capacity);
        let (prod, cons) = rb.split();

        Ok(Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            capacity,
            fill: AtomicUsize::new(0),
            data_ready: Notify::new(),
        })
    }

    /// Write up to `min(buf.len(), free())` bytes, never blocking
    ///
    /// Returns the number of bytes copied in; a short count means the buffer
    /// lacked space for the rest.
    pub fn write(&self, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let written = {
            let mut prod = self.prod.lock().unwrap();
            prod.push_slice(buf)
        };

        if written > 0 {
            self.fill.fetch_add(written, Ordering::AcqRel);
            self.data_ready.notify_one();
        }

        written
    }

    /// Read up to `min(buf.len(), available())` bytes without waiting
    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let read = {
            let mut cons = self.cons.lock().unwrap();
            cons.pop_slice(buf)
        };

        if read > 0 {
            self.fill.fetch_sub(read, Ordering::AcqRel);
        }

        read
    }

    /// Read up to `buf.len()` bytes, waiting up to `timeout` for payload
    ///
    /// A zero timeout returns immediately (possibly with 0 bytes). A positive
    /// timeout parks the caller until data arrives or the deadline passes,
    /// whichever is first.
    pub async fn read(&self, buf: &mut [u8], timeout: Duration) -> usize {
        let read = self.try_read(buf);
        if read > 0 || timeout.is_zero() {
            return read;
        }

        let deadline = Instant::now() + timeout;
        loop {
            // Arm the notification before re-checking so a write between the
            // check and the await is not missed.
            let notified = self.data_ready.notified();

            let read = self.try_read(buf);
            if read > 0 {
                return read;
            }
            if Instant::now() >= deadline {
                return 0;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // Deadline passed while parked; one last non-blocking attempt.
                return self.try_read(buf);
            }
        }
    }

    /// Bytes currently buffered
    pub fn available(&self) -> usize {
        self.fill.load(Ordering::Acquire)
    }

    /// Bytes of free space
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all buffered content and rewind both cursors
    ///
    /// Caller guarantees no concurrent read/write is in flight; issued by the
    /// owner between worker lifecycles.
    pub fn reset(&self) {
        let cleared = {
            let mut cons = self.cons.lock().unwrap();
            cons.clear()
        };
        self.fill.store(0, Ordering::Release);
        if cleared > 0 {
            trace!("Ring buffer reset discarded {} buffered bytes", cleared);
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
