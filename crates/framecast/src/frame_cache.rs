//! Bounded holding area for converted-but-not-yet-presented buffers.
//!
//! The cache decouples the decode/convert worker from the presentation
//! thread. Buffers arrive in presentation order (the converter emits
//! monotonic timestamps; a looping session legitimately wraps back to
//! zero), are bounded by a watermark, and leave either because they came
//! due, because they were evicted to make room, or because the cache was
//! cleared.
//!
//! Two teardown strengths are supported: `retain_all` (fast stop — every
//! entry stays resident) and `clear_all` (full release — runs to
//! completion before returning, and callers route it through the
//! presentation thread's job queue so platform buffers are released on the
//! thread that owns the display surface).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::video::PresentableBuffer;

/// Default watermark for buffered frames.
pub const DEFAULT_CACHE_CAPACITY: usize = 5;

/// A cached buffer plus its bookkeeping flags.
struct CacheEntry {
    buffer: PresentableBuffer,
    /// Set by `retain_all`; a retained entry survives a stop untouched.
    retained: bool,
}

/// Thread-safe, bounded, presentation-ordered buffer cache.
pub struct FrameBufferCache {
    entries: Mutex<VecDeque<CacheEntry>>,
    capacity: usize,
    /// Generation of the session currently allowed to enqueue.
    session: AtomicU64,
    /// Pause gate: dequeue returns nothing while set.
    suspended: AtomicBool,
    /// Stop gate: entries stay resident, dequeue and enqueue are refused.
    retained: AtomicBool,
    /// Controller shutdown; refuses all traffic.
    stopped: AtomicBool,
}

impl FrameBufferCache {
    /// Creates a cache bounded by `capacity` buffers (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            session: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            retained: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Creates a cache with the default watermark.
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }

    /// Returns the generation currently allowed to enqueue.
    pub fn current_session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Starts a new session: flushes leftover buffers and re-arms the gates.
    ///
    /// Buffers from any earlier generation are rejected by `enqueue` from
    /// this point on, which is what keeps a superseded source's frames from
    /// presenting after the new source has started.
    pub fn begin_session(&self, session: u64) {
        self.session.store(session, Ordering::Release);
        self.retained.store(false, Ordering::Release);
        self.suspended.store(false, Ordering::Release);
        let dropped = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!("session {session}: flushed {dropped} stale buffers");
        }
    }

    /// Adds a buffer to the holding area.
    ///
    /// Returns false (and drops the buffer) when it belongs to a stale
    /// session or the cache is retained/stopped. At the watermark the
    /// oldest unpresented buffer is evicted rather than blocking the
    /// producer, so decode keeps progressing through bursts.
    pub fn enqueue(&self, session: u64, buffer: PresentableBuffer) -> bool {
        if self.stopped.load(Ordering::Acquire)
            || self.retained.load(Ordering::Acquire)
            || session != self.session.load(Ordering::Acquire)
        {
            tracing::trace!("rejected buffer at {:?} (session {session})", buffer.pts);
            return false;
        }

        let mut entries = self.entries.lock();
        entries.push_back(CacheEntry {
            buffer,
            retained: false,
        });
        if entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                tracing::debug!("watermark reached, evicted buffer at {:?}", evicted.buffer.pts);
            }
        }
        true
    }

    /// Takes the next buffer whose timestamp is due at `position`.
    ///
    /// Returns `None` when the head is not yet due or the cache is gated
    /// (paused, retained, or stopped). Buffers come out in the order they
    /// went in, which is presentation order.
    pub fn dequeue_due(&self, position: Duration) -> Option<PresentableBuffer> {
        if self.stopped.load(Ordering::Acquire)
            || self.retained.load(Ordering::Acquire)
            || self.suspended.load(Ordering::Acquire)
        {
            return None;
        }
        let mut entries = self.entries.lock();
        if entries.front().is_some_and(|e| e.buffer.pts <= position) {
            return entries.pop_front().map(|e| e.buffer);
        }
        None
    }

    /// Returns the timestamp of the next buffer, so the presentation path
    /// can sleep until it is due instead of busy-polling.
    pub fn next_due(&self) -> Option<Duration> {
        self.entries.lock().front().map(|e| e.buffer.pts)
    }

    /// Fast-stop path: keeps every entry resident and closes both gates.
    ///
    /// Nothing is released; a later `begin_session` flushes, a later
    /// `clear_all` drains.
    pub fn retain_all(&self) {
        self.retained.store(true, Ordering::Release);
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            entry.retained = true;
        }
        tracing::debug!("retained {} cached buffers", entries.len());
    }

    /// Full-clear path: synchronously releases every entry.
    ///
    /// Must run on the presentation-owning thread (the present thread's
    /// `Clear` job is the only caller in the pipeline); blocks until every
    /// buffer has been dropped and leaves the cache re-armed for a future
    /// session.
    pub fn clear_all(&self) {
        let released = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        self.retained.store(false, Ordering::Release);
        self.suspended.store(false, Ordering::Release);
        tracing::debug!("released {released} cached buffers");
    }

    /// Pause gate: while suspended, nothing is handed to the sink.
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
    }

    /// Permanently shuts the cache down (controller teardown).
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Number of buffers currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no buffers are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
