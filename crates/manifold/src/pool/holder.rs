//! Pooled publication records and the blocking free-list.
//!
//! Asynchronous publishes populate a pre-allocated [`MessageHolder`] taken
//! from the free-list, enqueue it, and return. Workers hand holders back
//! after copying the payload out, so steady-state publication allocates
//! nothing. The free-list take is the backpressure point: with every holder
//! in flight, publishers wait (optionally up to a deadline) for a worker to
//! recycle one.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::message::Envelope;

use super::mpmc::MpmcQueue;

// ---------------------------------------------------------------------------
// Publication
// ---------------------------------------------------------------------------

/// Arity-tagged payload of one asynchronous publication, one slot per
/// posted value.
#[derive(Debug)]
pub(crate) enum Publication {
    One(Envelope),
    Two(Envelope, Envelope),
    Three(Envelope, Envelope, Envelope),
    Many(Vec<Envelope>),
}

impl Publication {
    /// The posted tuple as an owned vector, for error reporting.
    pub(crate) fn to_vec(&self) -> Vec<Envelope> {
        match self {
            Self::One(a) => vec![a.clone()],
            Self::Two(a, b) => vec![a.clone(), b.clone()],
            Self::Three(a, b, c) => vec![a.clone(), b.clone(), c.clone()],
            Self::Many(all) => all.clone(),
        }
    }
}

/// Reusable record cycling between the free-list and the dispatch queue.
#[derive(Debug, Default)]
pub(crate) struct MessageHolder {
    publication: Option<Publication>,
}

impl MessageHolder {
    pub(crate) fn set(&mut self, publication: Publication) {
        self.publication = Some(publication);
    }

    pub(crate) fn take(&mut self) -> Option<Publication> {
        self.publication.take()
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Condvar-backed wake-up with bounded waits.
///
/// Waiters always use a timeout, so a notification racing past between a
/// failed poll and the wait costs at most one timeout slice rather than a
/// hang.
pub(crate) struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn notify_one(&self) {
        self.cond.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Parks the caller until notified or `timeout` elapses.
    pub(crate) fn wait_for(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        let _ = self.cond.wait_for(&mut guard, timeout);
    }
}

// ---------------------------------------------------------------------------
// HolderPool
// ---------------------------------------------------------------------------

/// Why a holder could not be obtained.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TakeError {
    /// The deadline elapsed before a holder became free.
    TimedOut,
    /// The pool is shutting down.
    ShutDown,
}

/// Fixed-size free-list of holders.
pub(crate) struct HolderPool {
    free: MpmcQueue<Box<MessageHolder>>,
    freed: Signal,
}

/// Timeout slice for free-list waits; bounds the cost of a lost wake-up.
const WAIT_SLICE: Duration = Duration::from_millis(1);

/// Polls before the first park.
const SPIN_POLLS: u32 = 32;

impl HolderPool {
    /// Creates a pool holding exactly `count` pre-allocated holders.
    pub(crate) fn new(count: usize) -> Self {
        let free = MpmcQueue::new(count);
        for _ in 0..free.capacity() {
            // Never full: the queue was sized for every holder.
            let _ = free.push(Box::new(MessageHolder::default()));
        }
        Self {
            free,
            freed: Signal::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Takes a free holder, waiting while none is available.
    ///
    /// With `deadline` set the wait is bounded; `shutting_down` aborts the
    /// wait so publishers cannot hang across shutdown.
    pub(crate) fn take(
        &self,
        deadline: Option<Instant>,
        shutting_down: &std::sync::atomic::AtomicBool,
    ) -> Result<Box<MessageHolder>, TakeError> {
        let mut polls: u32 = 0;
        loop {
            if let Some(holder) = self.free.pop() {
                return Ok(holder);
            }
            if shutting_down.load(std::sync::atomic::Ordering::Acquire) {
                return Err(TakeError::ShutDown);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(TakeError::TimedOut);
                }
            }

            polls = polls.saturating_add(1);
            if polls < SPIN_POLLS {
                std::hint::spin_loop();
            } else {
                self.freed.wait_for(WAIT_SLICE);
            }
        }
    }

    /// Returns a holder to the free-list and wakes one waiting publisher.
    pub(crate) fn put(&self, holder: Box<MessageHolder>) {
        // The pool owns every holder, so the queue always has room.
        let _ = self.free.push(holder);
        self.freed.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        self.freed.notify_all();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
