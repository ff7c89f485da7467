//! Asynchronous dispatch: bounded queue, worker pool, graceful shutdown.
//!
//! `publish_async` populates a pooled holder and enqueues it; a fixed pool
//! of worker threads drains the queue and runs the synchronous dispatch
//! path. Workers use a short adaptive wait (spin, then yield, then park in
//! bounded slices) so light load sees low latency without burning a core
//! through sustained idleness.
//!
//! Shutdown flips a monotone flag, wakes every waiter, and joins all
//! workers; holders still queued are dropped without dispatch.

mod holder;
mod mpmc;

pub(crate) use holder::Publication;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::dispatch::Dispatch;
use crate::error::{BusError, ErrorSinks, PublicationError};

use holder::{HolderPool, MessageHolder, Signal, TakeError};
use mpmc::MpmcQueue;

/// Worker wake-up slice while the dispatch queue is idle.
const IDLE_SLICE: Duration = Duration::from_millis(1);

/// Spin polls before a worker starts yielding.
const SPIN_POLLS: u32 = 64;

/// Yield polls before a worker starts parking.
const YIELD_POLLS: u32 = 128;

struct PoolShared {
    queue: MpmcQueue<Box<MessageHolder>>,
    queued: Signal,
    holders: HolderPool,
    shutting_down: AtomicBool,
    dispatch: Arc<Dispatch>,
    sinks: Arc<ErrorSinks>,
}

/// Fixed worker pool draining the asynchronous dispatch queue.
pub(crate) struct AsyncPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncPool {
    /// Starts `workers` dispatch threads over a queue of `capacity`
    /// pending publications (rounded up to a power of two).
    pub(crate) fn start(
        workers: usize,
        capacity: usize,
        dispatch: Arc<Dispatch>,
        sinks: Arc<ErrorSinks>,
    ) -> Result<Self, BusError> {
        let queue = MpmcQueue::new(capacity);
        // Holders are the capacity tokens: one per queue slot, so a
        // publisher holding one is guaranteed queue room.
        let holders = HolderPool::new(queue.capacity());

        let shared = Arc::new(PoolShared {
            queue,
            queued: Signal::new(),
            holders,
            shutting_down: AtomicBool::new(false),
            dispatch,
            sinks,
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let worker_shared = Arc::clone(&shared);
            let spawn = thread::Builder::new()
                .name(format!("manifold-dispatch-{worker_id}"))
                .spawn(move || worker_loop(&worker_shared));
            match spawn {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    // Roll back the workers already running before failing.
                    shared.shutting_down.store(true, Ordering::Release);
                    shared.queued.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(BusError::SpawnFailed {
                        worker_id,
                        message: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            workers,
            capacity = shared.queue.capacity(),
            "dispatch pool started"
        );
        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Enqueues a publication, blocking on the holder free-list while the
    /// queue is saturated.
    pub(crate) fn publish(&self, publication: Publication) {
        self.publish_with_deadline(publication, None);
    }

    /// Enqueues with a bounded wait; on timeout the publication is dropped
    /// and reported to the error sinks.
    pub(crate) fn publish_timeout(&self, timeout: Duration, publication: Publication) {
        self.publish_with_deadline(publication, Some(Instant::now() + timeout));
    }

    fn publish_with_deadline(&self, publication: Publication, deadline: Option<Instant>) {
        let shared = &*self.shared;
        if shared.shutting_down.load(Ordering::Acquire) {
            shared.sinks.report(&PublicationError::new(
                "async publish rejected: bus is shut down",
                None,
                publication.to_vec(),
            ));
            return;
        }

        let mut holder = match shared.holders.take(deadline, &shared.shutting_down) {
            Ok(holder) => holder,
            Err(TakeError::TimedOut) => {
                shared.sinks.report(&PublicationError::new(
                    "async publish timed out waiting for queue space",
                    None,
                    publication.to_vec(),
                ));
                return;
            }
            Err(TakeError::ShutDown) => {
                shared.sinks.report(&PublicationError::new(
                    "async publish rejected: bus is shut down",
                    None,
                    publication.to_vec(),
                ));
                return;
            }
        };

        holder.set(publication);
        if let Err(mut holder) = shared.queue.push(holder) {
            // Unreachable while the holder/slot invariant holds; keep the
            // holder cycling and report rather than lose it.
            let publication = holder.take();
            shared.holders.put(holder);
            shared.sinks.report(&PublicationError::new(
                "async dispatch queue rejected a publication",
                None,
                publication.as_ref().map(Publication::to_vec).unwrap_or_default(),
            ));
            return;
        }
        shared.queued.notify_one();
    }

    /// Whether the dispatch queue currently holds undelivered publications.
    pub(crate) fn has_pending(&self) -> bool {
        !self.shared.queue.is_empty()
    }

    /// Stops the pool: sets the shutdown flag, wakes every waiter, and
    /// joins all workers. Idempotent.
    pub(crate) fn shutdown(&self) {
        let first = !self.shared.shutting_down.swap(true, Ordering::AcqRel);
        self.shared.queued.notify_all();
        self.shared.holders.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
        if first {
            tracing::info!("dispatch pool stopped");
        }
    }
}

impl std::fmt::Debug for AsyncPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPool")
            .field("queue", &self.shared.queue)
            .field("shutting_down", &self.shared.shutting_down)
            .finish()
    }
}

fn worker_loop(shared: &PoolShared) {
    let mut idle: u32 = 0;
    loop {
        if shared.shutting_down.load(Ordering::Acquire) {
            break;
        }
        match shared.queue.pop() {
            Some(mut holder) => {
                idle = 0;
                let publication = holder.take();
                // Recycle before dispatching so publishers stall as little
                // as possible.
                shared.holders.put(holder);
                if let Some(publication) = publication {
                    run_publication(&shared.dispatch, publication);
                }
            }
            None => {
                idle = idle.saturating_add(1);
                if idle < SPIN_POLLS {
                    std::hint::spin_loop();
                } else if idle < YIELD_POLLS {
                    thread::yield_now();
                } else {
                    shared.queued.wait_for(IDLE_SLICE);
                }
            }
        }
    }
}

fn run_publication(dispatch: &Dispatch, publication: Publication) {
    match publication {
        Publication::One(a) => dispatch.publish(a),
        Publication::Two(a, b) => dispatch.publish2(a, b),
        Publication::Three(a, b, c) => dispatch.publish3(a, b, c),
        Publication::Many(all) => dispatch.publish_many(all),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
