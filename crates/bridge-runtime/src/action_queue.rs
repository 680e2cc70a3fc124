//! Action Queue - hand-off from any thread to the host thread
//!
//! Producers on any thread push [`ScheduledCallback`]s through an
//! [`ActionSender`]; the host thread pops and runs them in FIFO order with
//! [`ActionQueue::drain_once`]. A drain pass is bounded by the queue length
//! observed at entry, so callbacks enqueued while a pass is running
//! (including ones enqueued by the callbacks themselves) wait for the next
//! pass.

use crate::error::{panic_message, BridgeError, CallbackFailure};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use std::{
    marker::PhantomData,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

type CallbackFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// A deferred unit of work executed exactly once on the host thread
pub struct ScheduledCallback {
    work: CallbackFn,
}

impl ScheduledCallback {
    /// Wrap an infallible closure
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Box::new(move || {
                f();
                Ok(())
            }),
        }
    }

    /// Wrap a closure whose error is reported by the drain
    pub fn fallible<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self { work: Box::new(f) }
    }

    /// Run the callback, containing panics
    pub fn run(self) -> Result<(), CallbackFailure> {
        match catch_unwind(AssertUnwindSafe(self.work)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CallbackFailure::Failed(e)),
            Err(payload) => Err(CallbackFailure::Panicked(panic_message(payload))),
        }
    }
}

impl std::fmt::Debug for ScheduledCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScheduledCallback")
    }
}

/// Outcome of a single drain pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks that ran to completion
    pub executed: usize,
    /// Callbacks that returned an error or panicked
    pub failed: usize,
    /// Callbacks left queued for a later pass
    pub deferred: usize,
}

impl DrainReport {
    /// Total callbacks popped during the pass
    pub fn popped(&self) -> usize {
        self.executed + self.failed
    }
}

/// Producer handle usable from any thread
#[derive(Clone)]
pub struct ActionSender {
    sender: Sender<ScheduledCallback>,
    /// Cleared once the host stops draining
    open: Arc<RwLock<bool>>,
}

impl ActionSender {
    /// Queue a closure for the host thread
    pub fn enqueue<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_callback(ScheduledCallback::new(f))
    }

    /// Queue a fallible closure for the host thread
    pub fn enqueue_fallible<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue_callback(ScheduledCallback::fallible(f))
    }

    /// Queue an already wrapped callback
    ///
    /// Fails once the owning [`ActionQueue`] has been closed or dropped.
    pub fn enqueue_callback(&self, callback: ScheduledCallback) -> Result<(), BridgeError> {
        self.try_enqueue(callback)
            .map_err(|_| BridgeError::QueueClosed)
    }

    /// Queue a callback, handing it back if the host no longer drains
    pub fn try_enqueue(&self, callback: ScheduledCallback) -> Result<(), ScheduledCallback> {
        // Held across the send so `close` cannot slip in between
        let open = self.open.read();
        if !*open {
            return Err(callback);
        }
        self.sender.send(callback).map_err(|e| e.into_inner())
    }

    /// Whether the host has stopped accepting callbacks
    pub fn is_closed(&self) -> bool {
        !*self.open.read()
    }
}

/// Unbounded MPSC queue of callbacks, consumed on the host thread
///
/// The queue is `!Send`: it stays on the thread that created it, which
/// makes that thread the only one able to drain it.
pub struct ActionQueue {
    sender: Sender<ScheduledCallback>,
    receiver: Receiver<ScheduledCallback>,
    open: Arc<RwLock<bool>>,
    _host_thread: PhantomData<*const ()>,
}

impl ActionQueue {
    /// Create an empty queue owned by the current thread
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            open: Arc::new(RwLock::new(true)),
            _host_thread: PhantomData,
        }
    }

    /// Get a producer handle for other threads
    pub fn sender(&self) -> ActionSender {
        ActionSender {
            sender: self.sender.clone(),
            open: self.open.clone(),
        }
    }

    /// Refuse further callbacks from [`ActionSender`]s
    ///
    /// Once this returns, everything a sender managed to queue is in the
    /// channel and every later `enqueue` fails with
    /// [`BridgeError::QueueClosed`]. Host-side `enqueue` is unaffected.
    pub fn close(&mut self) {
        *self.open.write() = false;
    }

    pub fn is_closed(&self) -> bool {
        !*self.open.read()
    }

    /// Queue a closure from the host thread
    pub fn enqueue<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_callback(ScheduledCallback::new(f));
    }

    /// Queue a fallible closure from the host thread
    pub fn enqueue_fallible<F>(&self, f: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue_callback(ScheduledCallback::fallible(f));
    }

    /// Queue a wrapped callback from the host thread
    pub fn enqueue_callback(&self, callback: ScheduledCallback) {
        // The receiver lives in `self`, so a failed send means the channel
        // itself is broken.
        if self.sender.send(callback).is_err() {
            tracing::error!("Action queue channel failed while its receiver is alive, aborting");
            std::process::abort();
        }
    }

    /// Number of callbacks currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Run every callback queued at entry, in FIFO order
    ///
    /// A failing callback is logged and counted; the rest of the pass
    /// still runs.
    pub fn drain_once(&mut self) -> DrainReport {
        let budget = self.receiver.len();
        let mut report = DrainReport::default();

        for _ in 0..budget {
            let callback = match self.receiver.try_recv() {
                Ok(callback) => callback,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };

            match callback.run() {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        "Scheduled callback {} of {} failed: {}",
                        report.popped(),
                        budget,
                        e
                    );
                }
            }
        }

        report.deferred = self.receiver.len();
        report
    }

    /// Drop the callbacks queued at entry without running them
    ///
    /// Bounded like [`ActionQueue::drain_once`]; returns how many were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        let budget = self.receiver.len();
        self.receiver.try_iter().take(budget).count()
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}
