//! Transaction Builder - signs and submits actions off the host thread
//!
//! Every submission runs on the session's tokio runtime (blocking pool), so
//! ledger latency never lands on the host's frame budget. The default mode
//! hands the result to a completion handler; [`TransactionBuilder::submit_blocking`]
//! is the opt-in synchronous mode. No retries are attempted.

use crate::{
    action_queue::{ActionSender, ScheduledCallback},
    error::{panic_message, BridgeError},
    session::{LedgerClient, NodeSession, SessionPhase},
};
use ledger_types::{SigningIdentity, TxId};
use parking_lot::{Condvar, Mutex};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{runtime::Handle, sync::watch};

/// Result delivered to a completion handler
pub type SubmitResult = Result<TxId, BridgeError>;

/// Submissions dispatched whose completion handler has not returned yet
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    settled: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard(self.clone())
    }
}

/// Leaves the in-flight set on drop, including when a handler panics
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.settled.notify_all();
        }
    }
}

/// Builds and submits transactions against a borrowed ledger handle
pub struct TransactionBuilder<L: LedgerClient> {
    /// Ledger handle borrowed from the node session
    ledger: Arc<L>,
    /// Session lifecycle, checked before and after dispatch
    lifecycle: watch::Receiver<SessionPhase>,
    /// Background execution context
    runtime: Handle,
    /// Shared by all clones
    in_flight: Arc<InFlight>,
}

impl<L: LedgerClient> Clone for TransactionBuilder<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            lifecycle: self.lifecycle.clone(),
            runtime: self.runtime.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<L: LedgerClient> TransactionBuilder<L> {
    pub fn new(ledger: Arc<L>, lifecycle: watch::Receiver<SessionPhase>, runtime: Handle) -> Self {
        Self {
            ledger,
            lifecycle,
            runtime,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Borrow the ledger handle and lifecycle of a node session
    pub fn for_session<S>(session: &S, runtime: Handle) -> Self
    where
        S: NodeSession<Ledger = L>,
    {
        Self::new(session.current_ledger_handle(), session.lifecycle(), runtime)
    }

    /// Current session phase
    pub fn phase(&self) -> SessionPhase {
        *self.lifecycle.borrow()
    }

    /// Submissions whose completion handler has not returned yet
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Wait until no submission is in flight; false if `timeout` ran out
    ///
    /// A submission leaves the in-flight set only after its completion
    /// handler returned, so for [`TransactionBuilder::submit_to_host`] the
    /// result is already queued on the host when this returns true.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            if self.in_flight.settled.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    /// Submit in the background; `on_complete` runs on a worker thread
    ///
    /// Fails fast with [`BridgeError::SessionNotReady`] when the session is
    /// not running. Otherwise every outcome, including a panic inside the
    /// ledger client, reaches `on_complete`.
    pub fn submit<F>(
        &self,
        identity: &SigningIdentity,
        actions: Vec<L::Action>,
        on_complete: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(SubmitResult) + Send + 'static,
    {
        ensure_running(&self.lifecycle)?;

        let ledger = self.ledger.clone();
        let lifecycle = self.lifecycle.clone();
        let identity = identity.clone();
        let guard = self.in_flight.enter();

        self.runtime.spawn_blocking(move || {
            let result = execute(ledger.as_ref(), &lifecycle, &identity, actions);
            on_complete(result);
            drop(guard);
        });

        Ok(())
    }

    /// Submit in the background and deliver the result on the host thread
    ///
    /// If the host queue is closed by the time the submission completes,
    /// `on_complete` runs on the worker thread instead and a warning is
    /// logged.
    pub fn submit_to_host<F>(
        &self,
        identity: &SigningIdentity,
        actions: Vec<L::Action>,
        host: &ActionSender,
        on_complete: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(SubmitResult) + Send + 'static,
    {
        let host = host.clone();
        self.submit(identity, actions, move |result| {
            let summary = match &result {
                Ok(tx_id) => format!("ok {}", tx_id),
                Err(e) => format!("error {}", e),
            };
            let callback = ScheduledCallback::new(move || on_complete(result));
            if let Err(callback) = host.try_enqueue(callback) {
                tracing::warn!(
                    "Host queue closed, completing submission on worker thread: {}",
                    summary
                );
                if let Err(e) = callback.run() {
                    tracing::error!("Submission completion failed on worker thread: {}", e);
                }
            }
        })
    }

    /// Submit and block the calling thread until the ledger answers
    ///
    /// Opt-in synchronous mode. Do not call from the host thread.
    pub fn submit_blocking(
        &self,
        identity: &SigningIdentity,
        actions: Vec<L::Action>,
    ) -> SubmitResult {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        self.submit(identity, actions, move |result| {
            let _ = result_tx.send(result);
        })?;

        result_rx.recv().map_err(|_| {
            BridgeError::BackgroundTask("submission worker exited without a result".to_string())
        })?
    }
}

fn ensure_running(lifecycle: &watch::Receiver<SessionPhase>) -> Result<(), BridgeError> {
    match *lifecycle.borrow() {
        SessionPhase::Running => Ok(()),
        phase => Err(BridgeError::SessionNotReady(phase.as_str())),
    }
}

fn execute<L: LedgerClient>(
    ledger: &L,
    lifecycle: &watch::Receiver<SessionPhase>,
    identity: &SigningIdentity,
    actions: Vec<L::Action>,
) -> SubmitResult {
    // The session may have stopped while the task was queued
    ensure_running(lifecycle)?;

    tracing::debug!(
        "Make transaction with {} actions: {:?}",
        actions.len(),
        actions
    );

    match catch_unwind(AssertUnwindSafe(|| ledger.make_transaction(identity, actions))) {
        Ok(Ok(tx_id)) => {
            tracing::debug!("Staged transaction {} from {}", tx_id, identity.address());
            Ok(tx_id)
        }
        Ok(Err(e)) => {
            tracing::warn!("Transaction from {} rejected: {}", identity.address(), e);
            Err(BridgeError::Submission(e))
        }
        Err(payload) => Err(BridgeError::BackgroundPanic(panic_message(payload))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action_queue::ActionQueue,
        tests::support::{MockAction, MockLedger},
    };
    use ledger_types::LedgerError;
    use std::time::Duration;
    use tokio::runtime::Runtime;

    type Running = (TransactionBuilder<MockLedger>, watch::Sender<SessionPhase>);

    fn running_builder(ledger: Arc<MockLedger>, runtime: &Runtime) -> Running {
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Running);
        let builder = TransactionBuilder::new(ledger, phase_rx, runtime.handle().clone());
        (builder, phase_tx)
    }

    #[test]
    fn test_submit_blocking_returns_tx_id() {
        let runtime = Runtime::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let (builder, _phase) = running_builder(ledger.clone(), &runtime);
        let identity = SigningIdentity::generate();

        let tx_id = builder
            .submit_blocking(&identity, vec![MockAction::Add(2), MockAction::Add(3)])
            .unwrap();

        let staged = ledger.staged();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].id, tx_id);
        assert_eq!(staged[0].actions, vec![MockAction::Add(2), MockAction::Add(3)]);
    }

    #[test]
    fn test_not_running_fails_fast() {
        let runtime = Runtime::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::NotStarted);
        let builder = TransactionBuilder::new(ledger.clone(), phase_rx, runtime.handle().clone());
        let identity = SigningIdentity::generate();

        assert!(matches!(
            builder.submit_blocking(&identity, vec![MockAction::Add(1)]),
            Err(BridgeError::SessionNotReady("not_started"))
        ));

        phase_tx.send(SessionPhase::Stopped).unwrap();
        assert!(matches!(
            builder.submit(&identity, vec![MockAction::Add(1)], |_| {}),
            Err(BridgeError::SessionNotReady("stopped"))
        ));
        assert!(ledger.staged().is_empty());
    }

    #[test]
    fn test_ledger_error_reaches_completion() {
        let runtime = Runtime::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let (builder, _phase) = running_builder(ledger, &runtime);
        let identity = SigningIdentity::generate();

        let result = builder.submit_blocking(&identity, vec![MockAction::Reject]);
        assert!(matches!(
            result,
            Err(BridgeError::Submission(LedgerError::Rejected(_)))
        ));
    }

    #[test]
    fn test_ledger_panic_is_surfaced() {
        let runtime = Runtime::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let (builder, _phase) = running_builder(ledger, &runtime);
        let identity = SigningIdentity::generate();

        match builder.submit_blocking(&identity, vec![MockAction::Panic]) {
            Err(BridgeError::BackgroundPanic(message)) => {
                assert!(message.contains("mock ledger"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_submit_does_not_block_caller() {
        let runtime = Runtime::new().unwrap();
        let ledger = Arc::new(MockLedger::with_latency(Duration::from_millis(200)));
        let (builder, _phase) = running_builder(ledger, &runtime);
        let identity = SigningIdentity::generate();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let started = std::time::Instant::now();
        builder
            .submit(&identity, vec![MockAction::Add(1)], move |result| {
                done_tx.send(result).unwrap();
            })
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));

        let result = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_submit_to_host_completes_on_drain() {
        let runtime = Runtime::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let (builder, _phase) = running_builder(ledger, &runtime);
        let identity = SigningIdentity::generate();
        let mut queue = ActionQueue::new();
        let host_thread = std::thread::current().id();

        let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);
        builder
            .submit_to_host(
                &identity,
                vec![MockAction::Add(7)],
                &queue.sender(),
                move |result| {
                    seen_tx
                        .send((std::thread::current().id(), result.is_ok()))
                        .unwrap();
                },
            )
            .unwrap();

        // Wait for the background worker to hand the result over
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while queue.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(seen_rx.try_recv().is_err());

        assert_eq!(queue.drain_once().executed, 1);
        let (thread, ok) = seen_rx.try_recv().unwrap();
        assert_eq!(thread, host_thread);
        assert!(ok);
    }

    #[test]
    fn test_wait_idle_tracks_in_flight_submissions() {
        let runtime = Runtime::new().unwrap();
        let ledger = Arc::new(MockLedger::with_latency(Duration::from_millis(100)));
        let (builder, _phase) = running_builder(ledger, &runtime);
        let identity = SigningIdentity::generate();
        assert!(builder.wait_idle(Duration::ZERO));

        let done = Arc::new(Mutex::new(false));
        let flag = done.clone();
        builder
            .submit(&identity, vec![MockAction::Add(1)], move |_| *flag.lock() = true)
            .unwrap();
        assert_eq!(builder.in_flight(), 1);
        assert!(!builder.wait_idle(Duration::from_millis(1)));

        assert!(builder.wait_idle(Duration::from_secs(5)));
        assert_eq!(builder.in_flight(), 0);
        // Idle means the completion handler already returned
        assert!(*done.lock());
    }

    #[test]
    fn test_panicking_handler_still_leaves_in_flight_set() {
        let runtime = Runtime::new().unwrap();
        let (builder, _phase) = running_builder(Arc::new(MockLedger::new()), &runtime);
        let identity = SigningIdentity::generate();

        builder
            .submit(&identity, vec![MockAction::Add(1)], |_| panic!("handler blew up"))
            .unwrap();
        assert!(builder.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_submit_to_closed_host_completes_on_worker() {
        let runtime = Runtime::new().unwrap();
        let (builder, _phase) = running_builder(Arc::new(MockLedger::new()), &runtime);
        let identity = SigningIdentity::generate();
        let mut queue = ActionQueue::new();
        let sender = queue.sender();
        queue.close();
        let host_thread = std::thread::current().id();

        let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);
        builder
            .submit_to_host(&identity, vec![MockAction::Add(1)], &sender, move |result| {
                seen_tx
                    .send((std::thread::current().id(), result.is_ok()))
                    .unwrap();
            })
            .unwrap();

        let (thread, ok) = seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(thread, host_thread);
        assert!(ok);
        assert!(queue.is_empty());
    }
}
