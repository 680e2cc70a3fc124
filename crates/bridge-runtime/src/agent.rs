//! Agent - host-facing facade over the bridge
//!
//! One agent per host instance, constructed explicitly and passed to
//! whatever needs it. It owns the drain loop (and so the action queue),
//! borrows the node session for submissions and queries, and forwards tip
//! notifications onto the host thread.

use crate::{
    action_queue::{ActionSender, DrainReport},
    drain_loop::{DrainLoop, DrainLoopConfig, DrainState, DrainStats},
    error::BridgeError,
    session::{ActionOf, LedgerClient, NodeSession, StateOf},
    tx_builder::{SubmitResult, TransactionBuilder},
};
use ledger_types::{Address, BlockHash, SigningIdentity, TipChanged};
use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};
use tokio::{runtime::Handle, sync::broadcast::error::RecvError, task::JoinHandle};

/// Ties a node session to the host's update loop
pub struct Agent<S: NodeSession> {
    /// Node session (borrowed, never torn down by the bridge alone)
    session: Arc<S>,
    /// Host-thread drain loop owning the action queue
    drain_loop: DrainLoop,
    /// Background submission worker
    builder: TransactionBuilder<S::Ledger>,
    /// Runtime used for listener forwarding
    runtime: Handle,
    /// Tip listener forwarding tasks
    listeners: Vec<JoinHandle<()>>,
}

impl<S: NodeSession> Agent<S> {
    /// Create an agent; nothing runs until [`Agent::start`]
    pub fn new(session: Arc<S>, config: DrainLoopConfig, runtime: Handle) -> Self {
        let builder = TransactionBuilder::for_session(session.as_ref(), runtime.clone());
        Self {
            session,
            drain_loop: DrainLoop::new(config),
            builder,
            runtime,
            listeners: Vec::new(),
        }
    }

    /// Start the node session, then the drain loop
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if self.drain_loop.state() != DrainState::NotStarted {
            return Err(BridgeError::InvalidTransition {
                from: self.drain_loop.state().as_str(),
                to: DrainState::Running.as_str(),
            });
        }

        self.session
            .start()
            .map_err(|e| BridgeError::SessionStart(format!("{:#}", e)))?;
        self.drain_loop.start()?;

        tracing::info!("Agent started for {}", self.address());
        Ok(())
    }

    /// Stop the drain loop (per its shutdown policy), then the session
    ///
    /// Waits up to the configured shutdown grace for in-flight submissions
    /// so their results reach the queue before the policy applies. Anything
    /// still running after that completes on its worker thread.
    pub fn stop(&mut self) -> Result<DrainReport, BridgeError> {
        if self.drain_loop.state() == DrainState::Running {
            let grace = self.drain_loop.config().shutdown_grace();
            if !self.builder.wait_idle(grace) {
                tracing::warn!(
                    "{} submissions in flight after {:?}, completing off the host thread",
                    self.builder.in_flight(),
                    grace
                );
            }
        }
        let report = self.drain_loop.stop()?;

        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.session.stop();

        tracing::info!("Agent stopped for {}", self.address());
        Ok(report)
    }

    /// Host tick hook; drains the action queue when due
    pub fn tick(&mut self, now: Instant) -> Result<Option<DrainReport>, BridgeError> {
        self.drain_loop.tick(now)
    }

    /// Queue a closure for the host thread
    pub fn enqueue<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        self.drain_loop.queue().enqueue(f);
        Ok(())
    }

    /// Producer handle for background threads
    pub fn sender(&self) -> ActionSender {
        self.drain_loop.sender()
    }

    /// Address of the session's signing identity
    pub fn address(&self) -> Address {
        self.session.signing_identity().address()
    }

    /// Submit actions signed by the session identity
    ///
    /// `on_complete` runs on the host thread during a later tick.
    pub fn submit<F>(&self, actions: Vec<ActionOf<S>>, on_complete: F) -> Result<(), BridgeError>
    where
        F: FnOnce(SubmitResult) + Send + 'static,
    {
        self.ensure_running()?;
        let host = self.sender();
        self.builder.submit_to_host(
            self.session.signing_identity(),
            actions,
            &host,
            on_complete,
        )
    }

    /// Submit actions signed by another identity
    ///
    /// `on_complete` runs on a background thread.
    pub fn submit_as<F>(
        &self,
        identity: &SigningIdentity,
        actions: Vec<ActionOf<S>>,
        on_complete: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(SubmitResult) + Send + 'static,
    {
        self.ensure_running()?;
        self.builder.submit(identity, actions, on_complete)
    }

    /// Submit and wait for the ledger's answer (blocks the caller)
    pub fn submit_blocking(&self, actions: Vec<ActionOf<S>>) -> SubmitResult {
        self.ensure_running()?;
        self.builder
            .submit_blocking(self.session.signing_identity(), actions)
    }

    /// State at `address`, at `at_block` or at the tip. `Ok(None)` means not found.
    pub fn query_state(
        &self,
        address: &Address,
        at_block: Option<BlockHash>,
    ) -> Result<Option<StateOf<S>>, BridgeError> {
        self.ensure_running()?;
        self.session
            .current_ledger_handle()
            .get_state(address, at_block)
            .map_err(BridgeError::Query)
    }

    /// Call `handler` on the host thread for every new block
    pub fn on_tip_changed<F>(&mut self, handler: F) -> Result<(), BridgeError>
    where
        F: FnMut(TipChanged) + Send + 'static,
    {
        if self.drain_loop.state() == DrainState::Stopped {
            return Err(BridgeError::SessionNotReady(DrainState::Stopped.as_str()));
        }

        let mut tips = self.session.subscribe_tip();
        let host = self.sender();
        let handler = Arc::new(Mutex::new(handler));

        let listener = self.runtime.spawn(async move {
            loop {
                match tips.recv().await {
                    Ok(tip) => {
                        let handler = handler.clone();
                        let delivered = host.enqueue(move || {
                            let mut handler = handler.lock();
                            (*handler)(tip)
                        });
                        if delivered.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Tip listener lagged, skipped {} blocks", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.listeners.push(listener);
        Ok(())
    }

    pub fn state(&self) -> DrainState {
        self.drain_loop.state()
    }

    pub fn drain_stats(&self) -> DrainStats {
        self.drain_loop.stats()
    }

    /// Callbacks currently waiting for the host thread
    pub fn pending_callbacks(&self) -> usize {
        self.drain_loop.queue().len()
    }

    /// Submissions whose completion has not been handed off yet
    pub fn in_flight(&self) -> usize {
        self.builder.in_flight()
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        match self.drain_loop.state() {
            DrainState::Running => Ok(()),
            state => Err(BridgeError::SessionNotReady(state.as_str())),
        }
    }
}

impl<S: NodeSession> Drop for Agent<S> {
    fn drop(&mut self) {
        if self.drain_loop.state() == DrainState::Running {
            tracing::warn!("Agent dropped while running, stopping");
            let _ = self.stop();
        }
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{MockAction, MockSession};
    use std::time::Duration;
    use tokio::runtime::Runtime;

    fn every_tick() -> DrainLoopConfig {
        DrainLoopConfig {
            interval_ms: 0,
            ..Default::default()
        }
    }

    fn mock_agent(session: MockSession, runtime: &Runtime) -> Agent<MockSession> {
        Agent::new(Arc::new(session), every_tick(), runtime.handle().clone())
    }

    /// Tick until `done` holds or the deadline passes
    fn tick_until<S: NodeSession>(agent: &mut Agent<S>, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            agent.tick(Instant::now()).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_calls_before_start_fail_fast() {
        let runtime = Runtime::new().unwrap();
        let agent = mock_agent(MockSession::new(), &runtime);

        assert!(matches!(agent.enqueue(|| {}), Err(BridgeError::SessionNotReady(_))));
        assert!(matches!(
            agent.submit(vec![MockAction::Add(1)], |_| {}),
            Err(BridgeError::SessionNotReady(_))
        ));
        assert!(matches!(
            agent.query_state(&agent.address(), None),
            Err(BridgeError::SessionNotReady(_))
        ));
    }

    #[test]
    fn test_start_stop_drives_session() {
        let runtime = Runtime::new().unwrap();
        let session = Arc::new(MockSession::new());
        let mut agent = Agent::new(session.clone(), every_tick(), runtime.handle().clone());

        agent.start().unwrap();
        assert_eq!(session.phase(), crate::SessionPhase::Running);
        assert!(agent.start().is_err());

        agent.stop().unwrap();
        assert_eq!(session.phase(), crate::SessionPhase::Stopped);
        assert!(matches!(
            agent.enqueue(|| {}),
            Err(BridgeError::SessionNotReady("stopped"))
        ));
        assert!(agent.stop().is_err());
    }

    #[test]
    fn test_session_start_failure_is_reported() {
        let runtime = Runtime::new().unwrap();
        let mut agent = Agent::new(
            Arc::new(MockSession::failing_start()),
            every_tick(),
            runtime.handle().clone(),
        );

        assert!(matches!(agent.start(), Err(BridgeError::SessionStart(_))));
        assert_eq!(agent.state(), DrainState::NotStarted);
    }

    #[test]
    fn test_submit_completes_on_host_thread_and_state_is_queryable() {
        let runtime = Runtime::new().unwrap();
        let mut agent = mock_agent(MockSession::new(), &runtime);
        agent.start().unwrap();

        let host_thread = std::thread::current().id();
        let outcome = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        agent
            .submit(vec![MockAction::Add(5), MockAction::Add(6)], move |result| {
                *slot.lock() = Some((std::thread::current().id(), result.is_ok()));
            })
            .unwrap();

        tick_until(&mut agent, || outcome.lock().is_some());
        assert_eq!(*outcome.lock(), Some((host_thread, true)));

        let address = agent.address();
        assert_eq!(agent.query_state(&address, None).unwrap(), Some(11));
        assert_eq!(agent.query_state(&Address([9u8; 20]), None).unwrap(), None);
        agent.stop().unwrap();
    }

    #[test]
    fn test_query_unknown_block() {
        let runtime = Runtime::new().unwrap();
        let mut agent = mock_agent(MockSession::new(), &runtime);
        agent.start().unwrap();

        let result = agent.query_state(&agent.address(), Some(BlockHash([1u8; 32])));
        assert!(matches!(result, Err(BridgeError::Query(_))));
    }

    #[test]
    fn test_tip_changes_delivered_on_host_thread() {
        let runtime = Runtime::new().unwrap();
        let session = Arc::new(MockSession::new());
        let mut agent = Agent::new(session.clone(), every_tick(), runtime.handle().clone());
        let host_thread = std::thread::current().id();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        agent
            .on_tip_changed(move |tip| {
                assert_eq!(std::thread::current().id(), host_thread);
                sink.lock().push(tip.index);
            })
            .unwrap();
        agent.start().unwrap();

        session.publish_tip(1);
        session.publish_tip(2);

        tick_until(&mut agent, || seen.lock().len() == 2);
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(agent.drain_stats().failed, 0);
    }

    #[test]
    fn test_drop_stops_running_agent() {
        let runtime = Runtime::new().unwrap();
        let session = Arc::new(MockSession::new());
        {
            let mut agent = Agent::new(session.clone(), every_tick(), runtime.handle().clone());
            agent.start().unwrap();
        }
        assert_eq!(session.phase(), crate::SessionPhase::Stopped);
    }

    #[test]
    fn test_stop_waits_for_in_flight_submission() {
        let runtime = Runtime::new().unwrap();
        let session = MockSession::with_latency(Duration::from_millis(100));
        let mut agent = mock_agent(session, &runtime);
        agent.start().unwrap();

        let host_thread = std::thread::current().id();
        let outcome = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        agent
            .submit(vec![MockAction::Add(3)], move |result| {
                *slot.lock() = Some((std::thread::current().id(), result.is_ok()));
            })
            .unwrap();
        assert_eq!(agent.in_flight(), 1);

        // Default policy flushes the late result during stop
        let report = agent.stop().unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(*outcome.lock(), Some((host_thread, true)));
        assert_eq!(agent.in_flight(), 0);
    }

    #[test]
    fn test_submission_outliving_grace_completes_on_worker() {
        let runtime = Runtime::new().unwrap();
        let session = Arc::new(MockSession::with_latency(Duration::from_millis(200)));
        let config = DrainLoopConfig {
            shutdown_grace_ms: 0,
            ..every_tick()
        };
        let mut agent = Agent::new(session, config, runtime.handle().clone());
        agent.start().unwrap();

        let host_thread = std::thread::current().id();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        agent
            .submit(vec![MockAction::Add(3)], move |_| {
                done_tx.send(std::thread::current().id()).unwrap();
            })
            .unwrap();

        let report = agent.stop().unwrap();
        assert_eq!(report.executed, 0);

        // Not dropped: the handler still runs, just off the host thread
        let thread = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(thread, host_thread);
        assert_eq!(agent.pending_callbacks(), 0);
    }
}
