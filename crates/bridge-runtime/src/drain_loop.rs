//! Drain Loop - recurring host-thread task that empties the Action Queue
//!
//! The host registers [`DrainLoop::tick`] with its own scheduler (a frame
//! callback, a timer) or hands the thread over to [`DrainLoop::run_until`].
//! Either way the loop drains at most once per configured interval.

use crate::{
    action_queue::{ActionQueue, ActionSender, DrainReport},
    error::BridgeError,
    DEFAULT_DRAIN_INTERVAL_MS, DEFAULT_SHUTDOWN_GRACE_MS,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

/// What happens to queued callbacks when the loop stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run one final drain pass
    #[default]
    Flush,
    /// Drop everything still queued
    Discard,
}

/// Drain loop configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainLoopConfig {
    /// Minimum time between drains in milliseconds (0 = every host tick)
    pub interval_ms: u64,
    /// Behaviour on stop
    pub shutdown_policy: ShutdownPolicy,
    /// How long an agent's stop waits for in-flight submissions
    pub shutdown_grace_ms: u64,
}

impl DrainLoopConfig {
    /// Drain interval, or `None` to drain on every tick
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for DrainLoopConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
            shutdown_policy: ShutdownPolicy::Flush,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

/// Lifecycle of a drain loop. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainState {
    NotStarted,
    Running,
    Stopped,
}

impl DrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::NotStarted => "not_started",
            DrainState::Running => "running",
            DrainState::Stopped => "stopped",
        }
    }
}

/// Counters accumulated over the loop's lifetime
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Drain passes performed
    pub drains: u64,
    /// Callbacks that completed
    pub executed: u64,
    /// Callbacks that failed
    pub failed: u64,
    /// Callbacks dropped by a discarding shutdown
    pub discarded: u64,
}

/// Recurring drain task bound to the host thread
///
/// Owns the [`ActionQueue`]; like the queue it never leaves the host
/// thread.
pub struct DrainLoop {
    queue: ActionQueue,
    config: DrainLoopConfig,
    state: DrainState,
    last_drain: Option<Instant>,
    stats: DrainStats,
}

impl DrainLoop {
    /// Create a drain loop with an empty queue
    pub fn new(config: DrainLoopConfig) -> Self {
        Self::with_queue(ActionQueue::new(), config)
    }

    /// Create a drain loop around an existing queue
    pub fn with_queue(queue: ActionQueue, config: DrainLoopConfig) -> Self {
        Self {
            queue,
            config,
            state: DrainState::NotStarted,
            last_drain: None,
            stats: DrainStats::default(),
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn stats(&self) -> DrainStats {
        self.stats
    }

    pub fn config(&self) -> &DrainLoopConfig {
        &self.config
    }

    /// The queue drained by this loop
    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Get a producer handle for other threads
    pub fn sender(&self) -> ActionSender {
        self.queue.sender()
    }

    /// NotStarted -> Running
    pub fn start(&mut self) -> Result<(), BridgeError> {
        self.transition(DrainState::NotStarted, DrainState::Running)?;
        self.last_drain = None;
        tracing::info!(
            "Drain loop started (interval: {})",
            match self.config.interval() {
                Some(interval) => format!("{}ms", interval.as_millis()),
                None => "every tick".to_string(),
            }
        );
        Ok(())
    }

    /// Running -> Stopped, applying the configured [`ShutdownPolicy`]
    ///
    /// Senders are refused first, so the policy sees everything that will
    /// ever reach this queue from other threads.
    pub fn stop(&mut self) -> Result<DrainReport, BridgeError> {
        self.transition(DrainState::Running, DrainState::Stopped)?;
        self.queue.close();

        let report = match self.config.shutdown_policy {
            ShutdownPolicy::Flush => {
                let report = self.queue.drain_once();
                self.record(&report);
                report
            }
            ShutdownPolicy::Discard => {
                let discarded = self.queue.clear();
                self.stats.discarded += discarded as u64;
                DrainReport {
                    deferred: discarded,
                    ..DrainReport::default()
                }
            }
        };

        tracing::info!(
            "Drain loop stopped ({:?}): {} executed, {} failed, {} left behind",
            self.config.shutdown_policy,
            report.executed,
            report.failed,
            report.deferred
        );
        Ok(report)
    }

    /// Host scheduler hook, called once per host tick
    ///
    /// Returns `Ok(None)` when the interval has not elapsed yet.
    pub fn tick(&mut self, now: Instant) -> Result<Option<DrainReport>, BridgeError> {
        if self.state != DrainState::Running {
            return Err(BridgeError::SessionNotReady(self.state.as_str()));
        }

        let due = match (self.config.interval(), self.last_drain) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        };
        if !due {
            return Ok(None);
        }

        self.last_drain = Some(now);
        Ok(Some(self.drain_now()))
    }

    /// Drain immediately, ignoring the interval
    pub fn drain_now(&mut self) -> DrainReport {
        let report = self.queue.drain_once();
        self.record(&report);
        report
    }

    /// Drive the loop on the current thread until `running` is cleared
    ///
    /// For hosts without a frame loop of their own. Sleeps the remainder
    /// of each interval.
    pub fn run_until(&mut self, running: &AtomicBool) -> Result<(), BridgeError> {
        if self.state != DrainState::Running {
            return Err(BridgeError::SessionNotReady(self.state.as_str()));
        }

        let period = self
            .config
            .interval()
            .unwrap_or(Duration::from_millis(DEFAULT_DRAIN_INTERVAL_MS));

        while running.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            self.last_drain = Some(tick_start);
            self.drain_now();

            let elapsed = tick_start.elapsed();
            if elapsed > period {
                tracing::warn!(
                    "Drain took {:.2}ms (interval: {}ms)",
                    elapsed.as_secs_f64() * 1000.0,
                    period.as_millis()
                );
            }

            if let Some(sleep_time) = period.checked_sub(elapsed) {
                std::thread::sleep(sleep_time);
            }
        }

        Ok(())
    }

    fn transition(&mut self, from: DrainState, to: DrainState) -> Result<(), BridgeError> {
        if self.state != from {
            return Err(BridgeError::InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        self.state = to;
        Ok(())
    }

    fn record(&mut self, report: &DrainReport) {
        self.stats.drains += 1;
        self.stats.executed += report.executed as u64;
        self.stats.failed += report.failed as u64;
    }
}
