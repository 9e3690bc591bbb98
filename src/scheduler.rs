//! Session-tagged one-shot timers for the supervisor loop.
//!
//! Every delay in the connection state machine (activation pacing, the
//! activation timeout, reconnect backoff, ...) runs through a [`Scheduler`]
//! so that it can be cancelled by kind and so that a fire from a previous
//! connection session can never act on the current one. The supervisor bumps
//! the session on every connect and disconnect; a [`TimerFired`] whose
//! session does not match the current one is dropped on receipt.

use std::collections::HashMap;
use std::time::Duration;

use log::trace;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The distinct delays the state machine schedules. At most one timer per
/// kind is pending; scheduling a kind again replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Post-MTU settle before service discovery.
    DiscoverServices,
    /// Post-discovery settle before battery notifications and the activation
    /// queue are brought up.
    SetupStreams,
    /// Post-discovery settle before the services-ready gate opens.
    ServicesReady,
    /// Initial delay between a start request and the first activation.
    BeginActivation,
    /// Settle delay between one sensor confirming and the next starting.
    ActivateNext,
    /// Per-sensor activation timeout (advance past an unresponsive sensor).
    ActivationTimeout,
    /// Settle after tearing notifications down before restarting them.
    TeardownSettle,
    /// Backoff before the next auto-reconnect attempt.
    Reconnect,
}

/// Delivered when a scheduled delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Session the timer was armed in.
    pub session: u64,
    pub kind: TimerKind,
}

/// Owns the pending timers and the current session counter.
pub struct Scheduler {
    session: u64,
    tx: mpsc::Sender<TimerFired>,
    pending: HashMap<TimerKind, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(tx: mpsc::Sender<TimerFired>) -> Self {
        Self {
            session: 0,
            tx,
            pending: HashMap::new(),
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// True when `fired` was armed in the current session.
    pub fn is_current(&self, fired: TimerFired) -> bool {
        fired.session == self.session
    }

    /// Cancel everything and start a new session. Timers already in flight
    /// from the old session still deliver, but fail the [`Self::is_current`]
    /// check.
    pub fn bump_session(&mut self) {
        self.cancel_all();
        self.session += 1;
        trace!("scheduler session -> {}", self.session);
    }

    /// Arm a one-shot timer, replacing any pending timer of the same kind.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        trace!("arm {kind:?} in {delay:?} (session {})", self.session);
        let tx = self.tx.clone();
        let fired = TimerFired {
            session: self.session,
            kind,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired).await;
        });
        self.pending.insert(kind, handle);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.pending.remove(&kind) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sched = Scheduler::new(tx);
        sched.schedule(TimerKind::Reconnect, Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(4)).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.kind, TimerKind::Reconnect);
        assert!(sched.is_current(fired));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sched = Scheduler::new(tx);
        sched.schedule(TimerKind::ActivateNext, Duration::from_secs(1));
        sched.schedule(TimerKind::ActivateNext, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err(), "first arming was replaced");
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(rx.recv().await.unwrap().kind, TimerKind::ActivateNext);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sched = Scheduler::new(tx);
        sched.schedule(TimerKind::ActivationTimeout, Duration::from_secs(8));
        sched.cancel(TimerKind::ActivationTimeout);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_session_fire_is_detectable() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sched = Scheduler::new(tx);
        sched.schedule(TimerKind::BeginActivation, Duration::from_secs(1));
        let old = TimerFired {
            session: sched.session(),
            kind: TimerKind::BeginActivation,
        };
        sched.bump_session();

        assert!(!sched.is_current(old));
        tokio::time::sleep(Duration::from_secs(2)).await;
        // The arming itself was aborted too.
        assert!(rx.try_recv().is_err());
    }
}
