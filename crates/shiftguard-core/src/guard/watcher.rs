//! Proactive session expiry.
//!
//! The watcher ends a session once its expiry timestamp has passed, through
//! any of three redundant paths: an immediate check when a session shows up,
//! a one-shot timer armed for the remaining time, and a recheck whenever the
//! client reports it became visible or focused again.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::auth::SessionStore;

use super::terminator::{SessionTerminator, SignOutReason};

/// Client activity that warrants an expiry recheck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSignal {
    Visibility,
    Focus,
}

/// Source of wall-clock time, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time left before `expires_at`, zero when already past
pub fn until_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

enum Wake {
    TimerFired,
    ExpiryChanged,
    Signal(WakeSignal),
    SignalsClosed,
    StoreDropped,
}

pub struct ExpiryWatcher<T> {
    expiry: watch::Receiver<Option<DateTime<Utc>>>,
    signals: Option<mpsc::Receiver<WakeSignal>>,
    terminator: T,
    clock: Arc<dyn Clock>,
}

impl<T: SessionTerminator> ExpiryWatcher<T> {
    pub fn new(store: &SessionStore, terminator: T) -> Self {
        Self {
            expiry: store.subscribe_expiry(),
            signals: None,
            terminator,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_signals(mut self, signals: mpsc::Receiver<WakeSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Watch until the session store goes away.
    pub async fn run(mut self) {
        loop {
            let current = *self.expiry.borrow_and_update();
            let Some(expires_at) = current else {
                // No session: inert until one is established
                if self.expiry.changed().await.is_err() {
                    return;
                }
                continue;
            };

            if !self.watch_session(expires_at).await {
                return;
            }
        }
    }

    /// Watch one expiry timestamp. Returns false when the store is gone.
    async fn watch_session(&mut self, expires_at: DateTime<Utc>) -> bool {
        let remaining = until_expiry(expires_at, self.clock.now());
        if remaining.is_zero() {
            self.expire(SignOutReason::ScheduledExpiry, expires_at);
            return self.expiry.changed().await.is_ok();
        }

        debug!(%expires_at, remaining_ms = remaining.as_millis() as u64, "Expiry timer armed");
        let timer = tokio::time::sleep(remaining);
        tokio::pin!(timer);

        loop {
            let wake = tokio::select! {
                _ = &mut timer => Wake::TimerFired,
                changed = self.expiry.changed() => match changed {
                    Ok(()) => Wake::ExpiryChanged,
                    Err(_) => Wake::StoreDropped,
                },
                signal = next_signal(&mut self.signals) => match signal {
                    Some(signal) => Wake::Signal(signal),
                    None => Wake::SignalsClosed,
                },
            };

            match wake {
                Wake::TimerFired => {
                    self.expire(SignOutReason::ScheduledExpiry, expires_at);
                    return self.expiry.changed().await.is_ok();
                }
                // Disarm and let the caller rearm for the new timestamp
                Wake::ExpiryChanged => return true,
                Wake::StoreDropped => return false,
                Wake::Signal(signal) => {
                    if self.clock.now() > expires_at {
                        debug!(?signal, "Recheck found the session expired");
                        self.expire(SignOutReason::ExpiryRecheck, expires_at);
                        return self.expiry.changed().await.is_ok();
                    }
                }
                Wake::SignalsClosed => {
                    debug!("Wake signal source closed, relying on the timer");
                    self.signals = None;
                }
            }
        }
    }

    fn expire(&self, reason: SignOutReason, expires_at: DateTime<Utc>) {
        debug!(%reason, %expires_at, "Session expired");
        self.terminator.terminate(reason);
    }
}

async fn next_signal(signals: &mut Option<mpsc::Receiver<WakeSignal>>) -> Option<WakeSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::sample_session;
    use crate::guard::testing::RecordingTerminator;
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn set(&self, now: DateTime<Utc>) {
            *self.0.lock().unwrap() = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_until_expiry_clamps_to_zero() {
        let now = Utc::now();
        assert_eq!(until_expiry(now - chrono::Duration::seconds(3), now), Duration::ZERO);
        assert_eq!(until_expiry(now, now), Duration::ZERO);
        assert_eq!(
            until_expiry(now + chrono::Duration::milliseconds(1500), now),
            Duration::from_millis(1500)
        );
    }

    #[tokio::test]
    async fn test_no_session_is_inert() {
        let store = SessionStore::new();
        let terminator = RecordingTerminator::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(
            ExpiryWatcher::new(&store, terminator.clone())
                .with_signals(rx)
                .run(),
        );

        tx.send(WakeSignal::Focus).await.unwrap();
        tx.send(WakeSignal::Visibility).await.unwrap();
        settle().await;

        assert_eq!(terminator.count(), 0);
        task.abort();
    }

    #[tokio::test]
    async fn test_past_expiry_signs_out_immediately() {
        let store = SessionStore::new();
        store
            .establish(sample_session(Utc::now() - chrono::Duration::seconds(1)))
            .unwrap();
        let terminator = RecordingTerminator::default();
        let task = tokio::spawn(ExpiryWatcher::new(&store, terminator.clone()).run());

        settle().await;

        assert_eq!(terminator.reasons(), vec![SignOutReason::ScheduledExpiry]);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_at_expiry_not_before() {
        let store = SessionStore::new();
        store
            .establish(sample_session(Utc::now() + chrono::Duration::milliseconds(5000)))
            .unwrap();
        let terminator = RecordingTerminator::default();
        let task = tokio::spawn(ExpiryWatcher::new(&store, terminator.clone()).run());
        settle().await;

        tokio::time::advance(Duration::from_millis(4900)).await;
        settle().await;
        assert_eq!(terminator.count(), 0);

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(terminator.reasons(), vec![SignOutReason::ScheduledExpiry]);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_rearms_timer() {
        let store = SessionStore::new();
        store
            .establish(sample_session(Utc::now() + chrono::Duration::milliseconds(1000)))
            .unwrap();
        let terminator = RecordingTerminator::default();
        let task = tokio::spawn(ExpiryWatcher::new(&store, terminator.clone()).run());
        settle().await;

        // Refresh before the first deadline
        tokio::time::advance(Duration::from_millis(500)).await;
        store
            .establish(sample_session(Utc::now() + chrono::Duration::milliseconds(10_000)))
            .unwrap();
        settle().await;

        tokio::time::advance(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(terminator.count(), 0);

        tokio::time::advance(Duration::from_millis(9500)).await;
        settle().await;
        assert_eq!(terminator.count(), 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_focus_recheck_detects_expiry() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock(Mutex::new(start)));
        let store = SessionStore::new();
        store
            .establish(sample_session(start + chrono::Duration::hours(1)))
            .unwrap();
        let terminator = RecordingTerminator::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(
            ExpiryWatcher::new(&store, terminator.clone())
                .with_signals(rx)
                .with_clock(clock.clone())
                .run(),
        );
        settle().await;

        // Still valid: focus does nothing
        tx.send(WakeSignal::Focus).await.unwrap();
        settle().await;
        assert_eq!(terminator.count(), 0);

        // Client slept through the deadline
        clock.set(start + chrono::Duration::hours(2));
        tx.send(WakeSignal::Visibility).await.unwrap();
        settle().await;
        assert_eq!(terminator.reasons(), vec![SignOutReason::ExpiryRecheck]);
        task.abort();
    }

    #[tokio::test]
    async fn test_closed_signal_source_keeps_timer() {
        let store = SessionStore::new();
        store
            .establish(sample_session(Utc::now() + chrono::Duration::milliseconds(50)))
            .unwrap();
        let terminator = RecordingTerminator::default();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let task = tokio::spawn(
            ExpiryWatcher::new(&store, terminator.clone())
                .with_signals(rx)
                .run(),
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(terminator.count(), 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_fires_once_then_waits_for_new_session() {
        let store = SessionStore::new();
        store
            .establish(sample_session(Utc::now() - chrono::Duration::seconds(1)))
            .unwrap();
        let terminator = RecordingTerminator::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(
            ExpiryWatcher::new(&store, terminator.clone())
                .with_signals(rx)
                .run(),
        );
        settle().await;
        // The recording terminator does not clear the store
        tx.send(WakeSignal::Focus).await.unwrap();
        settle().await;
        assert_eq!(terminator.count(), 1);

        store
            .establish(sample_session(Utc::now() - chrono::Duration::seconds(1)))
            .unwrap();
        settle().await;
        assert_eq!(terminator.count(), 2);
        task.abort();
    }
}
