//! Session-lifecycle guard.
//!
//! This module provides:
//! - `GuardedFetch`: inspects every response and signs out on 401/403 or a
//!   "token invalid/expired" message
//! - `ExpiryWatcher`: signs out once the session expiry has passed
//! - `SignOut`: the single convergence point that clears the session and
//!   redirects to the login path
//! - `SessionGuard`: mounts the first two against a `FetchSlot` and a
//!   `SessionStore`, returning a handle that tears the watcher down

pub mod interceptor;
pub mod slot;
pub mod terminator;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::SessionStore;

pub use interceptor::{inspect, GuardedFetch, TOKEN_SIGNALS};
pub use slot::{FetchSlot, WatcherState};
pub use terminator::{ChannelNavigator, Navigator, SessionTerminator, SignOut, SignOutReason};
pub use watcher::{Clock, ExpiryWatcher, SystemClock, WakeSignal};

pub struct SessionGuard;

impl SessionGuard {
    /// Guard outbound calls made through `slot` and start watching the
    /// expiry of `store`.
    ///
    /// The slot is wrapped at most once however often this is called. The
    /// watcher needs a tokio runtime; without one only the interceptor is
    /// active.
    pub fn mount(
        slot: &FetchSlot,
        store: &SessionStore,
        terminator: Arc<dyn SessionTerminator>,
        signals: Option<mpsc::Receiver<WakeSignal>>,
    ) -> GuardHandle {
        slot.install_guard(Arc::clone(&terminator));

        let task = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let mut watcher = ExpiryWatcher::new(store, terminator);
                if let Some(signals) = signals {
                    watcher = watcher.with_signals(signals);
                }
                Some(runtime.spawn(watcher.run()))
            }
            Err(_) => {
                warn!("No async runtime available, expiry watcher disabled");
                None
            }
        };

        GuardHandle { task }
    }
}

/// Keeps the expiry watcher alive. Dropping it disarms the timer and stops
/// listening for wake signals.
pub struct GuardHandle {
    task: Option<JoinHandle<()>>,
}

impl GuardHandle {
    pub fn is_watching(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn unmount(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Expiry watcher stopped");
            task.abort();
        }
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
