use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::auth::{SessionData, SessionStore};

/// Why a session was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The API answered 401 or 403
    AuthorizationFailure { status: u16 },
    /// A response body said the token is invalid or expired
    InvalidTokenSignal,
    /// The expiry timer fired, or the session was already expired when loaded
    ScheduledExpiry,
    /// A visibility or focus recheck found the session expired
    ExpiryRecheck,
    /// The user asked to sign out
    UserRequested,
}

impl fmt::Display for SignOutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignOutReason::AuthorizationFailure { status } => {
                write!(f, "authorization failure (HTTP {})", status)
            }
            SignOutReason::InvalidTokenSignal => write!(f, "token rejected by server"),
            SignOutReason::ScheduledExpiry => write!(f, "session expired"),
            SignOutReason::ExpiryRecheck => write!(f, "session expired while inactive"),
            SignOutReason::UserRequested => write!(f, "signed out by user"),
        }
    }
}

/// The single exit action the interceptor and the watcher converge on.
///
/// Implementations must tolerate being called repeatedly and from several
/// tasks at once.
pub trait SessionTerminator: Send + Sync {
    fn terminate(&self, reason: SignOutReason);

    /// Identifies the live session, captured before a call goes out
    fn session_generation(&self) -> Option<u64> {
        None
    }

    /// Terminate on behalf of the session `generation` identified. Once that
    /// session has been replaced the sign-out may be skipped.
    fn terminate_for(&self, reason: SignOutReason, _generation: Option<u64>) {
        self.terminate(reason)
    }
}

impl<T: SessionTerminator + ?Sized> SessionTerminator for Arc<T> {
    fn terminate(&self, reason: SignOutReason) {
        (**self).terminate(reason)
    }

    fn session_generation(&self) -> Option<u64> {
        (**self).session_generation()
    }

    fn terminate_for(&self, reason: SignOutReason, generation: Option<u64>) {
        (**self).terminate_for(reason, generation)
    }
}

/// Moves the client to another location, typically the login entry point.
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

/// Navigator that publishes every redirect as a `session-expired` event.
#[derive(Clone)]
pub struct ChannelNavigator {
    tx: watch::Sender<Option<String>>,
}

impl Default for ChannelNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelNavigator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Receiver that changes each time a redirect happens
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    pub fn last_redirect(&self) -> Option<String> {
        self.tx.borrow().clone()
    }
}

impl Navigator for ChannelNavigator {
    fn redirect(&self, path: &str) {
        self.tx.send_replace(Some(path.to_string()));
    }
}

/// Clears the session store, then redirects to the login path.
///
/// Redirects are issued at most once per session generation: the first
/// caller for a given session navigates, later callers only clear. A
/// terminate with no session ever established still redirects once.
/// `terminate_for` with a generation older than the live one does nothing.
pub struct SignOut<N> {
    store: SessionStore,
    navigator: N,
    login_path: String,
    redirected_generation: Mutex<Option<u64>>,
}

impl<N: Navigator> SignOut<N> {
    pub fn new(store: SessionStore, navigator: N, login_path: impl Into<String>) -> Self {
        Self {
            store,
            navigator,
            login_path: login_path.into(),
            redirected_generation: Mutex::new(None),
        }
    }

    fn redirect_once(&self, reason: SignOutReason, generation: u64, cleared: Option<SessionData>) {
        {
            let mut redirected = self
                .redirected_generation
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *redirected == Some(generation) {
                debug!(%reason, generation, "Sign-out already redirected for this session");
                return;
            }
            *redirected = Some(generation);
        }

        info!(
            %reason,
            had_session = cleared.is_some(),
            login_path = %self.login_path,
            "Signing out"
        );
        self.navigator.redirect(&self.login_path);
    }
}

impl<N: Navigator> SessionTerminator for SignOut<N> {
    fn terminate(&self, reason: SignOutReason) {
        let generation = self.store.generation();
        let cleared = self.store.clear();
        self.redirect_once(reason, generation, cleared);
    }

    fn session_generation(&self) -> Option<u64> {
        Some(self.store.generation())
    }

    fn terminate_for(&self, reason: SignOutReason, generation: Option<u64>) {
        let Some(generation) = generation else {
            return self.terminate(reason);
        };

        match self.store.clear_generation(generation) {
            Ok(cleared) => self.redirect_once(reason, generation, cleared),
            Err(current) => debug!(
                %reason,
                generation,
                current,
                "Session was replaced before the sign-out arrived, keeping it"
            ),
        }
    }
}
