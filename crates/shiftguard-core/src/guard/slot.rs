use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use reqwest::Request;
use tracing::{debug, info};

use crate::api::{Fetch, FetchFuture};

use super::interceptor::GuardedFetch;
use super::terminator::SessionTerminator;

static GLOBAL_SLOT: OnceLock<Arc<FetchSlot>> = OnceLock::new();

/// Records whether a slot's primitive has been wrapped.
/// Starts false, flips to true once, never flips back.
#[derive(Debug, Default)]
pub struct WatcherState {
    wrapped: AtomicBool,
}

impl WatcherState {
    pub const fn new() -> Self {
        Self {
            wrapped: AtomicBool::new(false),
        }
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped.load(Ordering::SeqCst)
    }

    /// Returns true for exactly one caller
    fn claim(&self) -> bool {
        self.wrapped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Holder of the outbound-call primitive that the rest of the client uses.
///
/// Callers fetch through the slot, so wrapping the primitive here affects
/// every call made afterwards.
pub struct FetchSlot {
    primitive: RwLock<Arc<dyn Fetch>>,
    state: WatcherState,
}

impl FetchSlot {
    pub fn new(primitive: Arc<dyn Fetch>) -> Self {
        Self {
            primitive: RwLock::new(primitive),
            state: WatcherState::new(),
        }
    }

    /// Install the process-wide slot. Later calls return the existing slot
    /// and drop their primitive.
    pub fn init_global(primitive: Arc<dyn Fetch>) -> Arc<FetchSlot> {
        Arc::clone(GLOBAL_SLOT.get_or_init(|| Arc::new(FetchSlot::new(primitive))))
    }

    pub fn state(&self) -> &WatcherState {
        &self.state
    }

    /// The primitive currently in place (wrapped or not)
    pub fn current(&self) -> Arc<dyn Fetch> {
        self.primitive.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wrap the primitive with response inspection. Only the first call has
    /// any effect; returns whether this call did the wrapping.
    pub fn install_guard<T: SessionTerminator + 'static>(&self, terminator: T) -> bool {
        if !self.state.claim() {
            debug!("Outbound calls are already guarded");
            return false;
        }

        let mut primitive = self.primitive.write().unwrap_or_else(|e| e.into_inner());
        let inner: Arc<dyn Fetch> = primitive.clone();
        *primitive = Arc::new(GuardedFetch::new(inner, terminator));
        info!("Session guard installed on outbound calls");
        true
    }
}

impl Fetch for FetchSlot {
    fn fetch(&self, request: Request) -> FetchFuture<'_> {
        let primitive = self.current();
        Box::pin(async move { primitive.fetch(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FetchResponse;
    use crate::guard::testing::{get_request, CannedFetch, RecordingTerminator};
    use reqwest::StatusCode;

    #[test]
    fn test_watcher_state_claims_once() {
        let state = WatcherState::new();
        assert!(!state.is_wrapped());
        assert!(state.claim());
        assert!(state.is_wrapped());
        assert!(!state.claim());
        assert!(state.is_wrapped());
    }

    #[tokio::test]
    async fn test_unwrapped_slot_forwards() {
        let inner = CannedFetch::new(FetchResponse::new(StatusCode::UNAUTHORIZED, ""));
        let slot = FetchSlot::new(Arc::new(inner.clone()));

        let response = slot.fetch(get_request("/settings")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(inner.calls(), 1);
        assert!(!slot.state().is_wrapped());
    }

    #[tokio::test]
    async fn test_install_guard_wraps_only_once() {
        let inner = CannedFetch::new(FetchResponse::new(StatusCode::UNAUTHORIZED, ""));
        let slot = FetchSlot::new(Arc::new(inner.clone()));
        let terminator = RecordingTerminator::default();

        assert!(slot.install_guard(terminator.clone()));
        assert!(!slot.install_guard(terminator.clone()));
        assert!(!slot.install_guard(terminator.clone()));
        assert!(slot.state().is_wrapped());

        slot.fetch(get_request("/timesheets")).await.unwrap();

        // One underlying call, one inspection
        assert_eq!(inner.calls(), 1);
        assert_eq!(terminator.count(), 1);
    }
}
