//! Test doubles shared by the guard tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::{Method, Request, Url};

use crate::api::{Fetch, FetchError, FetchFuture, FetchResponse};

use super::terminator::{Navigator, SessionTerminator, SignOutReason};

pub fn get_request(path: &str) -> Request {
    let url = Url::parse(&format!("http://api.test{}", path)).expect("test url");
    Request::new(Method::GET, url)
}

/// Terminator that only records what it was asked to do
#[derive(Clone, Default)]
pub struct RecordingTerminator {
    reasons: Arc<Mutex<Vec<SignOutReason>>>,
}

impl RecordingTerminator {
    pub fn reasons(&self) -> Vec<SignOutReason> {
        self.reasons.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }
}

impl SessionTerminator for RecordingTerminator {
    fn terminate(&self, reason: SignOutReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}

#[derive(Clone, Default)]
pub struct RecordingNavigator {
    paths: Arc<Mutex<Vec<String>>>,
}

impl RecordingNavigator {
    pub fn redirects(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, path: &str) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}

/// Fetch that answers every request with the same response
#[derive(Clone)]
pub struct CannedFetch {
    response: Option<FetchResponse>,
    calls: Arc<AtomicUsize>,
}

impl CannedFetch {
    pub fn new(response: FetchResponse) -> Self {
        Self {
            response: Some(response),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetch for CannedFetch {
    fn fetch(&self, _request: Request) -> FetchFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .response
            .clone()
            .ok_or_else(|| FetchError::InvalidRequest("canned failure".to_string()));
        Box::pin(async move { result })
    }
}
