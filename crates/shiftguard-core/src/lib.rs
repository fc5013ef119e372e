//! Core library for shiftguard.
//!
//! Shiftguard is a command-line console for a workforce-management admin
//! API. This crate holds everything except the terminal front end:
//!
//! - `api`: the `Fetch` primitive and the `ApiClient`
//! - `auth`: the session store, token claims and keychain credentials
//! - `guard`: the session-lifecycle guard (response interception, expiry
//!   watching and the sign-out trigger)
//! - `config`: persisted console configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod utils;

pub use api::{ApiClient, ApiError, Fetch, FetchError, FetchResponse, ReqwestFetch};
pub use auth::{CredentialStore, SessionData, SessionStore};
pub use config::Config;
pub use guard::{
    ChannelNavigator, FetchSlot, GuardHandle, SessionGuard, SessionTerminator, SignOut,
    SignOutReason, WakeSignal,
};
