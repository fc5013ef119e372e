//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionStore`: the single live session, persisted to the cache dir
//! - `TokenClaims`: expiry derivation from the issued bearer token
//! - `CredentialStore`: secure OS-level credential storage via keyring

pub mod claims;
pub mod credentials;
pub mod session;

pub use claims::{resolve_expiry, TokenClaims};
pub use credentials::CredentialStore;
pub use session::{SessionData, SessionStore};
