//! REST API client module for the workforce admin API.
//!
//! This module provides the `Fetch` primitive every call goes through and
//! the `ApiClient` that attaches the bearer token from the session store and
//! performs the credential exchange.

pub mod client;
pub mod error;
pub mod fetch;

pub use client::ApiClient;
pub use error::ApiError;
pub use fetch::{Fetch, FetchError, FetchFuture, FetchResponse, ReqwestFetch};
