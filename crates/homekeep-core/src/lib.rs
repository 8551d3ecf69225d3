//! Core library for homekeep.
//!
//! Provides the authenticated API client used by every homekeep front-end:
//! token storage with a persisted fallback, the request interceptor chain,
//! single-flight token refresh, error classification, a bypass transport for
//! startup calls, and a connectivity probe.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError};
pub use config::Config;
