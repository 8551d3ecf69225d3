//! Authentication module for the client-side credential lifecycle.
//!
//! This module provides:
//! - `AccessCredential`: the bearer token, redacted in debug output
//! - `TokenStore`: the single owner of the current access credential
//! - `FallbackStore`: persisted mirror used to resume a session after restart
//! - `AuthSession`: derived view of who is signed in
//!
//! - `RefreshCookieFile`: on-disk copy of the refresh cookie
//!
//! The refresh credential never passes through the token store. It lives in
//! the cookie jar owned by the API client's auth-boundary transport.

pub mod cookie_file;
pub mod credential;
pub mod fallback;
pub mod session;
pub mod token_store;

pub use cookie_file::RefreshCookieFile;
pub use credential::AccessCredential;
pub use fallback::{FallbackStore, FileFallback, KeyringFallback, MemoryFallback};
pub use session::{AuthSession, UserIdentity};
pub use token_store::TokenStore;
