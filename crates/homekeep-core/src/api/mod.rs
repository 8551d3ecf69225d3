//! Authenticated REST client for the homekeep API.
//!
//! Every ordinary request runs through the interceptor chain, which attaches
//! the current bearer token. A 401 hands the request to the refresh
//! coordinator: one refresh exchange runs at a time and every request that
//! failed behind it is replayed once, in order, with the new token.
//!
//! `DirectTransport` and `ConnectivityProbe` sit outside that pipeline for
//! startup calls that must not trigger a refresh.

pub mod client;
pub mod direct;
pub mod error;
pub mod interceptor;
pub mod notify;
pub mod probe;
pub mod refresh;
pub mod request;

pub use client::{ApiClient, ApiClientBuilder};
pub use direct::{DirectTransport, TransportError};
pub use error::{ApiError, AuthFailure};
pub use interceptor::{BearerAuth, DefaultHeaders, InterceptorChain, RequestInterceptor};
pub use notify::{LogNotifier, Notifier};
pub use probe::{ConnectivityProbe, ProbeReport};
pub use refresh::{RefreshCoordinator, RefreshPhase};
pub use request::RequestDescriptor;
