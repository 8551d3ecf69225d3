use tracing::warn;

use super::ApiError;

/// Receives every error surfaced to a caller, for user-visible notification.
pub trait Notifier: Send + Sync {
    fn notify(&self, error: &ApiError);
}

/// Default notifier: writes a warning to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, error: &ApiError) {
        match error {
            ApiError::AuthInvalid(reason) => warn!(%reason, "Session ended, sign in again"),
            ApiError::NetworkError(e) => warn!(error = %e, "Could not reach the server"),
            e if e.is_transient() => warn!(error = %e, "Temporary failure, try again later"),
            e => warn!(error = %e, "Request failed"),
        }
    }
}
