use reqwest::{Response, StatusCode};
use thiserror::Error;

/// Why an authenticated session could not be kept alive
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("request rejected again after token refresh")]
    RetryRejected,

    #[error("no refresh credential present")]
    MissingRefreshCredential,

    #[error("refresh endpoint rejected the refresh credential")]
    RefreshRejected,

    #[error("refresh endpoint unreachable")]
    RefreshUnavailable,

    #[error("invalid email or password")]
    LoginRejected,
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401 on a request that has not been retried yet. Handled by the
    /// refresh coordinator and never returned to callers.
    #[error("Unauthorized - token may be expired")]
    AuthExpired,

    #[error("Authentication failed: {0}")]
    AuthInvalid(AuthFailure),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[source] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::AuthExpired,
            403 => ApiError::Forbidden(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError {
                status: status.as_u16(),
                body: truncated,
            },
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Classify a failure where no usable response arrived.
    ///
    /// Timeouts, DNS and connection failures (including cross-origin blocks
    /// upstream) are network errors; a body that would not decode is not.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::NetworkError(err)
        }
    }

    /// Fatal for the session: the user has to sign in again
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthInvalid(_))
    }

    /// Worth a user-initiated retry later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::ServerError { .. } | ApiError::NetworkError(_) | ApiError::RateLimited
        )
    }

    /// Everything except the internally recovered expiry reaches the user
    pub fn should_notify(&self) -> bool {
        !matches!(self, ApiError::AuthExpired)
    }
}

/// Pass successful responses through, turn everything else into an `ApiError`.
pub async fn classify(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        // Body is irrelevant for expiry and may be large
        return Err(ApiError::AuthExpired);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(status, &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_taxonomy() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::AuthExpired
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, "nope"),
            ApiError::Forbidden(ref b) if b == "nope"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, "missing"),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, ""),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(ApiError::truncate_body(short), short);

        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 100);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("600 total bytes"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        // 'é' is two bytes, so byte 500 falls inside a character
        let long = format!("a{}", "é".repeat(400));
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_dispositions() {
        assert!(ApiError::AuthInvalid(AuthFailure::RetryRejected).is_auth_failure());
        assert!(ApiError::RateLimited.is_transient());
        assert!(!ApiError::Forbidden(String::new()).is_transient());
        assert!(!ApiError::AuthExpired.should_notify());
        assert!(ApiError::NotFound(String::new()).should_notify());
    }
}
