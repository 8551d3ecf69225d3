//! Ordered request pipeline run before every ordinary request.
//!
//! The chain is fixed when the client is built. Stages only edit the request;
//! they never perform I/O and never touch refresh state.

use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Request;

use super::ApiError;
use crate::auth::AccessCredential;

pub trait RequestInterceptor: Send + Sync {
    /// Edit an outbound request. `credential` is the token store snapshot
    /// taken for this attempt.
    fn intercept(
        &self,
        request: &mut Request,
        credential: Option<&AccessCredential>,
    ) -> Result<(), ApiError>;
}

/// Attaches `Authorization: Bearer <token>` when a credential exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerAuth;

impl RequestInterceptor for BearerAuth {
    fn intercept(
        &self,
        request: &mut Request,
        credential: Option<&AccessCredential>,
    ) -> Result<(), ApiError> {
        let Some(credential) = credential else {
            return Ok(());
        };
        let mut value = HeaderValue::from_str(&credential.bearer()).map_err(|_| {
            ApiError::InvalidRequest("access token is not a valid header value".to_string())
        })?;
        value.set_sensitive(true);
        request.headers_mut().insert(header::AUTHORIZATION, value);
        Ok(())
    }
}

/// Adds a fixed set of headers, without overwriting ones already present.
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaders {
    headers: HeaderMap,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Accept: application/json`
    pub fn json() -> Self {
        Self::new().with(header::ACCEPT, HeaderValue::from_static("application/json"))
    }

    pub fn with(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl RequestInterceptor for DefaultHeaders {
    fn intercept(
        &self,
        request: &mut Request,
        _credential: Option<&AccessCredential>,
    ) -> Result<(), ApiError> {
        for (name, value) in &self.headers {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn RequestInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard chain: JSON accept header, then bearer auth
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(DefaultHeaders::json()))
            .with(Arc::new(BearerAuth))
    }

    pub fn with(mut self, stage: Arc<dyn RequestInterceptor>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, stopping at the first error
    pub fn apply(
        &self,
        request: &mut Request,
        credential: Option<&AccessCredential>,
    ) -> Result<(), ApiError> {
        for stage in &self.stages {
            stage.intercept(request, credential)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, Url};

    fn request() -> Request {
        Request::new(
            Method::GET,
            Url::parse("https://api.example.com/tasks").unwrap(),
        )
    }

    struct Tag(&'static str);

    impl RequestInterceptor for Tag {
        fn intercept(&self, request: &mut Request, _: Option<&AccessCredential>) -> Result<(), ApiError> {
            let previous = request
                .headers()
                .get("x-trace")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let value = HeaderValue::from_str(&format!("{}{}", previous, self.0)).unwrap();
            request.headers_mut().insert("x-trace", value);
            Ok(())
        }
    }

    #[test]
    fn test_bearer_attached_when_present() {
        let mut req = request();
        let cred = AccessCredential::new("T1").unwrap();
        BearerAuth.intercept(&mut req, Some(&cred)).unwrap();

        let value = req.headers().get(header::AUTHORIZATION).unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer T1");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_request_untouched_without_credential() {
        let mut req = request();
        BearerAuth.intercept(&mut req, None).unwrap();
        assert!(req.headers().is_empty());
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let mut req = request();
        let cred = AccessCredential::new("bad\ntoken").unwrap();
        assert!(matches!(
            BearerAuth.intercept(&mut req, Some(&cred)),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_default_headers_do_not_overwrite() {
        let mut req = request();
        req.headers_mut()
            .insert(header::ACCEPT, HeaderValue::from_static("text/csv"));
        DefaultHeaders::json().intercept(&mut req, None).unwrap();
        assert_eq!(req.headers()[header::ACCEPT], "text/csv");
    }

    #[test]
    fn test_chain_runs_in_order() {
        let chain = InterceptorChain::new()
            .with(Arc::new(Tag("a")))
            .with(Arc::new(Tag("b")))
            .with(Arc::new(Tag("c")));
        let mut req = request();
        chain.apply(&mut req, None).unwrap();
        assert_eq!(req.headers()["x-trace"], "abc");
    }

    #[test]
    fn test_standard_chain() {
        let chain = InterceptorChain::standard();
        assert_eq!(chain.len(), 2);

        let mut req = request();
        let cred = AccessCredential::new("T2").unwrap();
        chain.apply(&mut req, Some(&cred)).unwrap();
        assert_eq!(req.headers()[header::AUTHORIZATION], "Bearer T2");
        assert_eq!(req.headers()[header::ACCEPT], "application/json");
    }
}
