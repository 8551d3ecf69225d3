//! API client for the homekeep REST API.
//!
//! `ApiClient` is the one owned service through which the application talks
//! to the backend. It owns the token store, the interceptor chain and the
//! refresh coordinator, and hands out the direct transport and connectivity
//! probe that bypass them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::direct::TransportError;
use super::error::classify;
use super::{
    ApiError, AuthFailure, ConnectivityProbe, DirectTransport, InterceptorChain, LogNotifier,
    Notifier, RefreshCoordinator, RefreshPhase, RequestDescriptor, RequestInterceptor,
};
use crate::auth::{
    AccessCredential, AuthSession, FallbackStore, FileFallback, KeyringFallback, MemoryFallback,
    RefreshCookieFile, TokenStore, UserIdentity,
};
use crate::config::{Config, FallbackKind, APP_NAME};

// ============================================================================
// Constants
// ============================================================================

/// Exchanges the refresh cookie for a new access token
const REFRESH_PATH: &str = "/auth/refresh";

const LOGIN_PATH: &str = "/auth/login";

const LOGOUT_PATH: &str = "/auth/logout";

/// "Who am I", checked at startup through the direct transport
const WHOAMI_PATH: &str = "/auth/me";

/// Invoked with no arguments when the session ends for good
pub type SessionEndHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    user: UserIdentity,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    user: Option<UserIdentity>,
}

pub struct ApiClientBuilder {
    config: Config,
    fallback: Option<Arc<dyn FallbackStore>>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    notifier: Option<Arc<dyn Notifier>>,
    on_session_end: Option<SessionEndHook>,
    cookies: Option<Arc<Jar>>,
    cookie_file: Option<RefreshCookieFile>,
}

impl ApiClientBuilder {
    /// Override the fallback store chosen by the config
    pub fn fallback(mut self, fallback: Arc<dyn FallbackStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Append a stage after the standard accept/bearer stages
    pub fn interceptor(mut self, stage: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(stage);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn on_session_end<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_session_end = Some(Arc::new(hook));
        self
    }

    /// Cookie jar holding the refresh credential. Only the auth endpoints
    /// see it.
    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookies = Some(jar);
        self
    }

    /// Where the refresh cookie is kept between runs. Without this, a
    /// client whose token fallback is persistent keeps the cookie next to it
    /// in the cache directory; an injected jar is left to its owner.
    pub fn refresh_cookie_file(mut self, file: RefreshCookieFile) -> Self {
        self.cookie_file = Some(file);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);

        // Ordinary, direct and probe traffic: no cookie store at all
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = self.config.api_base_url.trim_end_matches('/').to_string();

        let cookie_file = match self.cookie_file {
            Some(file) => Some(file),
            None if self.cookies.is_some() => None,
            None => match self.config.fallback {
                FallbackKind::Memory => None,
                FallbackKind::File | FallbackKind::Keyring => {
                    Some(RefreshCookieFile::new(self.config.cache_dir()?))
                }
            },
        };

        let cookies = self.cookies.unwrap_or_default();
        if let Some((name, value)) = cookie_file.as_ref().and_then(RefreshCookieFile::load) {
            // Scoped to the refresh endpoint's directory, which also covers logout
            let url = Url::parse(&format!("{}{}", base_url, REFRESH_PATH))
                .context("Invalid API base URL")?;
            cookies.add_cookie_str(&format!("{}={}; HttpOnly", name, value), &url);
            debug!("Restored refresh cookie");
        }

        let auth_http = Client::builder()
            .timeout(timeout)
            .cookie_provider(Arc::clone(&cookies))
            .build()
            .context("Failed to build auth HTTP client")?;

        let fallback: Arc<dyn FallbackStore> = match self.fallback {
            Some(fallback) => fallback,
            None => match self.config.fallback {
                FallbackKind::Memory => Arc::new(MemoryFallback::default()),
                FallbackKind::File => Arc::new(FileFallback::new(self.config.cache_dir()?)),
                FallbackKind::Keyring => Arc::new(KeyringFallback::new(APP_NAME)),
            },
        };
        let tokens = Arc::new(TokenStore::new(fallback));

        let interceptors = self
            .interceptors
            .into_iter()
            .fold(InterceptorChain::standard(), InterceptorChain::with);

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                direct: DirectTransport::new(http.clone(), base_url.clone(), Arc::clone(&tokens)),
                probe: ConnectivityProbe::new(http.clone(), &base_url),
                http,
                auth_http,
                cookies,
                cookie_file,
                refresh_cookie: self.config.refresh_cookie_name,
                base_url,
                tokens,
                interceptors,
                refresh: RefreshCoordinator::new(),
                notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                on_session_end: self.on_session_end,
                identity: Mutex::new(None),
            }),
        })
    }
}

/// Authenticated API client.
/// Clone is cheap - all state lives behind one shared `Arc`.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    /// Carries the refresh cookie; used for login, refresh and logout only
    auth_http: Client,
    cookies: Arc<Jar>,
    cookie_file: Option<RefreshCookieFile>,
    refresh_cookie: String,
    base_url: String,
    tokens: Arc<TokenStore>,
    interceptors: InterceptorChain,
    refresh: RefreshCoordinator<Response>,
    notifier: Arc<dyn Notifier>,
    on_session_end: Option<SessionEndHook>,
    identity: Mutex<Option<UserIdentity>>,
    direct: DirectTransport,
    probe: ConnectivityProbe,
}

impl ApiClient {
    pub fn builder(config: Config) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            fallback: None,
            interceptors: Vec::new(),
            notifier: None,
            on_session_end: None,
            cookies: None,
            cookie_file: None,
        }
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.inner.tokens
    }

    pub fn direct(&self) -> &DirectTransport {
        &self.inner.direct
    }

    pub fn probe(&self) -> &ConnectivityProbe {
        &self.inner.probe
    }

    pub fn refresh_phase(&self) -> RefreshPhase {
        self.inner.refresh.phase()
    }

    /// Current session view
    pub fn session(&self) -> AuthSession {
        AuthSession {
            authenticated: self.inner.tokens.snapshot().is_some(),
            user: self.inner.identity(),
        }
    }

    // ===== Session lifecycle =====

    /// Sign in and start a session.
    ///
    /// The response sets the refresh cookie, which lands in the auth client's
    /// jar; the access token goes to the token store.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ApiError> {
        let result = self.inner.login(email, password).await;
        match result {
            Ok(()) => {
                info!("Signed in");
                Ok(self.session())
            }
            Err(e) => {
                self.inner.notifier.notify(&e);
                Err(e)
            }
        }
    }

    /// End the session on the server (best effort) and locally.
    pub async fn logout(&self) {
        let url = self.inner.url(LOGOUT_PATH);
        let mut request = self.inner.auth_http.post(&url);
        if let Some(credential) = self.inner.tokens.get().await {
            request = request.bearer_auth(credential.as_str());
        }
        match request.send().await {
            Ok(response) if !response.status().is_success() => {
                debug!(status = %response.status(), "Logout endpoint returned an error")
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Logout request failed"),
        }

        self.inner.tokens.clear().await;
        self.inner.forget_refresh_cookie().await;
        self.inner.set_identity(None);
        self.inner.fire_session_end();
        info!("Signed out");
    }

    /// Startup: resume a persisted session and confirm it with the server.
    ///
    /// The check goes through the direct transport so a stale token never
    /// triggers a refresh before the session is established. A rejected
    /// token is dropped; a network failure keeps it for later.
    pub async fn resume(&self) -> AuthSession {
        if self.inner.tokens.get().await.is_none() {
            debug!("No stored session to resume");
            return AuthSession::anonymous();
        }

        match self.inner.direct.get_json::<UserIdentity>(WHOAMI_PATH).await {
            Ok(user) => {
                info!(user = %user.display_name(), "Session resumed");
                self.inner.set_identity(Some(user));
            }
            Err(TransportError::Status { status, .. })
                if status == reqwest::StatusCode::UNAUTHORIZED =>
            {
                info!("Stored access token rejected, clearing it");
                self.inner.tokens.clear().await;
                self.inner.set_identity(None);
            }
            Err(e) => warn!(error = %e, "Could not confirm stored session"),
        }
        self.session()
    }

    // ===== Requests =====

    /// Send an ordinary request through the interceptor chain, refreshing
    /// the access token once if it has expired.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<Response, ApiError> {
        let result = self.execute_with_refresh(request).await;
        if let Err(ref e) = result {
            if e.should_notify() {
                self.inner.notifier.notify(e);
            }
        }
        result
    }

    async fn execute_with_refresh(
        &self,
        mut request: RequestDescriptor,
    ) -> Result<Response, ApiError> {
        let (sent, result) = self.inner.attempt_with_credential(&request).await;
        match result {
            Err(ApiError::AuthExpired) => {}
            other => return other,
        }

        // The 401 answers a token that a finished refresh already replaced
        if self.inner.refresh.phase() == RefreshPhase::Idle {
            if let Some(current) = self.inner.tokens.snapshot() {
                if sent.as_ref() != Some(&current) {
                    debug!(path = %request.path, "Token replaced while in flight, reissuing");
                    request.retried = true;
                    return self.inner.attempt(&request).await;
                }
            }
        }

        debug!(path = %request.path, "Access token expired");
        let ticket = self.inner.refresh.join(request);
        if ticket.starts_refresh() {
            // Runs detached so queued callers are served even if this
            // caller gives up
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_refresh_cycle().await });
        }
        ticket.wait().await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(RequestDescriptor::get(path)).await?;
        self.decode(response).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = RequestDescriptor::post(path).with_json(body)?;
        let response = self.execute(request).await?;
        self.decode(response).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = RequestDescriptor::put(path).with_json(body)?;
        let response = self.execute(request).await?;
        self.decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(RequestDescriptor::delete(path)).await?;
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        match response.json().await {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = ApiError::InvalidResponse(format!("{}: {}", url, e));
                self.inner.notifier.notify(&err);
                Err(err)
            }
        }
    }
}

impl ClientInner {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn identity(&self) -> Option<UserIdentity> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_identity(&self, user: Option<UserIdentity>) {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = user;
    }

    fn fire_session_end(&self) {
        if let Some(ref hook) = self.on_session_end {
            hook();
        }
    }

    async fn attempt(&self, request: &RequestDescriptor) -> Result<Response, ApiError> {
        self.attempt_with_credential(request).await.1
    }

    /// One pass through the pipeline with a fresh token snapshot. Hands back
    /// the credential that was sent with the outcome.
    async fn attempt_with_credential(
        &self,
        request: &RequestDescriptor,
    ) -> (Option<AccessCredential>, Result<Response, ApiError>) {
        let credential = self.tokens.get().await;
        let result = self.send(request, credential.as_ref()).await;
        (credential, result)
    }

    async fn send(
        &self,
        request: &RequestDescriptor,
        credential: Option<&AccessCredential>,
    ) -> Result<Response, ApiError> {
        let mut http_request = request.build(&self.http, &self.base_url)?;
        self.interceptors.apply(&mut http_request, credential)?;

        let response = self
            .http
            .execute(http_request)
            .await
            .map_err(ApiError::from_transport)?;

        match classify(response).await {
            Err(ApiError::AuthExpired) if request.retried => {
                warn!(path = %request.path, "Rejected again after token refresh");
                self.end_session_after_rejection().await;
                Err(ApiError::AuthInvalid(AuthFailure::RetryRejected))
            }
            other => other,
        }
    }

    async fn replay(&self, request: RequestDescriptor) -> Result<Response, ApiError> {
        self.attempt(&request).await
    }

    /// Terminal 401 on a replay. Only the first of a burst still finds a
    /// token to clear, so teardown runs once.
    async fn end_session_after_rejection(&self) {
        if self.tokens.clear().await {
            self.forget_refresh_cookie().await;
            self.set_identity(None);
            self.fire_session_end();
        }
    }

    /// Run one refresh exchange and resolve everything queued behind it.
    async fn run_refresh_cycle(&self) {
        match self.exchange_refresh().await {
            Ok(refreshed) => {
                self.tokens.set(&refreshed.access_token).await;
                self.persist_refresh_cookie().await;
                if let Some(user) = refreshed.user {
                    self.set_identity(Some(user));
                }
                let queue = self.refresh.finish();
                info!(queued = queue.len(), "Access token refreshed, replaying requests");
                queue.replay_in_order(move |request| self.replay(request)).await;
            }
            Err(failure) => {
                let queue = self.refresh.finish();
                warn!(%failure, queued = queue.len(), "Token refresh failed, ending session");
                self.tokens.clear().await;
                self.forget_refresh_cookie().await;
                self.set_identity(None);
                self.fire_session_end();
                queue.reject_all(failure);
            }
        }
    }

    async fn exchange_refresh(&self) -> Result<RefreshResponse, AuthFailure> {
        let url = self.url(REFRESH_PATH);
        if !self.has_refresh_cookie(&url) {
            return Err(AuthFailure::MissingRefreshCredential);
        }

        let response = self.auth_http.post(&url).send().await.map_err(|e| {
            warn!(error = %e, "Refresh request failed");
            AuthFailure::RefreshUnavailable
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Refresh endpoint rejected the request");
            return Err(AuthFailure::RefreshRejected);
        }

        let refreshed: RefreshResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse refresh response");
            AuthFailure::RefreshRejected
        })?;
        if refreshed.access_token.trim().is_empty() {
            warn!("Refresh response carried an empty access token");
            return Err(AuthFailure::RefreshRejected);
        }
        Ok(refreshed)
    }

    fn has_refresh_cookie(&self, url: &str) -> bool {
        self.refresh_cookie_value(url).is_some()
    }

    fn refresh_cookie_value(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let header = self.cookies.cookies(&url)?;
        header
            .to_str()
            .ok()?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.refresh_cookie && !value.is_empty())
            .map(|(_, value)| value.to_string())
    }

    /// Copy the jar's refresh cookie to disk after login or refresh, which
    /// may both rotate it.
    async fn persist_refresh_cookie(&self) {
        let Some(ref file) = self.cookie_file else {
            return;
        };
        let Some(value) = self.refresh_cookie_value(&self.url(REFRESH_PATH)) else {
            return;
        };
        if let Err(e) = file.save(&self.refresh_cookie, &value).await {
            warn!(error = %e, "Failed to persist refresh cookie");
        }
    }

    async fn forget_refresh_cookie(&self) {
        if let Some(ref file) = self.cookie_file {
            if let Err(e) = file.remove().await {
                warn!(error = %e, "Failed to remove persisted refresh cookie");
            }
        }
    }

    async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let response = self
            .auth_http
            .post(self.url(LOGIN_PATH))
            .json(&LoginRequest { email, password })
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let response = match classify(response).await {
            Err(ApiError::AuthExpired) => {
                return Err(ApiError::AuthInvalid(AuthFailure::LoginRejected))
            }
            other => other?,
        };

        let login: LoginResponse = response.json().await.map_err(ApiError::from_transport)?;
        if login.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "login response carried an empty access token".to_string(),
            ));
        }
        self.tokens.set(&login.access_token).await;
        self.persist_refresh_cookie().await;
        self.set_identity(Some(login.user));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_cookie(cookie: Option<&str>) -> ApiClient {
        let config = Config {
            api_base_url: "https://api.example.com/".to_string(),
            fallback: FallbackKind::Memory,
            ..Config::default()
        };
        let jar = Arc::new(Jar::default());
        if let Some(cookie) = cookie {
            let url = Url::parse("https://api.example.com/auth").unwrap();
            jar.add_cookie_str(cookie, &url);
        }
        ApiClient::builder(config).cookie_jar(jar).build().unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = client_with_cookie(None);
        assert_eq!(client.inner.url(REFRESH_PATH), "https://api.example.com/auth/refresh");
    }

    #[test]
    fn test_refresh_cookie_detection() {
        let client = client_with_cookie(Some("refresh_token=R1; Path=/auth"));
        assert!(client.inner.has_refresh_cookie(&client.inner.url(REFRESH_PATH)));

        let client = client_with_cookie(Some("other=value; Path=/"));
        assert!(!client.inner.has_refresh_cookie(&client.inner.url(REFRESH_PATH)));

        let client = client_with_cookie(None);
        assert!(!client.inner.has_refresh_cookie(&client.inner.url(REFRESH_PATH)));
    }

    #[test]
    fn test_new_client_is_idle_and_signed_out() {
        let client = client_with_cookie(None);
        assert_eq!(client.refresh_phase(), RefreshPhase::Idle);
        assert_eq!(client.session(), AuthSession::anonymous());
    }

    #[test]
    fn test_parse_refresh_response() {
        let refreshed: RefreshResponse = serde_json::from_str(r#"{"accessToken":"T2"}"#).unwrap();
        assert_eq!(refreshed.access_token, "T2");
        assert!(refreshed.user.is_none());

        let login: LoginResponse = serde_json::from_str(
            r#"{"accessToken":"T1","user":{"id":"u-1","email":"pat@example.com"}}"#,
        )
        .unwrap();
        assert_eq!(login.user.email, "pat@example.com");
    }
}
