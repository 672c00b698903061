//! Authenticated request gateway
//!
//! [`Gateway`] is the only path from the application to the blog API. For
//! each request it classifies the endpoint, makes sure a fresh credential is
//! held (refreshing it first when it has expired), attaches the bearer and
//! anti-forgery headers, and on a 401 refreshes once and resends once.
//!
//! Concurrent callers that find the credential stale share one refresh: the
//! first spawns it on the runtime and publishes it in the pending slot, the
//! rest await the same shared future. The refresh task always runs to
//! completion even if every caller goes away.

pub mod csrf;
pub mod navigation;
pub mod policy;
pub mod request;

mod refresh;
mod session;

pub use csrf::{CookieCsrfSource, CsrfTokenSource, StaticCsrfToken};
pub use navigation::{Navigator, TracingNavigator};
pub use policy::{AuthPolicy, EndpointTable};
pub use request::{ApiRequest, ApiResponse, RequestOptions};

use crate::error::{GatewayError, Result};
use arc_swap::ArcSwapOption;
use blogx_core::{Credential, GatewayConfig, MemoryStorage, SessionStorage};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

type PendingRefresh = Shared<BoxFuture<'static, Result<Arc<Credential>>>>;

/// Authenticated API gateway. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    base_url: Url,
    config: GatewayConfig,
    endpoints: EndpointTable,
    storage: Arc<dyn SessionStorage>,
    csrf: Arc<dyn CsrfTokenSource>,
    navigator: Arc<dyn Navigator>,
    credential: ArcSwapOption<Credential>,
    pending: Mutex<Option<PendingRefresh>>,
    /// Serializes credential changes with their storage writes
    session_lock: AsyncMutex<()>,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl Gateway {
    /// Gateway with default configuration against `base_url`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the URL is invalid
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Local presence check; does not validate the token
    pub fn is_logged_in(&self) -> bool {
        self.inner.credential.load().is_some()
    }

    /// Snapshot of the held credential
    pub fn current_credential(&self) -> Option<Arc<Credential>> {
        self.inner.credential.load_full()
    }

    /// Issue a request.
    ///
    /// `options.requires_auth` overrides the endpoint table.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]; every failure path is classified.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let mut request = ApiRequest::new(method, path).with_options(options);
        if let Some(body) = body {
            request = request.json(body)?;
        }
        self.send(request).await
    }

    /// Issue a prepared request
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]
    #[tracing::instrument(
        name = "gateway.send",
        skip_all,
        fields(method = %request.method(), path = %request.path())
    )]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let policy = request.auth().unwrap_or_else(|| {
            self.inner
                .endpoints
                .classify(request.method(), request.path())
        });
        debug!(?policy, "Dispatching request");
        self.inner.url_for(request.path())?;

        let credential = match policy {
            AuthPolicy::Public => None,
            AuthPolicy::Always => Some(self.ensure_fresh().await?),
            AuthPolicy::Conditional => match self.ensure_fresh().await {
                Ok(credential) => Some(credential),
                Err(GatewayError::Unauthenticated) => None,
                Err(err) => return Err(err),
            },
        };
        let Some(credential) = credential else {
            return self
                .inner
                .dispatch(&request, None)
                .await?
                .error_for_status();
        };

        let response = self.inner.dispatch(&request, Some(&*credential)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return response.error_for_status();
        }

        debug!("Access token rejected, refreshing before retry");
        let Ok(refreshed) = self.inner.refresh(Some(credential.access_token.as_str())).await else {
            return Err(GatewayError::SessionExpired);
        };

        let retried = self.inner.dispatch(&request, Some(&*refreshed)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            self.inner
                .end_session(&refreshed, "credential rejected after refresh")
                .await;
            return Err(GatewayError::SessionExpired);
        }
        retried.error_for_status()
    }

    /// GET and deserialize
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// POST a JSON body and deserialize the reply
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    /// PUT a JSON body and deserialize the reply
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await?.json()
    }

    /// PATCH a JSON body and deserialize the reply
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::patch(path).json(body)?).await?.json()
    }

    /// DELETE; the response is returned as-is since it is usually empty
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]
    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    async fn ensure_fresh(&self) -> Result<Arc<Credential>> {
        let Some(credential) = self.inner.credential.load_full() else {
            return Err(GatewayError::Unauthenticated);
        };

        let now = Utc::now();
        if self.inner.idle_expired(now) {
            self.inner.end_session(&credential, "idle timeout").await;
            return Err(GatewayError::SessionExpired);
        }
        self.inner.touch(now);

        if credential.is_fresh(now, self.inner.config.refresh_skew()) {
            return Ok(credential);
        }

        debug!(expiry = %credential.access_expiry, "Access token expired, refreshing");
        self.inner.refresh(Some(credential.access_token.as_str())).await
    }
}

impl Inner {
    /// Resolve `path` against the base URL; the result never leaves the base origin
    fn url_for(&self, path: &str) -> Result<Url> {
        if Url::parse(path).is_ok() {
            return Err(GatewayError::InvalidRequest(format!(
                "absolute URL {path:?} given where a path is expected"
            )));
        }
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| GatewayError::InvalidRequest(format!("invalid path {path:?}: {err}")))?;
        if url.origin() != self.base_url.origin() {
            return Err(GatewayError::InvalidRequest(format!(
                "path {path:?} resolves outside {}",
                self.base_url
            )));
        }
        Ok(url)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse> {
        let url = self.url_for(request.path())?;
        let mut builder = self.http.request(request.method().clone(), url);

        if let Some(credential) = credential {
            builder = builder.bearer_auth(&credential.access_token);
        }

        if policy::is_mutating(request.method()) {
            if let Some(token) = self.csrf.csrf_token() {
                builder = builder.header(self.config.csrf.header_name.as_str(), token);
            }
        }

        if let Some(body) = request.body() {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await?;
        trace!(status = %response.status(), "Response received");
        ApiResponse::read(response).await
    }

    fn idle_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.config.session_idle_timeout() else {
            return false;
        };
        let last = *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last.is_some_and(|last| now - last > timeout)
    }

    fn touch(&self, now: DateTime<Utc>) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    fn reset_activity(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Builder for [`Gateway`]
#[derive(Default)]
pub struct GatewayBuilder {
    config: Option<GatewayConfig>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    endpoints: Option<EndpointTable>,
    storage: Option<Arc<dyn SessionStorage>>,
    csrf: Option<Arc<dyn CsrfTokenSource>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl GatewayBuilder {
    /// Start from a loaded configuration
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the base URL, overriding the configuration
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout, overriding the configuration
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Endpoint classification; defaults to [`EndpointTable::blog_defaults`]
    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointTable) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Credential storage; defaults to [`MemoryStorage`]
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Anti-forgery source; defaults to the `csrf.cookie_name` cookie in the gateway's jar
    #[must_use]
    pub fn csrf_source(mut self, csrf: Arc<dyn CsrfTokenSource>) -> Self {
        self.csrf = Some(csrf);
        self
    }

    /// Navigation facility; defaults to [`TracingNavigator`]
    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Build the gateway
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL is invalid or the HTTP client cannot be built
    pub fn build(self) -> Result<Gateway> {
        let mut config = self.config.unwrap_or_default();
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }

        // Paths are joined relative to the base, which therefore needs a trailing slash
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|err| {
            GatewayError::Configuration(format!("invalid base_url {:?}: {err}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Configuration(format!(
                "base_url {:?} cannot be a base",
                config.base_url
            )));
        }

        let jar = Arc::new(Jar::default());
        let http = ClientBuilder::new()
            .cookie_provider(jar.clone())
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| GatewayError::Configuration(err.to_string()))?;

        let csrf = self.csrf.unwrap_or_else(|| {
            Arc::new(CookieCsrfSource::new(
                jar,
                base_url.clone(),
                config.csrf.cookie_name.clone(),
            ))
        });

        Ok(Gateway {
            inner: Arc::new(Inner {
                http,
                base_url,
                endpoints: self.endpoints.unwrap_or_else(EndpointTable::blog_defaults),
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                csrf,
                navigator: self.navigator.unwrap_or_else(|| Arc::new(TracingNavigator)),
                credential: ArcSwapOption::empty(),
                pending: Mutex::new(None),
                session_lock: AsyncMutex::new(()),
                last_activity: Mutex::new(None),
                config,
            }),
        })
    }
}
