//! Request and response values passed through the gateway

use super::policy::AuthPolicy;
use crate::error::{GatewayError, Result};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Per-call options
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Overrides the endpoint table
    pub requires_auth: Option<AuthPolicy>,
}

impl RequestOptions {
    pub const fn with_auth(policy: AuthPolicy) -> Self {
        Self {
            requires_auth: Some(policy),
        }
    }
}

/// An outbound call. The body is serialized once so a retry resends identical bytes.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Bytes>,
    auth: Option<AuthPolicy>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            auth: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the body cannot be serialized
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|err| GatewayError::InvalidRequest(format!("unserializable body: {err}")))?;
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Override the endpoint table for this request
    #[must_use]
    pub fn with_auth(mut self, policy: AuthPolicy) -> Self {
        self.auth = Some(policy);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        if let Some(policy) = options.requires_auth {
            self.auth = Some(policy);
        }
        self
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub const fn auth(&self) -> Option<AuthPolicy> {
        self.auth
    }
}

/// A fully-read response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body; an empty body reads as JSON `null`
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the body does not match `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn a non-success status into `ApiError`
    pub(crate) fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(GatewayError::from_status(self.status, self.text()))
        }
    }
}
