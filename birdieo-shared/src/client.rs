//! Common HTTP plumbing shared by the backend API and stream clients.
//!
//! All requests go through [`HttpCore`] so error classification and status
//! handling stay identical across services.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for Birdieo service calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(String),
    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),
    /// Connection failed
    #[error("Connection error: {0}")]
    Connection(String),
    /// Request timed out
    #[error("Timeout")]
    Timeout,
    /// Server returned an error status
    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },
}

impl ClientError {
    /// True when the service could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Timeout)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() {
            ClientError::Connection(err.to_string())
        } else if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}

/// Credential passed explicitly into every authenticated call.
///
/// There is no ambient token store; whoever owns the session hands its
/// context to each collaborator.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    token: Option<String>,
}

impl AuthContext {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpCore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCore {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        // Remove trailing slash if present
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;
        Ok(Self { http, base_url })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: Response) -> Result<Response, ClientError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let url = response.url().to_string();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            debug!("{url} returned {status}: {message}");
            return Err(ClientError::ServerError { status, message });
        }
        Ok(response)
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        auth: &AuthContext,
    ) -> Result<T, ClientError> {
        debug!("GET {}{}", self.base_url, path);
        let request = auth.apply(self.http.get(self.url(path)));
        let response = Self::check(request.send().await?).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    pub(crate) async fn get_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), ClientError> {
        debug!("GET {url}");
        let response = Self::check(self.http.get(url).send().await?).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }

    pub(crate) async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
        auth: &AuthContext,
    ) -> Result<R, ClientError> {
        debug!("POST {}{}", self.base_url, path);
        let request = auth.apply(self.http.post(self.url(path)).json(body));
        let response = Self::check(request.send().await?).await?;

        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    pub(crate) async fn post_empty<R: DeserializeOwned>(
        &self,
        path: &str,
        auth: &AuthContext,
    ) -> Result<R, ClientError> {
        debug!("POST {}{}", self.base_url, path);
        let request = auth.apply(self.http.post(self.url(path)));
        let response = Self::check(request.send().await?).await?;

        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    pub(crate) async fn post_no_response<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        auth: &AuthContext,
    ) -> Result<(), ClientError> {
        debug!("POST {}{}", self.base_url, path);
        let request = auth.apply(self.http.post(self.url(path)).json(body));
        Self::check(request.send().await?).await?;
        Ok(())
    }
}
