//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with middleware-driven
//! exponential backoff retries. Bodies come back undecoded so the caller can
//! count their bytes before classifying the rows inside.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

use crate::errors::{ProviderError, Result};

/// Per-request timeout applied by the underlying client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An undecoded response, for callers that need the byte length of the body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub success: bool,
    pub body: String,
}

/// A flexible asynchronous HTTP client.
///
/// Handles base URLs, bearer authentication and transient-failure retries.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client rooted at `base_url` with a 3-retry exponential backoff.
    ///
    /// # Errors
    /// `ProviderError::Activation` if `base_url` is not an absolute URL or the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| ProviderError::Activation(format!("Invalid base URL '{}': {}", base_url, e)))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("lib_datafeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Activation(e.to_string()))?;

        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url: url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn build(&self, method: Method, path: &str) -> Result<reqwest_middleware::RequestBuilder> {
        // 1. Construct the full absolute URL
        let full_url = self
            .base_url
            .join(path)
            .map_err(|e| ProviderError::Http(format!("Invalid path '{}': {}", path, e)))?;
        let mut req = self.inner.request(method, full_url);

        // 2. Inject Bearer Authentication if a token is present
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(req)
    }

    /// GET `path` and return the body undecoded.
    pub async fn get_raw(&self, path: &str) -> Result<RawResponse> {
        let response = self
            .build(Method::GET, path)?
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| ProviderError::Http(e.to_string()))?;
        tracing::trace!(status = status.as_u16(), bytes = body.len(), path, "HTTP response received");

        Ok(RawResponse {
            status: status.as_u16(),
            success: status.is_success(),
            body,
        })
    }
}
