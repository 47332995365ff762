//! HTTP seam for the hosted workspace API.

use std::fmt;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{BackendError, BackendFuture};

/// Media type the hosted workspace API expects.
pub const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP methods used against the hosted workspace API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiMethod {
    /// Partial update of the workspace resource.
    Patch,
    /// Deletion of the workspace resource.
    Delete,
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// One request to the hosted workspace API. The bearer token stays wrapped
/// until the header is rendered.
pub struct ApiRequest {
    /// HTTP method.
    pub method: ApiMethod,
    /// Absolute request URL.
    pub url: String,
    /// JSON body, when the request carries one.
    pub body: Option<Value>,
    token: SecretString,
}

impl ApiRequest {
    /// Builds a request authenticated with `token`.
    #[must_use]
    pub fn new(
        method: ApiMethod,
        url: impl Into<String>,
        token: &SecretString,
        body: Option<Value>,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            body,
            token: SecretString::from(token.expose_secret().to_owned()),
        }
    }

    /// Renders the `Authorization` header value.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    /// `Content-Type` header value.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        JSON_API_CONTENT_TYPE
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Status and body returned by the hosted workspace API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, verbatim.
    pub body: String,
}

impl ApiResponse {
    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Sends hosted workspace API requests.
pub trait WorkspaceTransport {
    /// Sends `request` and returns the response whatever its status.
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BackendFuture<'a, ApiResponse, BackendError>;
}

/// [`WorkspaceTransport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds an HTTPS client with a 30 second request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] when the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| BackendError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl WorkspaceTransport for ReqwestTransport {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BackendFuture<'a, ApiResponse, BackendError> {
        Box::pin(async move {
            let method = match request.method {
                ApiMethod::Patch => reqwest::Method::PATCH,
                ApiMethod::Delete => reqwest::Method::DELETE,
            };
            let mut builder = self
                .client
                .request(method, &request.url)
                .header(AUTHORIZATION, request.authorization_header())
                .header(CONTENT_TYPE, request.content_type());
            if let Some(body) = &request.body {
                builder = builder.body(body.to_string());
            }

            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(transport_error)?;
            Ok(ApiResponse { status, body })
        })
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    BackendError::Transport {
        message: err.to_string(),
    }
}
