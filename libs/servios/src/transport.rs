//! The boundary between the request pipeline and the network.
//!
//! A [`Transport`] performs exactly one HTTP exchange. Any non-2xx answer is
//! reported as a [`TransportError`] carrying the status and the raw body, so
//! the pipeline above only has to look at one error shape.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use servios_http::{HttpClient, HttpError, MockRegistry};
use thiserror::Error;

/// One outgoing request, as seen by a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Absolute URL without the query string.
    pub url: String,
    pub headers: HeaderMap,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// JSON body; `None` sends no body at all.
    pub body: Option<Value>,
}

/// A successful (2xx) answer.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A failed exchange: either a non-2xx answer or no answer at all.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    /// `None` when no response was received.
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub message: String,
}

impl TransportError {
    /// A server answered with a non-2xx status.
    #[must_use]
    pub fn status(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status: Some(status),
            headers,
            body: Some(body),
            message: format!("Request failed with status code {}", status.as_u16()),
        }
    }

    /// The request never produced a response.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            body: None,
            message: message.into(),
        }
    }
}

impl From<HttpError> for TransportError {
    fn from(err: HttpError) -> Self {
        TransportError::network(err.to_string())
    }
}

/// Performs HTTP exchanges for a service client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// # Errors
    /// Returns [`TransportError`] for non-2xx statuses and for requests that
    /// produced no response.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// One-shot mock replies served by this transport, if it supports them.
    fn mocks(&self) -> Option<&MockRegistry> {
        None
    }
}

/// [`Transport`] backed by [`servios_http::HttpClient`].
#[derive(Clone, Debug)]
pub struct HyperTransport {
    client: HttpClient,
}

impl HyperTransport {
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// The underlying HTTP client.
    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let TransportRequest {
            method,
            url,
            headers,
            query,
            body,
        } = request;

        let mut builder = self.client.request(method.clone(), &url).headers(&headers);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = &body {
            builder = builder.json(body)?;
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                if err.is_connect_or_timeout() {
                    tracing::warn!(method = %method, url = %url, error = %err, "request produced no response");
                }
                return Err(err.into());
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        tracing::debug!(method = %method, url = %url, status = status.as_u16(), "response received");

        if !status.is_success() {
            return Err(TransportError::status(status, headers, body));
        }

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    fn mocks(&self) -> Option<&MockRegistry> {
        self.client.mocks()
    }
}
