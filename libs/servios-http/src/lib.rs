#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for `servios` service clients
//!
//! A hyper-based client with:
//! - Automatic TLS via rustls (HTTPS only by default)
//! - Connection pooling
//! - Per-request timeouts
//! - Default headers (User-Agent plus client-wide extras)
//! - Query-string and JSON body helpers
//! - One-shot mocked replies for offline development
//! - Transparent response decompression (gzip, brotli, deflate)
//!
//! Body size limits apply to **decompressed** bytes.
//!
//! # Example
//!
//! ```ignore
//! use servios_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .default_header("x-tenant", "acme")
//!     .build()?;
//!
//! let user: User = client
//!     .get("https://api.example.com/users/42")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
pub mod layers;
mod request;
mod response;
mod tls;

pub use builder::{HttpClientBuilder, InnerService};
pub use client::HttpClient;
pub use config::{
    DEFAULT_MOCK_DELAY, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT, HttpClientConfig,
    TlsRootConfig, TransportSecurity,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{MockLayer, MockRegistry};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody, read_body_limited};

pub use http::{HeaderMap, Method, StatusCode};
