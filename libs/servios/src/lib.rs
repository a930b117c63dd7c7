#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Service clients for JSON HTTP APIs
//!
//! - [`ServiceClient`]: one configured service (base URL, timeout, default
//!   headers, mock mode) issuing GET/POST/PUT/DELETE requests
//! - transparent bearer authentication with a single shared token refresh
//!   when the server rejects the access token ([`auth`])
//! - [`ResourceClient`]: typed CRUD over one collection endpoint
//! - [`VisibilityRegistry`]: which methods of a service type a host may expose
//!
//! Every request failure is normalized into a [`RequestError`].
//!
//! # Example
//!
//! ```ignore
//! use servios::auth::{AuthConfig, InMemoryTokenStore, TokenPair, refresher_fn};
//! use servios::{ResourceClient, ServiceClient, ServiceConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryTokenStore::with_tokens(TokenPair::new(access)));
//! let client = ServiceClient::builder(ServiceConfig::load("service.yaml")?)
//!     .auth(
//!         AuthConfig::new()
//!             .shared_token_store(store.clone())
//!             .refresher(refresher_fn(move || {
//!                 let auth = auth_api.clone();
//!                 async move { auth.refresh().await }
//!             }))
//!             .on_logout(|| tracing::info!("session ended")),
//!     )
//!     .build()?;
//!
//! let users = ResourceClient::<User>::new(client, "users")?;
//! let user = users.get_by_id(42).await?;
//! ```

pub mod auth;
mod client;
mod config;
mod error;
mod resource;
mod transport;
mod visibility;

pub use client::{HttpMethod, RequestOptions, ServiceClient, ServiceClientBuilder};
pub use config::{ENV_PREFIX, ServiceConfig};
pub use error::{
    ConfigError, ErrorTransform, NETWORK_ERROR_MESSAGE, RequestError, default_error_transform,
};
pub use resource::ResourceClient;
pub use transport::{
    HyperTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
pub use visibility::{
    CONSTRUCTOR, ExposedService, TypeVisibility, TypeVisibilityBuilder, VisibilityRegistry,
};

pub use servios_http::{HttpClientConfig, MockRegistry};
pub use servios_utils::SecretString;
