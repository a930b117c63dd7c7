//! Tower layers composed by [`HttpClientBuilder`](crate::HttpClientBuilder).
//!
//! - [`DefaultHeadersLayer`] - fills in User-Agent and client-wide headers
//! - [`MockLayer`] - answers matching requests from a [`MockRegistry`]

mod default_headers;
mod mock;

pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use mock::{MockLayer, MockRegistry, MockService};
