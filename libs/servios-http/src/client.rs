use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::layers::MockRegistry;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use tower::Service;
use tower::buffer::Buffer;

/// Type alias for the future type of the inner service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Type alias for the buffered service
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// HTTP client over a tower middleware stack
///
/// The stack handles timeouts, response decompression, default headers
/// (including User-Agent) and, when configured, one-shot mocked replies.
/// Use [`HttpClientBuilder`] to construct instances.
///
/// `HttpClient` is `Clone + Send + Sync`. Cloning is cheap (internal channel
/// clone) and clones share the connection pool; no `Mutex` is needed.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
    pub(crate) mocks: Option<MockRegistry>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .field("mocks", &self.mocks)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    /// Create a builder for configuring the HTTP client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Create a request builder for an arbitrary method
    ///
    /// The URL must be absolute; relative URLs are rejected by `send()`
    /// with [`HttpError::InvalidUri`].
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_body_size,
            method,
            url.to_owned(),
            self.transport_security,
        )
    }

    /// Create a GET request builder
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a DELETE request builder
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Registry of one-shot mocked replies, if the client was built with one.
    #[must_use]
    pub fn mocks(&self) -> Option<&MockRegistry> {
        self.mocks.as_ref()
    }

    /// Maximum response body size enforced by body readers.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

/// Map buffer errors to `HttpError`
///
/// Buffer returns the inner service error boxed, or a closed-channel error if
/// the worker has shut down.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Try to acquire a buffer slot with fail-fast semantics.
///
/// If the buffer is full, returns `HttpError::Overloaded` immediately instead
/// of blocking.
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::HttpClientConfig;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn test_client() -> HttpClient {
        HttpClientBuilder::new().allow_insecure_http().build().unwrap()
    }

    #[tokio::test]
    async fn test_http_client_get() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET).path("/test");
            then.status(200).json_body(json!({"success": true}));
        });

        let client = test_client();
        let url = format!("{}/test", server.base_url());
        let resp = client.get(&url).send().await.unwrap();

        assert_eq!(resp.status(), http::StatusCode::OK);
        m.assert_calls(1);
    }

    #[tokio::test]
    async fn test_post_json_sets_content_type() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/users")
                .header("content-type", "application/json")
                .json_body(json!({"name": "Ann"}));
            then.status(201).json_body(json!({"id": 1, "name": "Ann"}));
        });

        let client = test_client();
        let url = format!("{}/users", server.base_url());
        let resp = client
            .post(&url)
            .json(&json!({"name": "Ann"}))
            .unwrap()
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), http::StatusCode::CREATED);
        m.assert_calls(1);
    }

    #[tokio::test]
    async fn test_content_type_not_overridden() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(PUT)
                .path("/doc")
                .header("content-type", "application/merge-patch+json");
            then.status(200);
        });

        let client = test_client();
        let url = format!("{}/doc", server.base_url());
        client
            .put(&url)
            .header("content-type", "application/merge-patch+json")
            .json(&json!({"a": 1}))
            .unwrap()
            .send()
            .await
            .unwrap();
        m.assert_calls(1);
    }

    #[tokio::test]
    async fn test_query_params_are_appended() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET)
                .path("/search")
                .query_param("q", "rust lang")
                .query_param("page", "2")
                .query_param("fixed", "1");
            then.status(200);
        });

        let client = test_client();
        let url = format!("{}/search?fixed=1", server.base_url());
        client
            .get(&url)
            .query(&[("q", "rust lang"), ("page", "2")])
            .send()
            .await
            .unwrap();
        m.assert_calls(1);
    }

    #[tokio::test]
    async fn test_json_body_parsing() {
        #[derive(serde::Deserialize)]
        struct TestResponse {
            name: String,
            value: i32,
        }

        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/json");
            then.status(200).json_body(json!({"name": "test", "value": 42}));
        });

        let client = test_client();
        let url = format!("{}/json", server.base_url());

        let data: TestResponse = client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(data.name, "test");
        assert_eq!(data.value, 42);
    }

    #[tokio::test]
    async fn test_body_size_limit() {
        let server = MockServer::start();
        let large_body = "x".repeat(64 * 1024);
        let _m = server.mock(|when, then| {
            when.method(GET).path("/large");
            then.status(200).body(&large_body);
        });

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .max_body_size(1024)
            .build()
            .unwrap();

        let url = format!("{}/large", server.base_url());
        let result = client.get(&url).send().await.unwrap().bytes().await;

        assert!(matches!(result, Err(HttpError::BodyTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_default_and_custom_headers() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET)
                .path("/test")
                .header("user-agent", "custom/1.0")
                .header("x-tenant", "acme")
                .header("x-request-id", "r-1");
            then.status(200);
        });

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .user_agent("custom/1.0")
            .default_header("x-tenant", "acme")
            .build()
            .unwrap();

        let url = format!("{}/test", server.base_url());
        let resp = client
            .get(&url)
            .header("x-request-id", "r-1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
        m.assert_calls(1);
    }

    #[tokio::test]
    async fn test_non_2xx_is_a_response_until_checked() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/error");
            then.status(404)
                .header("content-type", "application/json")
                .json_body(json!({"message": "not found"}));
        });

        let client = test_client();
        let url = format!("{}/error", server.base_url());
        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::NOT_FOUND);

        match resp.json::<serde_json::Value>().await {
            Err(HttpError::HttpStatus {
                status,
                body_preview,
                ..
            }) => {
                assert_eq!(status, http::StatusCode::NOT_FOUND);
                assert!(body_preview.contains("not found"));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mocked_reply_short_circuits_network() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET).path("/users/1");
            then.status(200).json_body(json!({"id": 1, "source": "network"}));
        });

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .with_mocks(Duration::ZERO)
            .build()
            .unwrap();
        let url = format!("{}/users/1", server.base_url());
        client
            .mocks()
            .unwrap()
            .reply_once(
                Method::GET,
                &url,
                http::StatusCode::OK,
                &json!({"id": 1, "source": "mock"}),
            )
            .unwrap();

        let first: serde_json::Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(first["source"], "mock");
        m.assert_calls(0);

        let second: serde_json::Value =
            client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(second["source"], "network");
        m.assert_calls(1);
    }

    #[tokio::test]
    async fn test_small_buffer_capacity_no_deadlock() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/test");
            then.status(200).body("ok");
        });

        let config = HttpClientConfig {
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 2,
            ..Default::default()
        };

        let client = HttpClientBuilder::with_config(config).build().unwrap();
        let url = format!("{}/test", server.base_url());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let client = client.clone();
                let url = url.clone();
                tokio::spawn(async move { client.get(&url).send().await })
            })
            .collect();

        let results = tokio::time::timeout(Duration::from_secs(10), async {
            let mut results = Vec::new();
            for handle in handles {
                results.push(handle.await);
            }
            results
        })
        .await
        .expect("requests should complete within timeout");

        let mut success_count = 0;
        let mut overloaded_count = 0;
        for result in results {
            match result.unwrap() {
                Ok(resp) => {
                    assert_eq!(resp.status(), http::StatusCode::OK);
                    success_count += 1;
                }
                Err(HttpError::Overloaded) => overloaded_count += 1,
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }

        assert!(success_count > 0, "at least one request should succeed");
        assert_eq!(success_count + overloaded_count, 10);
    }

    #[tokio::test]
    async fn test_url_scheme_http_rejected_with_tls_only() {
        let client = HttpClientBuilder::new().build().unwrap();
        let result = client.get("http://localhost:1/x").send().await;
        assert!(matches!(result, Err(HttpError::InvalidScheme { .. })));
    }

    #[tokio::test]
    async fn test_relative_url_rejected() {
        let client = test_client();
        let result = client.get("/users").send().await;
        assert!(matches!(
            result,
            Err(HttpError::InvalidUri {
                kind: crate::error::InvalidUriKind::MissingAuthority,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_header_deferred_to_send() {
        let client = test_client();
        let result = client
            .get("http://localhost:1/x")
            .header("bad header", "v")
            .send()
            .await;
        assert!(matches!(result, Err(HttpError::InvalidHeaderName(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = test_client();
        // Port 1 is reserved and nothing listens there in test environments.
        let err = client.get("http://127.0.0.1:1/x").send().await.unwrap_err();
        assert!(err.is_connect_or_timeout(), "got {err:?}");
    }

    #[test]
    fn test_map_buffer_error_passes_through_http_error() {
        let boxed: tower::BoxError = Box::new(HttpError::Timeout(Duration::from_secs(10)));
        assert!(matches!(map_buffer_error(boxed), HttpError::Timeout(_)));
    }

    #[test]
    fn test_map_buffer_error_returns_service_closed_for_unknown_error() {
        let other_err: tower::BoxError = Box::new(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "buffer worker died",
        ));
        assert!(matches!(map_buffer_error(other_err), HttpError::ServiceClosed));
    }

    #[test]
    fn test_http_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpClient>();
    }
}
