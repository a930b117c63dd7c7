use crate::auth::{AuthConfig, PipelineError, RefreshCoordinator, RefreshState};
use crate::config::ServiceConfig;
use crate::error::{ConfigError, ErrorTransform, RequestError, default_error_transform};
use crate::transport::{
    HyperTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use servios_http::{HttpClientBuilder, HttpClientConfig, MockRegistry};
use std::fmt;
use std::sync::Arc;

/// The four verbs a service client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// POST and PUT carry a body; GET and DELETE only query and headers.
    #[must_use]
    pub fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Method::from(*self).as_str())
    }
}

/// Per-call parameters for [`ServiceClient::execute`].
///
/// Serialization failures are deferred: the call fails with an
/// "Invalid request" [`RequestError`] instead of the builder panicking.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    mock: Option<Value>,
    mock_status: Option<StatusCode>,
    force_mock: bool,
    invalid: Option<String>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append query parameters encoded from a flat serializable value.
    #[must_use]
    pub fn query<T: Serialize + ?Sized>(mut self, params: &T) -> Self {
        let pairs = match serde_urlencoded::to_string(params) {
            Ok(encoded) => serde_urlencoded::from_str::<Vec<(String, String)>>(&encoded)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match pairs {
            Ok(pairs) => self.query.extend(pairs),
            Err(e) => self.defer_error(format!("query: {e}")),
        }
        self
    }

    /// JSON body for POST and PUT.
    #[must_use]
    pub fn body<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = Some(value),
            Err(e) => self.defer_error(format!("body: {e}")),
        }
        self
    }

    /// Add a header for this call, replacing a configured default of the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Data answered instead of a network call while mocking is active.
    #[must_use]
    pub fn mock<T: Serialize + ?Sized>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.mock = Some(value),
            Err(e) => self.defer_error(format!("mock data: {e}")),
        }
        self
    }

    /// Status of the mocked reply (default: 200).
    #[must_use]
    pub fn mock_status(mut self, status: u16) -> Self {
        match StatusCode::from_u16(status) {
            Ok(status) => self.mock_status = Some(status),
            Err(_) => self.defer_error(format!("mock status {status} is out of range")),
        }
        self
    }

    /// Mock this call even when the client is not in mock mode.
    #[must_use]
    pub fn force_mock(mut self) -> Self {
        self.force_mock = true;
        self
    }

    fn defer_error(&mut self, reason: String) {
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }
}

struct ClientInner {
    config: ServiceConfig,
    base_url: String,
    default_headers: HeaderMap,
    coordinator: Arc<RefreshCoordinator>,
    error_transform: ErrorTransform,
}

/// Issues requests against one service, handling authentication, mock
/// replies and error normalization.
///
/// Cloning is cheap; clones share the token refresh state.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.inner.base_url)
            .field("use_mock", &self.inner.config.use_mock)
            .field("refresh_state", &self.inner.coordinator.state())
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    #[must_use]
    pub fn builder(config: ServiceConfig) -> ServiceClientBuilder {
        ServiceClientBuilder::new(config)
    }

    /// Client with no authentication over the default hyper transport.
    ///
    /// # Errors
    /// See [`ServiceClientBuilder::build`].
    pub fn new(config: ServiceConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// The transport requests are sent through.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        self.inner.coordinator.transport()
    }

    /// One-shot mock replies, when the transport supports them.
    #[must_use]
    pub fn mocks(&self) -> Option<&MockRegistry> {
        self.transport().mocks()
    }

    #[must_use]
    pub fn refresh_state(&self) -> RefreshState {
        self.inner.coordinator.state()
    }

    /// Absolute URL for `endpoint`: `http(s)://` endpoints are kept, anything
    /// else is joined to the base URL with a single `/`.
    #[must_use]
    pub fn resolve_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_owned();
        }
        let path = endpoint.trim_start_matches('/');
        if path.is_empty() {
            return self.inner.base_url.clone();
        }
        format!("{}/{path}", self.inner.base_url)
    }

    /// Issue one request and decode the JSON answer into `T`.
    ///
    /// An empty response body decodes as `null`, so `()` and `Option<_>`
    /// work for endpoints that answer without content.
    ///
    /// # Errors
    /// Every failure is a [`RequestError`]: transport failures after the
    /// error transform, refresh failures as produced by the refresher,
    /// invalid options and undecodable bodies.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let RequestOptions {
            query,
            body,
            headers,
            mock,
            mock_status,
            force_mock,
            invalid,
        } = options;
        if let Some(reason) = invalid {
            return Err(RequestError::invalid_request(reason));
        }

        let url = self.resolve_url(endpoint);
        let headers = self.request_headers(&headers)?;
        let body = if method.has_body() {
            Some(body.unwrap_or_else(|| json!({})))
        } else {
            None
        };

        if (self.inner.config.use_mock || force_mock)
            && let Some(data) = &mock
        {
            self.register_mock(method, &url, mock_status.unwrap_or(StatusCode::OK), data);
        }

        tracing::debug!(method = %method, url = %url, "sending service request");
        let request = TransportRequest {
            method: method.into(),
            url,
            headers,
            query,
            body,
        };

        match self.inner.coordinator.dispatch(request).await {
            Ok(response) => decode(&response),
            Err(PipelineError::Transport(err)) => Err((self.inner.error_transform)(&err)),
            Err(PipelineError::Refresh(err)) => Err(err),
        }
    }

    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        self.execute(HttpMethod::Get, endpoint, options).await
    }

    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        self.execute(HttpMethod::Post, endpoint, options).await
    }

    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn put<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        self.execute(HttpMethod::Put, endpoint, options).await
    }

    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        self.execute(HttpMethod::Delete, endpoint, options).await
    }

    fn request_headers(&self, extra: &[(String, String)]) -> Result<HeaderMap, RequestError> {
        let mut headers = self.inner.default_headers.clone();
        for (name, value) in extra {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| RequestError::invalid_request(format!("header '{name}': {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| RequestError::invalid_request(format!("header '{name}': {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn register_mock(&self, method: HttpMethod, url: &str, status: StatusCode, data: &Value) {
        let Some(mocks) = self.mocks() else {
            tracing::warn!(method = %method, url = %url, "transport does not support mock replies; sending request");
            return;
        };
        if let Err(err) = mocks.reply_once(method.into(), url, status, data) {
            tracing::warn!(method = %method, url = %url, error = %err, "failed to register mock reply");
        }
    }
}

fn decode<T: DeserializeOwned>(response: &TransportResponse) -> Result<T, RequestError> {
    let body = response.body.trim_ascii();
    let decoded = if body.is_empty() {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(body)
    };
    decoded.map_err(|e| RequestError::decode(response.status, &e))
}

type ConfigureHttp = Box<dyn FnOnce(HttpClientBuilder) -> HttpClientBuilder + Send>;

/// Builder for [`ServiceClient`].
pub struct ServiceClientBuilder {
    config: ServiceConfig,
    auth: AuthConfig,
    transport: Option<Arc<dyn Transport>>,
    http_config: Option<HttpClientConfig>,
    configure_http: Option<ConfigureHttp>,
    error_transform: Option<ErrorTransform>,
}

impl fmt::Debug for ServiceClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClientBuilder")
            .field("config", &self.config)
            .field("auth", &self.auth)
            .field("custom_transport", &self.transport.is_some())
            .field("http_config", &self.http_config)
            .field("custom_error_transform", &self.error_transform.is_some())
            .finish_non_exhaustive()
    }
}

impl ServiceClientBuilder {
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            auth: AuthConfig::default(),
            transport: None,
            http_config: None,
            configure_http: None,
            error_transform: None,
        }
    }

    #[must_use]
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Send through `transport` instead of the built-in hyper client.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Base settings of the built-in HTTP client. The service timeout and
    /// mock delay always come from [`ServiceConfig`].
    #[must_use]
    pub fn http_config(mut self, config: HttpClientConfig) -> Self {
        self.http_config = Some(config);
        self
    }

    /// Customize the built-in HTTP client, e.g. to install a tower layer
    /// that observes every request and response.
    #[must_use]
    pub fn configure_http(
        mut self,
        configure: impl FnOnce(HttpClientBuilder) -> HttpClientBuilder + Send + 'static,
    ) -> Self {
        self.configure_http = Some(Box::new(configure));
        self
    }

    #[must_use]
    pub fn error_transform(
        mut self,
        transform: impl Fn(&TransportError) -> RequestError + Send + Sync + 'static,
    ) -> Self {
        self.error_transform = Some(Arc::new(transform));
        self
    }

    /// # Errors
    /// Any [`ServiceConfig::validate`] failure, or
    /// [`ConfigError::Transport`] when the HTTP client cannot be built.
    pub fn build(self) -> Result<ServiceClient, ConfigError> {
        let Self {
            config,
            auth,
            transport,
            http_config,
            configure_http,
            error_transform,
        } = self;

        config.parsed_base_url()?;
        let default_headers = config.header_map()?;
        let retry_on_status = config.retry_statuses()?;

        let transport = match transport {
            Some(transport) => transport,
            None => {
                let mut builder = HttpClientBuilder::with_config(http_config.unwrap_or_default())
                    .timeout(config.timeout)
                    .with_mocks(config.mock_delay);
                if let Some(configure) = configure_http {
                    builder = configure(builder);
                }
                Arc::new(HyperTransport::new(builder.build()?))
            }
        };

        let base_url = config.base_url.trim().trim_end_matches('/').to_owned();
        tracing::debug!(base_url = %base_url, use_mock = config.use_mock, "service client built");

        Ok(ServiceClient {
            inner: Arc::new(ClientInner {
                base_url,
                default_headers,
                coordinator: Arc::new(RefreshCoordinator::new(transport, auth, retry_on_status)),
                error_transform: error_transform
                    .unwrap_or_else(|| Arc::new(default_error_transform)),
                config,
            }),
        })
    }
}
