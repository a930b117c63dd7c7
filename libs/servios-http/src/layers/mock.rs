use crate::error::{HttpError, InvalidUriKind};
use crate::response::{ResponseBody, full_body};
use bytes::Bytes;
use http::uri::Authority;
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

/// Requests are matched on method plus `scheme://authority/path`.
/// Query strings and trailing slashes are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct MockKey {
    method: Method,
    target: String,
}

impl MockKey {
    fn from_uri(method: Method, uri: &Uri) -> Self {
        let scheme = uri.scheme_str().unwrap_or_default();
        let authority = uri.authority().map_or("", Authority::as_str);
        let path = uri.path().trim_end_matches('/');
        Self {
            method,
            target: format!("{scheme}://{authority}{path}"),
        }
    }
}

#[derive(Clone, Debug)]
struct MockReply {
    status: StatusCode,
    body: Bytes,
}

impl MockReply {
    fn into_response(self) -> Result<Response<ResponseBody>, HttpError> {
        let response = Response::builder()
            .status(self.status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(full_body(self.body))?;
        Ok(response)
    }
}

struct MockState {
    delay: Duration,
    replies: Mutex<HashMap<MockKey, VecDeque<MockReply>>>,
}

/// Shared table of one-shot canned responses.
///
/// Each [`reply_once`](Self::reply_once) call queues exactly one answer for a
/// `(method, url)` pair; the [`MockLayer`] consumes queued answers in FIFO
/// order and lets every other request through to the network. Clones share
/// the same table.
#[derive(Clone)]
pub struct MockRegistry {
    state: Arc<MockState>,
}

impl fmt::Debug for MockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRegistry")
            .field("delay", &self.state.delay)
            .field("pending", &self.pending())
            .finish()
    }
}

impl MockRegistry {
    /// Create an empty registry whose replies are delivered after `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            state: Arc::new(MockState {
                delay,
                replies: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Artificial latency applied before a mocked reply is returned.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.state.delay
    }

    /// Queue one canned JSON reply for `method url`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` when `url` is not absolute and
    /// `HttpError::Json` when `body` cannot be serialized.
    pub fn reply_once<T>(
        &self,
        method: Method,
        url: &str,
        status: StatusCode,
        body: &T,
    ) -> Result<(), HttpError>
    where
        T: Serialize + ?Sized,
    {
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;
        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "mocked URLs must be absolute".to_owned(),
            });
        }

        let reply = MockReply {
            status,
            body: Bytes::from(serde_json::to_vec(body)?),
        };
        let key = MockKey::from_uri(method, &uri);
        tracing::debug!(method = %key.method, url = %key.target, status = %status, "registered mock reply");
        self.state
            .replies
            .lock()
            .entry(key)
            .or_default()
            .push_back(reply);
        Ok(())
    }

    /// Number of queued replies not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.replies.lock().values().map(VecDeque::len).sum()
    }

    /// Drop every queued reply.
    pub fn clear(&self) {
        self.state.replies.lock().clear();
    }

    fn take(&self, key: &MockKey) -> Option<MockReply> {
        let mut replies = self.state.replies.lock();
        let queue = replies.get_mut(key)?;
        let reply = queue.pop_front();
        if queue.is_empty() {
            replies.remove(key);
        }
        reply
    }
}

/// Tower layer answering requests from a [`MockRegistry`].
#[derive(Clone, Debug)]
pub struct MockLayer {
    registry: MockRegistry,
}

impl MockLayer {
    #[must_use]
    pub fn new(registry: MockRegistry) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for MockLayer {
    type Service = MockService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MockService {
            inner,
            registry: self.registry.clone(),
        }
    }
}

/// Service created by [`MockLayer`].
#[derive(Clone, Debug)]
pub struct MockService<S> {
    inner: S,
    registry: MockRegistry,
}

impl<S> Service<Request<Full<Bytes>>> for MockService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let key = MockKey::from_uri(req.method().clone(), req.uri());
        if let Some(reply) = self.registry.take(&key) {
            let delay = self.registry.delay();
            tracing::debug!(
                method = %key.method,
                url = %key.target,
                status = %reply.status,
                "serving mocked response"
            );
            return Box::pin(async move {
                tokio::time::sleep(delay).await;
                reply.into_response()
            });
        }

        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
