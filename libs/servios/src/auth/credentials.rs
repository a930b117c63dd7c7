use crate::error::RequestError;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use http::StatusCode;
use servios_utils::SecretString;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Result of a successful refresh: a new access token and, optionally, a
/// rotated refresh token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

impl TokenPair {
    #[must_use]
    pub fn new(access_token: impl Into<SecretString>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<SecretString>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

/// Host-owned token storage. The client only reads and writes through it and
/// never caches a token between calls.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<SecretString>;
    fn set_access_token(&self, token: SecretString);
    fn refresh_token(&self) -> Option<SecretString>;
    fn set_refresh_token(&self, token: SecretString);
}

/// Lock-free [`TokenStore`] kept in process memory.
#[derive(Default)]
pub struct InMemoryTokenStore {
    access: ArcSwapOption<SecretString>,
    refresh: ArcSwapOption<SecretString>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tokens(tokens: TokenPair) -> Self {
        let store = Self::new();
        store.set_access_token(tokens.access_token);
        if let Some(refresh) = tokens.refresh_token {
            store.set_refresh_token(refresh);
        }
        store
    }
}

impl fmt::Debug for InMemoryTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTokenStore")
            .field("has_access_token", &self.access.load().is_some())
            .field("has_refresh_token", &self.refresh.load().is_some())
            .finish()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn access_token(&self) -> Option<SecretString> {
        self.access.load_full().map(|t| (*t).clone())
    }

    fn set_access_token(&self, token: SecretString) {
        self.access.store(Some(Arc::new(token)));
    }

    fn refresh_token(&self) -> Option<SecretString> {
        self.refresh.load_full().map(|t| (*t).clone())
    }

    fn set_refresh_token(&self, token: SecretString) {
        self.refresh.store(Some(Arc::new(token)));
    }
}

/// Exchanges the current credentials for a new [`TokenPair`].
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    /// Fails when the refresh token is invalid or expired; the error is
    /// delivered to every request waiting on this refresh.
    async fn refresh(&self) -> Result<TokenPair, RequestError>;
}

struct FnRefresher<F>(F);

#[async_trait]
impl<F, Fut> TokenRefresher for FnRefresher<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TokenPair, RequestError>> + Send + 'static,
{
    async fn refresh(&self) -> Result<TokenPair, RequestError> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`TokenRefresher`].
///
/// ```ignore
/// let refresher = refresher_fn(move || {
///     let auth = auth_api.clone();
///     async move { auth.exchange_refresh_token().await }
/// });
/// ```
pub fn refresher_fn<F, Fut>(f: F) -> impl TokenRefresher + 'static
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TokenPair, RequestError>> + Send + 'static,
{
    FnRefresher(f)
}

/// Notified once per failed refresh cycle. Fire-and-forget.
pub trait LogoutHandler: Send + Sync {
    fn on_logout(&self);
}

impl<F> LogoutHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_logout(&self) {
        self();
    }
}

/// Authentication capabilities injected into a service client.
///
/// Every part is optional: without a store no `Authorization` header is
/// attached, and without a refresher authentication failures are returned
/// to the caller unchanged.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub(super) store: Option<Arc<dyn TokenStore>>,
    pub(super) refresher: Option<Arc<dyn TokenRefresher>>,
    pub(super) logout: Option<Arc<dyn LogoutHandler>>,
    pub(super) retry_on_status: Option<Vec<StatusCode>>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("store", &self.store.is_some())
            .field("refresher", &self.refresher.is_some())
            .field("logout", &self.logout.is_some())
            .field("retry_on_status", &self.retry_on_status)
            .finish()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn token_store(mut self, store: impl TokenStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Share a store the host also holds on to.
    #[must_use]
    pub fn shared_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn refresher(mut self, refresher: impl TokenRefresher + 'static) -> Self {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    #[must_use]
    pub fn on_logout(mut self, handler: impl LogoutHandler + 'static) -> Self {
        self.logout = Some(Arc::new(handler));
        self
    }

    /// Override the client config's retryable statuses.
    #[must_use]
    pub fn retry_on_status(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.retry_on_status = Some(statuses.into_iter().collect());
        self
    }
}
