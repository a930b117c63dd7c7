//! Single-flight access token refresh.
//!
//! Every request goes out with the current access token. When one comes back
//! with a retryable status it is parked as a [`PendingRequest`] and, if no
//! refresh is running, a refresh cycle is started on its own task:
//!
//! ```text
//!   Idle ──first auth failure──▶ Refreshing ──refresh settles──▶ Idle
//!                                   ▲    │
//!               later failures ─────┘    └─▶ replay (ok) / reject + logout (err)
//! ```
//!
//! All pending records of a cycle are drained exactly once, after the state
//! is back to `Idle`. Replays carry the new token explicitly and are never
//! parked again.
//!
//! A request sent with the old token whose rejection arrives after its
//! cycle already settled starts a new cycle. Only failures that overlap a
//! running refresh share it, so a refresher that answers instantly can run
//! once per concurrently rejected request.

use super::credentials::{AuthConfig, LogoutHandler, TokenPair, TokenRefresher, TokenStore};
use crate::error::RequestError;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use http::StatusCode;
use http::header::{AUTHORIZATION, HeaderValue};
use parking_lot::Mutex;
use servios_utils::SecretString;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::Instrument;

/// Why a dispatched request did not produce a response.
#[derive(Debug)]
pub enum PipelineError {
    /// The exchange failed, including a failed replay.
    Transport(TransportError),
    /// The refresh the request was waiting on failed.
    Refresh(RequestError),
}

type Reply = oneshot::Sender<Result<TransportResponse, PipelineError>>;

/// A request that failed authentication and waits for the running refresh.
struct PendingRequest {
    request: TransportRequest,
    reply: Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

struct Shared {
    state: RefreshState,
    pending: Vec<PendingRequest>,
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    logout: Option<Arc<dyn LogoutHandler>>,
    retry_on_status: Vec<StatusCode>,
    shared: Mutex<Shared>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: AuthConfig,
        default_retry_on_status: Vec<StatusCode>,
    ) -> Self {
        Self {
            transport,
            store: auth.store,
            refresher: auth.refresher,
            logout: auth.logout,
            retry_on_status: auth.retry_on_status.unwrap_or(default_retry_on_status),
            shared: Mutex::new(Shared {
                state: RefreshState::Idle,
                pending: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> RefreshState {
        self.shared.lock().state
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send `request`, transparently refreshing the token and replaying once
    /// on an authentication failure.
    ///
    /// # Errors
    /// The request's own failure, the failure of its single replay, or the
    /// error of the refresh it was waiting on.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: TransportRequest,
    ) -> Result<TransportResponse, PipelineError> {
        if self.refresher.is_none() {
            return self.send(request, None).await.map_err(PipelineError::Transport);
        }

        let err = match self.send(request.clone(), None).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        if !self.is_auth_failure(&err) {
            return Err(PipelineError::Transport(err));
        }

        let (reply, outcome) = oneshot::channel();
        self.enqueue(PendingRequest { request, reply });
        outcome.await.unwrap_or_else(|_| {
            Err(PipelineError::Refresh(RequestError::network(
                "token refresh was abandoned",
            )))
        })
    }

    fn is_auth_failure(&self, err: &TransportError) -> bool {
        err.status
            .is_some_and(|status| self.retry_on_status.contains(&status))
    }

    /// Attach a bearer token (the override, else the store's current one) and send.
    async fn send(
        &self,
        mut request: TransportRequest,
        token: Option<&SecretString>,
    ) -> Result<TransportResponse, TransportError> {
        let token = match token {
            Some(token) => Some(token.clone()),
            None => self.store.as_ref().and_then(|store| store.access_token()),
        };
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::try_from(format!("Bearer {}", token.expose()))
                .map_err(|e| TransportError::network(format!("invalid access token: {e}")))?;
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        self.transport.send(request).await
    }

    fn enqueue(self: &Arc<Self>, pending: PendingRequest) {
        let start_cycle = {
            let mut shared = self.shared.lock();
            shared.pending.push(pending);
            tracing::debug!(
                pending = shared.pending.len(),
                "request queued until token refresh settles"
            );
            match shared.state {
                RefreshState::Idle => {
                    shared.state = RefreshState::Refreshing;
                    true
                }
                RefreshState::Refreshing => false,
            }
        };

        if start_cycle {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.refresh_cycle().await }.in_current_span());
        }
    }

    async fn refresh_cycle(self: Arc<Self>) {
        let mut guard = CycleGuard {
            coordinator: &*self,
            settled: false,
        };
        let Some(refresher) = self.refresher.as_ref() else {
            return;
        };

        tracing::info!("access token rejected; refreshing");
        let outcome = refresher.refresh().await;
        if let Ok(tokens) = &outcome {
            self.store_tokens(tokens);
        }
        let pending = guard.settle();

        match outcome {
            Ok(tokens) => {
                tracing::info!(replaying = pending.len(), "access token refreshed");
                for record in pending {
                    self.spawn_replay(record, tokens.access_token.clone());
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    rejected = pending.len(),
                    "token refresh failed; logging out"
                );
                for record in pending {
                    deliver(record.reply, Err(PipelineError::Refresh(err.clone())));
                }
                if let Some(logout) = &self.logout {
                    logout.on_logout();
                }
            }
        }
    }

    fn store_tokens(&self, tokens: &TokenPair) {
        let Some(store) = &self.store else {
            return;
        };
        store.set_access_token(tokens.access_token.clone());
        if let Some(refresh) = &tokens.refresh_token {
            store.set_refresh_token(refresh.clone());
        }
    }

    fn spawn_replay(self: &Arc<Self>, record: PendingRequest, token: SecretString) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let PendingRequest { request, reply } = record;
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                "replaying request with refreshed token"
            );
            let result = this.send(request, Some(&token)).await;
            if let Err(err) = &result
                && this.is_auth_failure(err)
            {
                tracing::debug!(status = ?err.status, "replayed request rejected again; not retrying");
            }
            deliver(reply, result.map_err(PipelineError::Transport));
        }
        .in_current_span());
    }
}

fn deliver(reply: Reply, result: Result<TransportResponse, PipelineError>) {
    if reply.send(result).is_err() {
        tracing::debug!("caller dropped before its request settled");
    }
}

/// Returns the coordinator to `Idle` even if the refresher panics, dropping
/// the pending replies so their callers fail instead of hanging.
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl CycleGuard<'_> {
    fn settle(&mut self) -> Vec<PendingRequest> {
        self.settled = true;
        let mut shared = self.coordinator.shared.lock();
        shared.state = RefreshState::Idle;
        std::mem::take(&mut shared.pending)
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let abandoned = self.settle();
        tracing::warn!(
            abandoned = abandoned.len(),
            "token refresh aborted; pending requests rejected"
        );
    }
}
