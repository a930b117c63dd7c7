//! Bearer-token authentication for service clients.
//!
//! The host supplies credentials through [`AuthConfig`]; the client attaches
//! the current access token to every request and, when the server rejects
//! it, runs a single refresh shared by every request that failed meanwhile.

mod coordinator;
mod credentials;

pub use coordinator::{PipelineError, RefreshCoordinator, RefreshState};
pub use credentials::{
    AuthConfig, InMemoryTokenStore, LogoutHandler, TokenPair, TokenRefresher, TokenStore,
    refresher_fn,
};
