//! End-to-end token refresh against mock HTTP servers.
//!
//! The API accepts only `Bearer fresh`; the client starts with `stale`, so
//! every first attempt is rejected and has to wait for the shared refresh
//! served by a separate auth endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use httpmock::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use servios::auth::{AuthConfig, InMemoryTokenStore, TokenPair, TokenStore, refresher_fn};
use servios::{
    HttpClientConfig, RequestError, RequestOptions, ResourceClient, ServiceClient, ServiceConfig,
};

#[derive(Debug, Deserialize)]
struct Refreshed {
    access_token: String,
    refresh_token: Option<String>,
}

fn auth_client(server: &MockServer) -> ServiceClient {
    ServiceClient::builder(ServiceConfig::new(server.url("/auth")))
        .http_config(HttpClientConfig::for_testing())
        .build()
        .unwrap()
}

fn api_client(
    api: &MockServer,
    auth: &MockServer,
    store: &Arc<InMemoryTokenStore>,
    logouts: &Arc<AtomicUsize>,
) -> ServiceClient {
    let auth_api = auth_client(auth);
    let refresh_store = Arc::clone(store);
    let logout_counter = Arc::clone(logouts);

    ServiceClient::builder(ServiceConfig::new(api.url("/api")))
        .http_config(HttpClientConfig::for_testing())
        .auth(
            AuthConfig::new()
                .shared_token_store(Arc::clone(store) as Arc<dyn TokenStore>)
                .refresher(refresher_fn(move || {
                    let auth_api = auth_api.clone();
                    let refresh_token = refresh_store
                        .refresh_token()
                        .map(|t| t.expose().to_owned())
                        .unwrap_or_default();
                    async move {
                        let tokens: Refreshed = auth_api
                            .post(
                                "refresh",
                                RequestOptions::new()
                                    .body(&json!({ "refresh_token": refresh_token })),
                            )
                            .await?;
                        let pair = TokenPair::new(tokens.access_token);
                        Ok::<_, RequestError>(match tokens.refresh_token {
                            Some(refresh) => pair.with_refresh_token(refresh),
                            None => pair,
                        })
                    }
                }))
                .on_logout(move || {
                    logout_counter.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .build()
        .unwrap()
}

fn seeded_store() -> Arc<InMemoryTokenStore> {
    Arc::new(InMemoryTokenStore::with_tokens(
        TokenPair::new("stale").with_refresh_token("r1"),
    ))
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh_and_replay() {
    let auth = MockServer::start();
    let refresh = auth.mock(|when, then| {
        when.method(POST)
            .path("/auth/refresh")
            .json_body(json!({"refresh_token": "r1"}));
        // Slow enough that every first attempt is rejected while it runs.
        then.status(200)
            .delay(Duration::from_millis(300))
            .json_body(json!({"access_token": "fresh", "refresh_token": "r2"}));
    });

    let api = MockServer::start();
    let rejected = api.mock(|when, then| {
        when.header("authorization", "Bearer stale");
        then.status(401).json_body(json!({"message": "token expired"}));
    });
    let accepted = api.mock(|when, then| {
        when.method(GET).header("authorization", "Bearer fresh");
        then.status(200).json_body(json!({"ok": true}));
    });

    let store = seeded_store();
    let logouts = Arc::new(AtomicUsize::new(0));
    let client = api_client(&api, &auth, &store, &logouts);

    let (a, b, c, d) = tokio::join!(
        client.get::<Value>("users/1", RequestOptions::new()),
        client.get::<Value>("users/2", RequestOptions::new()),
        client.get::<Value>("users/3", RequestOptions::new()),
        client.get::<Value>("users/4", RequestOptions::new()),
    );
    for result in [a, b, c, d] {
        assert_eq!(result.unwrap(), json!({"ok": true}));
    }

    refresh.assert_calls(1);
    rejected.assert_calls(4);
    accepted.assert_calls(4);
    assert_eq!(store.access_token().unwrap().expose(), "fresh");
    assert_eq!(store.refresh_token().unwrap().expose(), "r2");
    assert_eq!(logouts.load(Ordering::SeqCst), 0);

    // Later requests carry the new token straight away.
    let _: Value = client.get("users/5", RequestOptions::new()).await.unwrap();
    accepted.assert_calls(5);
    rejected.assert_calls(4);
}

#[tokio::test]
async fn failed_refresh_logs_out_once_and_rejects_all() {
    let auth = MockServer::start();
    let refresh = auth.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(400)
            .delay(Duration::from_millis(300))
            .json_body(json!({"message": "refresh token expired"}));
    });

    let api = MockServer::start();
    let rejected = api.mock(|when, then| {
        when.header_exists("authorization");
        then.status(401).json_body(json!({"message": "token expired"}));
    });

    let store = seeded_store();
    let logouts = Arc::new(AtomicUsize::new(0));
    let client = api_client(&api, &auth, &store, &logouts);

    let (a, b, c) = tokio::join!(
        client.get::<Value>("users/1", RequestOptions::new()),
        client.delete::<()>("users/2", RequestOptions::new()),
        client.post::<Value>("users", RequestOptions::new().body(&json!({"name": "a"}))),
    );
    for result in [a.map(drop), b, c.map(drop)] {
        let err = result.unwrap_err();
        assert_eq!(err.status, Some(http::StatusCode::BAD_REQUEST));
        assert_eq!(err.message, "refresh token expired");
    }

    refresh.assert_calls(1);
    rejected.assert_calls(3);
    assert_eq!(logouts.load(Ordering::SeqCst), 1);
    assert_eq!(store.access_token().unwrap().expose(), "stale");
}

#[tokio::test]
async fn resource_operations_refresh_transparently() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
    }

    let auth = MockServer::start();
    let _refresh = auth.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200).json_body(json!({"access_token": "fresh"}));
    });

    let api = MockServer::start();
    let _rejected = api.mock(|when, then| {
        when.header("authorization", "Bearer stale");
        then.status(401);
    });
    let get = api.mock(|when, then| {
        when.method(GET)
            .path("/api/users/42")
            .header("authorization", "Bearer fresh");
        then.status(200).json_body(json!({"id": 42}));
    });

    let store = seeded_store();
    let logouts = Arc::new(AtomicUsize::new(0));
    let users = ResourceClient::<User>::new(api_client(&api, &auth, &store, &logouts), "users")
        .unwrap();

    assert_eq!(users.get_by_id(42).await.unwrap(), User { id: 42 });
    get.assert_calls(1);
    // No rotated refresh token in the answer: the old one is kept.
    assert_eq!(store.refresh_token().unwrap().expose(), "r1");
}

#[tokio::test]
async fn replay_failure_stays_with_its_caller() {
    let auth = MockServer::start();
    let refresh = auth.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200)
            .delay(Duration::from_millis(300))
            .json_body(json!({"access_token": "fresh"}));
    });

    let api = MockServer::start();
    let _rejected = api.mock(|when, then| {
        when.header("authorization", "Bearer stale");
        then.status(401).json_body(json!({"message": "token expired"}));
    });
    let broken = api.mock(|when, then| {
        when.method(GET)
            .path("/api/users/2")
            .header("authorization", "Bearer fresh");
        then.status(500).json_body(json!({"message": "database unavailable"}));
    });
    let healthy: Vec<_> = ["/api/users/1", "/api/users/3"]
        .into_iter()
        .map(|path| {
            api.mock(|when, then| {
                when.method(GET)
                    .path(path)
                    .header("authorization", "Bearer fresh");
                then.status(200).json_body(json!({"ok": true}));
            })
        })
        .collect();

    let store = seeded_store();
    let logouts = Arc::new(AtomicUsize::new(0));
    let client = api_client(&api, &auth, &store, &logouts);

    let (a, b, c) = tokio::join!(
        client.get::<Value>("users/1", RequestOptions::new()),
        client.get::<Value>("users/2", RequestOptions::new()),
        client.get::<Value>("users/3", RequestOptions::new()),
    );

    assert_eq!(a.unwrap(), json!({"ok": true}));
    assert_eq!(c.unwrap(), json!({"ok": true}));
    let err = b.unwrap_err();
    assert_eq!(err.status, Some(http::StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(err.message, "database unavailable");

    refresh.assert_calls(1);
    broken.assert_calls(1);
    for mock in &healthy {
        mock.assert_calls(1);
    }
    assert_eq!(logouts.load(Ordering::SeqCst), 0);
}
