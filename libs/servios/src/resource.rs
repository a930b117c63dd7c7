use crate::client::{HttpMethod, RequestOptions, ServiceClient};
use crate::error::{ConfigError, RequestError};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use std::fmt;
use std::marker::PhantomData;

/// Typed CRUD operations over one collection endpoint.
///
/// | operation | request |
/// |---|---|
/// | `list` / `list_filtered` | `GET {path}` |
/// | `get_by_id` | `GET {path}/{id}` |
/// | `create` | `POST {path}` |
/// | `update` | `PUT {path}/{id}` |
/// | `remove` | `DELETE {path}/{id}` |
///
/// Authentication and mocking come from the wrapped [`ServiceClient`].
pub struct ResourceClient<T> {
    client: ServiceClient,
    path: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            path: self.path.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ResourceClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceClient")
            .field("path", &self.path)
            .field("entity", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> ResourceClient<T> {
    /// # Errors
    /// [`ConfigError::MissingResourcePath`] when `path` is empty once
    /// surrounding slashes are removed.
    pub fn new(client: ServiceClient, path: impl AsRef<str>) -> Result<Self, ConfigError> {
        let path = path.as_ref().trim().trim_matches('/');
        if path.is_empty() {
            return Err(ConfigError::MissingResourcePath);
        }
        Ok(Self {
            client,
            path: path.to_owned(),
            _entity: PhantomData,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    fn item(&self, id: impl fmt::Display) -> String {
        format!("{}/{id}", self.path)
    }

    /// # Errors
    /// Any [`RequestError`] from the underlying request.
    pub async fn list(&self) -> Result<Vec<T>, RequestError> {
        self.client
            .execute(HttpMethod::Get, &self.path, RequestOptions::new())
            .await
    }

    /// List with `filter` sent as query parameters.
    ///
    /// # Errors
    /// Any [`RequestError`] from the underlying request.
    pub async fn list_filtered<F: Serialize + ?Sized>(
        &self,
        filter: &F,
    ) -> Result<Vec<T>, RequestError> {
        self.client
            .execute(
                HttpMethod::Get,
                &self.path,
                RequestOptions::new().query(filter),
            )
            .await
    }

    /// # Errors
    /// Any [`RequestError`] from the underlying request.
    pub async fn get_by_id(&self, id: impl fmt::Display) -> Result<T, RequestError> {
        self.client
            .execute(HttpMethod::Get, &self.item(id), RequestOptions::new())
            .await
    }

    /// # Errors
    /// Any [`RequestError`] from the underlying request.
    pub async fn create<P: Serialize + ?Sized>(&self, partial: &P) -> Result<T, RequestError> {
        self.client
            .execute(
                HttpMethod::Post,
                &self.path,
                RequestOptions::new().body(partial),
            )
            .await
    }

    /// # Errors
    /// Any [`RequestError`] from the underlying request.
    pub async fn update<P: Serialize + ?Sized>(
        &self,
        id: impl fmt::Display,
        partial: &P,
    ) -> Result<T, RequestError> {
        self.client
            .execute(
                HttpMethod::Put,
                &self.item(id),
                RequestOptions::new().body(partial),
            )
            .await
    }

    /// Whatever the server answers is discarded.
    ///
    /// # Errors
    /// Any [`RequestError`] from the underlying request.
    pub async fn remove(&self, id: impl fmt::Display) -> Result<(), RequestError> {
        let IgnoredAny = self
            .client
            .execute(HttpMethod::Delete, &self.item(id), RequestOptions::new())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use httpmock::prelude::*;
    use serde::Deserialize;
    use serde_json::json;
    use servios_http::HttpClientConfig;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    fn users(server: &MockServer) -> ResourceClient<User> {
        let client = ServiceClient::builder(ServiceConfig::new(server.url("/api")))
            .http_config(HttpClientConfig::for_testing())
            .build()
            .unwrap();
        ResourceClient::new(client, "/users/").unwrap()
    }

    #[tokio::test]
    async fn empty_path_is_rejected() {
        let client = ServiceClient::new(ServiceConfig::new("https://api.example.com")).unwrap();
        assert!(matches!(
            ResourceClient::<User>::new(client.clone(), " / "),
            Err(ConfigError::MissingResourcePath)
        ));
        assert_eq!(
            ResourceClient::<User>::new(client, "/users/").unwrap().path(),
            "users"
        );
    }

    #[tokio::test]
    async fn list_and_list_filtered() {
        let server = MockServer::start();
        let users = users(&server);

        let mut all = server.mock(|when, then| {
            when.method(GET).path("/api/users");
            then.status(200)
                .json_body(json!([{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]));
        });
        assert_eq!(users.list().await.unwrap().len(), 2);
        all.assert_calls(1);
        all.delete();

        let admins = server.mock(|when, then| {
            when.method(GET)
                .path("/api/users")
                .query_param("role", "admin");
            then.status(200).json_body(json!([{"id": 2, "name": "b"}]));
        });
        let filtered = users.list_filtered(&[("role", "admin")]).await.unwrap();
        assert_eq!(filtered, vec![User { id: 2, name: "b".to_owned() }]);
        admins.assert_calls(1);
    }

    #[tokio::test]
    async fn item_operations_map_to_verbs() {
        let server = MockServer::start();
        let get = server.mock(|when, then| {
            when.method(GET).path("/api/users/42");
            then.status(200).json_body(json!({"id": 42, "name": "x"}));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/api/users")
                .json_body(json!({"name": "a"}));
            then.status(201).json_body(json!({"id": 43, "name": "a"}));
        });
        let update = server.mock(|when, then| {
            when.method(PUT)
                .path("/api/users/43")
                .json_body(json!({"name": "b"}));
            then.status(200).json_body(json!({"id": 43, "name": "b"}));
        });
        let remove = server.mock(|when, then| {
            when.method(DELETE).path("/api/users/7");
            then.status(204);
        });

        let users = users(&server);
        assert_eq!(users.get_by_id(42).await.unwrap().name, "x");
        assert_eq!(users.create(&json!({"name": "a"})).await.unwrap().id, 43);
        assert_eq!(
            users.update(43, &json!({"name": "b"})).await.unwrap().name,
            "b"
        );
        users.remove(7).await.unwrap();

        get.assert_calls(1);
        create.assert_calls(1);
        update.assert_calls(1);
        remove.assert_calls(1);
    }

    #[tokio::test]
    async fn remove_ignores_response_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(DELETE).path("/api/users/8");
            then.status(200).json_body(json!({"deleted": true}));
        });

        users(&server).remove(8).await.unwrap();
    }

    #[tokio::test]
    async fn missing_item_surfaces_server_payload() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/api/users/404");
            then.status(404).json_body(json!({"message": "no such user"}));
        });

        let err = users(&server).get_by_id(404).await.unwrap_err();
        assert_eq!(err.status, Some(http::StatusCode::NOT_FOUND));
        assert_eq!(err.message, "no such user");
    }
}
