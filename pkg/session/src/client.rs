use async_trait::async_trait;
use pkg_types::config::SessionConfig;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::provider::{CurrentUser, SessionError, SessionProvider};

#[derive(Deserialize)]
struct UserEntry {
    name: String,
}

/// REST client for the hub's session API, authenticated with a service token.
/// Every request, body included, is bounded by the configured timeout; an
/// elapsed request surfaces as `SessionError::Transport`.
pub struct HubApiClient {
    http: Client,
    api_url: String,
    api_token: String,
}

impl HubApiClient {
    pub fn new(api_url: &str, api_token: &str, timeout: Duration) -> Result<Self, SessionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        Self::new(&config.api_url, &config.api_token, config.timeout)
    }

    fn server_url(&self, user: &str, server_name: &str) -> String {
        if server_name.is_empty() {
            format!("{}/users/{}/server", self.api_url, user)
        } else {
            format!("{}/users/{}/servers/{}", self.api_url, user, server_name)
        }
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request.header("Authorization", format!("token {}", token))
    }

    async fn send(&self, action: &str, request: RequestBuilder) -> Result<Response, SessionError> {
        let resp = self.authorized(request, &self.api_token).send().await?;
        let status = resp.status();
        debug!("{} -> {}", action, status);
        if status.is_success() {
            Ok(resp)
        } else {
            Err(SessionError::Status {
                action: action.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl SessionProvider for HubApiClient {
    async fn list_users(&self) -> Result<Vec<String>, SessionError> {
        let url = format!("{}/users", self.api_url);
        let resp = self.send("list users", self.http.get(&url)).await?;
        let users: Vec<UserEntry> = resp.json().await?;
        Ok(users.into_iter().map(|u| u.name).collect())
    }

    async fn delete_server(
        &self,
        user: &str,
        server_name: &str,
        remove: bool,
    ) -> Result<(), SessionError> {
        let url = self.server_url(user, server_name);
        let mut request = self.http.delete(&url);
        if remove {
            request = request.json(&serde_json::json!({ "remove": true }));
        }
        let action = if remove { "delete server" } else { "stop server" };
        match self.send(action, request).await {
            Ok(_) => {
                info!("Session layer accepted {} for {}/{}", action, user, server_name);
                Ok(())
            }
            Err(e) => {
                warn!("Session layer refused {} for {}/{}: {}", action, user, server_name, e);
                Err(e)
            }
        }
    }

    async fn create_server(&self, user: &str, server_name: &str) -> Result<(), SessionError> {
        let url = self.server_url(user, server_name);
        self.send("create server", self.http.post(&url)).await?;
        info!("Session layer started {}/{}", user, server_name);
        Ok(())
    }

    async fn resolve_token(&self, token: &str) -> Result<CurrentUser, SessionError> {
        let url = format!("{}/user", self.api_url);
        let resp = self.authorized(self.http.get(&url), token).send().await?;
        match resp.status().as_u16() {
            200..=299 => Ok(resp.json().await?),
            401 | 403 => Err(SessionError::Unauthorized),
            status => Err(SessionError::Status {
                action: "resolve token".into(),
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> HubApiClient {
        HubApiClient::new(
            &format!("{}/hub/api/", server.url()),
            "svc-token",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_users() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/hub/api/users")
            .match_header("authorization", "token svc-token")
            .with_status(200)
            .with_body(r#"[{"name":"alice","admin":true},{"name":"bob","servers":{}}]"#)
            .create_async()
            .await;

        let users = client(&server).list_users().await.unwrap();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_users_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hub/api/users")
            .with_status(500)
            .create_async()
            .await;

        let err = client(&server).list_users().await.unwrap_err();
        assert!(matches!(err, SessionError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hub/api/users")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(500));
                w.write_all(b"[]")
            })
            .create_async()
            .await;

        let hub = HubApiClient::new(
            &format!("{}/hub/api", server.url()),
            "svc-token",
            Duration::from_millis(100),
        )
        .unwrap();
        let err = hub.list_users().await.unwrap_err();
        match err {
            SessionError::Transport(e) => assert!(e.is_timeout()),
            other => panic!("expected a transport timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_named_server_with_remove() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/hub/api/users/alice/servers/gpu")
            .match_header("authorization", "token svc-token")
            .match_body(Matcher::Json(serde_json::json!({ "remove": true })))
            .with_status(204)
            .create_async()
            .await;

        client(&server).delete_server("alice", "gpu", true).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stop_default_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/hub/api/users/alice/server")
            .with_status(202)
            .create_async()
            .await;

        client(&server).stop_server("alice", "").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_refused() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/hub/api/users/alice/server")
            .with_status(400)
            .create_async()
            .await;

        let err = client(&server)
            .delete_server("alice", "", true)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_create_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hub/api/users/bob/servers/big")
            .with_status(201)
            .create_async()
            .await;

        client(&server).create_server("bob", "big").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hub/api/user")
            .match_header("authorization", "token user-token")
            .with_status(200)
            .with_body(r#"{"name":"alice","admin":false,"groups":[]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/hub/api/user")
            .match_header("authorization", "token bad")
            .with_status(403)
            .create_async()
            .await;

        let hub = client(&server);
        let user = hub.resolve_token("user-token").await.unwrap();
        assert_eq!(
            user,
            CurrentUser {
                name: "alice".into(),
                admin: false
            }
        );
        assert!(matches!(
            hub.resolve_token("bad").await.unwrap_err(),
            SessionError::Unauthorized
        ));
    }
}
