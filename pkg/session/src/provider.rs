use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("{action} returned HTTP {status}")]
    Status { action: String, status: u16 },

    #[error("token rejected by session provider")]
    Unauthorized,
}

/// The identity a bearer token resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
}

/// The external session layer that owns users and their named servers.
/// Each call is a single action; callers decide whether a failure aborts
/// anything larger.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn list_users(&self) -> Result<Vec<String>, SessionError>;

    /// Stop a server and, with `remove`, drop it from the session layer.
    /// An empty `server_name` is the user's default server.
    async fn delete_server(
        &self,
        user: &str,
        server_name: &str,
        remove: bool,
    ) -> Result<(), SessionError>;

    async fn stop_server(&self, user: &str, server_name: &str) -> Result<(), SessionError> {
        self.delete_server(user, server_name, false).await
    }

    async fn create_server(&self, user: &str, server_name: &str) -> Result<(), SessionError>;

    async fn resolve_token(&self, token: &str) -> Result<CurrentUser, SessionError>;
}
