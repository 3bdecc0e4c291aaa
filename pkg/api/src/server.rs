use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::auth::auth_middleware;
use crate::handlers::{cleanup, hub, workspaces};
use crate::request_id::request_id_middleware;

/// Every route, authenticated, with request ids.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/hub/info", get(hub::hub_info))
        .route(
            "/api/v1/users/{user}/server",
            post(workspaces::launch_default).delete(workspaces::stop_default),
        )
        .route(
            "/api/v1/users/{user}/server/status",
            get(workspaces::status_default),
        )
        .route(
            "/api/v1/users/{user}/servers/{server}",
            post(workspaces::launch_named).delete(workspaces::stop_named),
        )
        .route(
            "/api/v1/users/{user}/servers/{server}/status",
            get(workspaces::status_named),
        )
        .route("/api/v1/cleanup/users", get(cleanup::cleanup_users))
        .route("/api/v1/cleanup/expired", get(cleanup::cleanup_expired))
        .route("/api/v1/cleanup/storage", get(cleanup::cleanup_storage))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(api_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    info!("Starting hub API on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use pkg_container::{ContainerBackend, MemoryBackend};
    use pkg_controllers::ResourceReclaimer;
    use pkg_session::{CurrentUser, SessionError, SessionProvider};
    use pkg_spawner::WorkspaceSpawner;
    use pkg_state::{StateStore, WorkspaceStateBridge};
    use pkg_types::config::HubConfigFile;
    use pkg_types::{HostResources, HubConfig};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const ADMIN: &str = "admin-secret";

    struct TokenSession;

    #[async_trait]
    impl SessionProvider for TokenSession {
        async fn list_users(&self) -> Result<Vec<String>, SessionError> {
            Ok(vec!["alice".into()])
        }

        async fn delete_server(&self, _: &str, _: &str, _: bool) -> Result<(), SessionError> {
            Ok(())
        }

        async fn create_server(&self, _: &str, _: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn resolve_token(&self, token: &str) -> Result<CurrentUser, SessionError> {
            match token {
                "alice-token" => Ok(CurrentUser {
                    name: "alice".into(),
                    admin: false,
                }),
                _ => Err(SessionError::Unauthorized),
            }
        }
    }

    struct Harness {
        app: Router,
        backend: Arc<MemoryBackend>,
        _dir: tempfile::TempDir,
    }

    async fn harness(backend: MemoryBackend) -> Harness {
        let mut file = HubConfigFile::default();
        file.hub_name = Some("nbhub".into());
        file.admin_token = Some(ADMIN.into());
        let config = Arc::new(HubConfig::from_file(file));

        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().to_str().unwrap()).await.unwrap();
        let backend = Arc::new(backend);
        let dyn_backend: Arc<dyn ContainerBackend> = backend.clone();
        let session: Arc<dyn SessionProvider> = Arc::new(TokenSession);

        let state = AppState {
            config: config.clone(),
            host: HostResources {
                cpu_count: 8,
                memory_bytes: 16 << 30,
                gpu_count: 0,
            },
            spawner: Arc::new(WorkspaceSpawner::new(config.clone(), dyn_backend.clone())),
            session: session.clone(),
            bridge: WorkspaceStateBridge::new(store),
            reclaimer: Arc::new(ResourceReclaimer::new(config, dyn_backend, session)),
        };
        Harness {
            app: router(state),
            backend,
            _dir: dir,
        }
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_requires_token() {
        let h = harness(MemoryBackend::local()).await;
        let (status, _) = call(&h.app, request("GET", "/api/v1/hub/info", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(
            &h.app,
            request("GET", "/api/v1/hub/info", Some("wrong"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_request_id_header() {
        let h = harness(MemoryBackend::local()).await;
        let resp = h
            .app
            .clone()
            .oneshot(request("GET", "/api/v1/hub/info", Some(ADMIN), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let id = resp.headers().get("x-request-id").unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_hub_info() {
        let h = harness(MemoryBackend::local()).await;
        let (status, body) =
            call(&h.app, request("GET", "/api/v1/hub/info", Some("alice-token"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hub_name"], "nbhub");
        assert_eq!(body["mode"], "local");
        assert_eq!(body["host"]["cpu_count"], 8);
    }

    #[tokio::test]
    async fn test_launch_status_and_remove() {
        let h = harness(MemoryBackend::local()).await;
        let launch = json!({ "options": { "cpu_limit": 2.0, "days_to_live": 3 } });
        let (status, body) = call(
            &h.app,
            request("POST", "/api/v1/users/alice/server", Some("alice-token"), Some(launch)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "ws-alice-hub");
        assert!(h.backend.is_connected("nbhub-alice", "nbhub").await);

        let (status, body) = call(
            &h.app,
            request("GET", "/api/v1/users/alice/server/status", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cpu_limit"], 2.0);
        assert_eq!(body["remaining_lifetime_days"], 3);
        assert_eq!(body["state"], "Running");

        let (status, body) = call(
            &h.app,
            request(
                "DELETE",
                "/api/v1/users/alice/server?remove=true",
                Some("alice-token"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], true);
        assert!(h.backend.workspace_names().await.is_empty());

        let (status, _) = call(
            &h.app,
            request("GET", "/api/v1/users/alice/server/status", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_restart_reuses_saved_options() {
        let h = harness(MemoryBackend::local()).await;
        let launch = json!({ "options": { "cpu_limit": 2.0, "days_to_live": 3 } });
        let (status, _) = call(
            &h.app,
            request("POST", "/api/v1/users/alice/server", Some("alice-token"), Some(launch)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = call(
            &h.app,
            request("DELETE", "/api/v1/users/alice/server", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &h.app,
            request("POST", "/api/v1/users/alice/server", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            &h.app,
            request("GET", "/api/v1/users/alice/server/status", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cpu_limit"], 2.0);
        assert_eq!(body["days_to_live"], 3);
        assert_eq!(body["state"], "Running");
    }

    #[tokio::test]
    async fn test_fresh_launch_without_options_keeps_saved_ones() {
        let h = harness(MemoryBackend::cluster()).await;
        let launch = json!({ "options": { "cpu_limit": 1.5 } });
        call(
            &h.app,
            request("POST", "/api/v1/users/alice/server", Some("alice-token"), Some(launch)),
        )
        .await;

        let (status, _) = call(
            &h.app,
            request(
                "POST",
                "/api/v1/users/alice/server",
                Some("alice-token"),
                Some(json!({ "fresh": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = call(
            &h.app,
            request("GET", "/api/v1/users/alice/server/status", Some("alice-token"), None),
        )
        .await;
        assert_eq!(body["cpu_limit"], 1.5);
        assert!(body.get("update").is_none());
    }

    #[tokio::test]
    async fn test_named_server_stop_keeps_container() {
        let h = harness(MemoryBackend::local()).await;
        let (status, body) = call(
            &h.app,
            request("POST", "/api/v1/users/alice/servers/gpu", Some(ADMIN), None),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "ws-alice-hub-gpu");

        let (status, body) = call(
            &h.app,
            request("DELETE", "/api/v1/users/alice/servers/gpu", Some(ADMIN), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], false);
        assert_eq!(
            h.backend.workspace_names().await,
            vec!["ws-alice-hub-gpu".to_string()]
        );
    }

    #[tokio::test]
    async fn test_other_users_server_forbidden() {
        let h = harness(MemoryBackend::local()).await;
        let (status, _) = call(
            &h.app,
            request("POST", "/api/v1/users/bob/server", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(h.backend.ops().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let h = harness(MemoryBackend::local()).await;
        let launch = json!({ "options": { "cpu_limit": -1.0 } });
        let (status, body) = call(
            &h.app,
            request("POST", "/api/v1/users/alice/server", Some("alice-token"), Some(launch)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("cpu"));
    }

    #[tokio::test]
    async fn test_cleanup_requires_admin() {
        let h = harness(MemoryBackend::local()).await;
        let (status, _) = call(
            &h.app,
            request("GET", "/api/v1/cleanup/users", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_cleanup_users_report() {
        let backend = MemoryBackend::local();
        let bob = pkg_types::labels::workspace_labels(&pkg_types::Identity::new("nbhub", "bob", ""));
        backend.add_workspace("ws-bob-hub", "ws:1", bob).await;
        let h = harness(backend).await;
        let (status, body) =
            call(&h.app, request("GET", "/api/v1/cleanup/users", Some(ADMIN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], json!(["ws-bob-hub"]));
    }

    #[tokio::test]
    async fn test_cleanup_storage_unsupported_in_cluster() {
        let h = harness(MemoryBackend::cluster()).await;
        let (status, _) = call(
            &h.app,
            request("GET", "/api/v1/cleanup/storage", Some(ADMIN), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_backend_down_is_503() {
        let backend = MemoryBackend::local();
        backend.set_unavailable(true).await;
        let h = harness(backend).await;
        let (status, _) = call(
            &h.app,
            request("POST", "/api/v1/users/alice/server", Some("alice-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
