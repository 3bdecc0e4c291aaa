use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use pkg_container::RemoveOutcome;
use pkg_session::CurrentUser;
use pkg_spawner::WorkspaceStatus;
use pkg_types::{Identity, LaunchOptions, WorkspaceHandle, validate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::AppState;
use crate::auth::authorize_owner;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LaunchRequest {
    /// Absent on a plain restart, which reuses the saved options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<LaunchOptions>,
    /// Replace an existing container instead of resuming it.
    #[serde(default)]
    pub fresh: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    pub remove: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub name: String,
    pub removed: bool,
}

fn identity_for(
    state: &AppState,
    user: &CurrentUser,
    owner: &str,
    server: &str,
) -> Result<Identity, ApiError> {
    authorize_owner(user, owner)?;
    validate::validate_server_name(server).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Identity::new(&state.config.hub_name, owner, server))
}

async fn launch(
    state: AppState,
    identity: Identity,
    request: LaunchRequest,
) -> Result<Json<WorkspaceHandle>, ApiError> {
    let requested = request.options.is_some();
    let mut options = match request.options {
        Some(options) => options,
        None => state.bridge.load(&identity).await?,
    };
    options.update |= request.fresh;

    let spec = state.spawner.plan_launch(&identity, &options, &state.host)?;
    let handle = state.spawner.apply(&spec).await?;
    info!("Launched {} at {}", identity, handle.endpoint);

    if requested {
        // The update flag applies to this launch only.
        options.update = false;
        if let Err(e) = state.bridge.record(&identity, &options).await {
            warn!("Could not save launch options for {}: {}", identity, e);
        }
    }
    Ok(Json(handle))
}

async fn stop(
    state: AppState,
    identity: Identity,
    query: StopQuery,
) -> Result<Json<StopResponse>, ApiError> {
    let name = identity.object_name(&state.config.workspace.name_prefix);
    if query.remove {
        let outcome = state.spawner.remove(&identity).await?;
        if let Err(e) = state.bridge.forget(&identity).await {
            warn!("Could not drop saved options for {}: {}", identity, e);
        }
        Ok(Json(StopResponse {
            name,
            removed: outcome == RemoveOutcome::Removed,
        }))
    } else {
        state.spawner.stop(&identity).await?;
        Ok(Json(StopResponse {
            name,
            removed: false,
        }))
    }
}

async fn status(state: AppState, identity: Identity) -> Result<Json<WorkspaceStatus>, ApiError> {
    let saved = state.bridge.load(&identity).await?;
    let status = state.spawner.get_status(&identity, saved).await?;
    if status.state.is_none() {
        return Err(ApiError::NotFound(format!("no workspace for {}", identity)));
    }
    Ok(Json(status))
}

/// POST /api/v1/users/{user}/server
pub async fn launch_default(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(owner): Path<String>,
    request: Option<Json<LaunchRequest>>,
) -> Result<(StatusCode, Json<WorkspaceHandle>), ApiError> {
    let identity = identity_for(&state, &user, &owner, "")?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok((StatusCode::CREATED, launch(state, identity, request).await?))
}

/// POST /api/v1/users/{user}/servers/{server}
pub async fn launch_named(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((owner, server)): Path<(String, String)>,
    request: Option<Json<LaunchRequest>>,
) -> Result<(StatusCode, Json<WorkspaceHandle>), ApiError> {
    let identity = identity_for(&state, &user, &owner, &server)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok((StatusCode::CREATED, launch(state, identity, request).await?))
}

/// DELETE /api/v1/users/{user}/server
pub async fn stop_default(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(owner): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<Json<StopResponse>, ApiError> {
    let identity = identity_for(&state, &user, &owner, "")?;
    stop(state, identity, query).await
}

/// DELETE /api/v1/users/{user}/servers/{server}
pub async fn stop_named(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((owner, server)): Path<(String, String)>,
    Query(query): Query<StopQuery>,
) -> Result<Json<StopResponse>, ApiError> {
    let identity = identity_for(&state, &user, &owner, &server)?;
    stop(state, identity, query).await
}

/// GET /api/v1/users/{user}/server/status
pub async fn status_default(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(owner): Path<String>,
) -> Result<Json<WorkspaceStatus>, ApiError> {
    let identity = identity_for(&state, &user, &owner, "")?;
    status(state, identity).await
}

/// GET /api/v1/users/{user}/servers/{server}/status
pub async fn status_named(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((owner, server)): Path<(String, String)>,
) -> Result<Json<WorkspaceStatus>, ApiError> {
    let identity = identity_for(&state, &user, &owner, &server)?;
    status(state, identity).await
}
