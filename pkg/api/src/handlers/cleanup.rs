use axum::{Extension, Json, extract::State};
use pkg_controllers::SweepReport;
use pkg_session::CurrentUser;
use tracing::info;

use crate::AppState;
use crate::auth::authorize_admin;
use crate::error::ApiError;

/// GET /api/v1/cleanup/users
///
/// Removes resources of users the session layer no longer knows.
pub async fn cleanup_users(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<SweepReport>, ApiError> {
    authorize_admin(&user)?;
    info!("{} requested orphan cleanup", user.name);
    Ok(Json(state.reclaimer.sweep_orphans().await?))
}

/// GET /api/v1/cleanup/expired
pub async fn cleanup_expired(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<SweepReport>, ApiError> {
    authorize_admin(&user)?;
    info!("{} requested expiry cleanup", user.name);
    Ok(Json(state.reclaimer.sweep_expired().await?))
}

/// GET /api/v1/cleanup/storage
pub async fn cleanup_storage(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<SweepReport>, ApiError> {
    authorize_admin(&user)?;
    info!("{} requested storage cleanup", user.name);
    Ok(Json(state.reclaimer.sweep_oversized().await?))
}
