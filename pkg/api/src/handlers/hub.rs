use axum::{Json, extract::State};
use pkg_types::HubInfo;
use tracing::info;

use crate::AppState;

/// GET /api/v1/hub/info
pub async fn hub_info(State(state): State<AppState>) -> Json<HubInfo> {
    info!("Serving hub info request");
    Json(HubInfo {
        hub_name: state.config.hub_name.clone(),
        mode: state.config.mode,
        host: state.host,
        default_image: state.config.workspace.image.clone(),
        images: state.config.workspace.images.clone(),
    })
}
