pub mod auth;
pub mod error;
pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use pkg_controllers::ResourceReclaimer;
use pkg_session::SessionProvider;
use pkg_spawner::Spawner;
use pkg_state::WorkspaceStateBridge;
use pkg_types::{HostResources, HubConfig};

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub host: HostResources,
    pub spawner: Arc<dyn Spawner>,
    pub session: Arc<dyn SessionProvider>,
    pub bridge: WorkspaceStateBridge,
    pub reclaimer: Arc<ResourceReclaimer>,
}
