use async_trait::async_trait;
use pkg_constants::labels::{LABEL_ORIGIN, LABEL_USER};
use pkg_container::{
    ConnectOutcome, ContainerBackend, CreateOutcome, RemoveOptions, RemoveOutcome,
};
use pkg_network::SubnetAllocator;
use pkg_types::config::HubConfig;
use pkg_types::labels::{self, Labels};
use pkg_types::{HostResources, Identity, LaunchOptions, LaunchSpec, WorkspaceHandle};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::SpawnError;
use crate::lifecycle::{WorkspaceStatus, now_unix, update_available};
use crate::planner::LaunchPlanner;

/// Capability interface the hub drives workspaces through.
#[async_trait]
pub trait Spawner: Send + Sync {
    fn plan_launch(
        &self,
        identity: &Identity,
        options: &LaunchOptions,
        host: &HostResources,
    ) -> Result<LaunchSpec, SpawnError>;

    /// Create or resume the workspace described by `spec`.
    async fn apply(&self, spec: &LaunchSpec) -> Result<WorkspaceHandle, SpawnError>;

    /// Stop the workspace, keeping the container for a later resume.
    async fn stop(&self, identity: &Identity) -> Result<(), SpawnError>;

    /// Remove the workspace container. Named volumes stay.
    async fn remove(&self, identity: &Identity) -> Result<RemoveOutcome, SpawnError>;

    async fn get_status(
        &self,
        identity: &Identity,
        saved: LaunchOptions,
    ) -> Result<WorkspaceStatus, SpawnError>;
}

/// The backend-driven spawner used by the hub in both execution modes.
pub struct WorkspaceSpawner {
    config: Arc<HubConfig>,
    backend: Arc<dyn ContainerBackend>,
    allocator: SubnetAllocator,
    planner: LaunchPlanner,
}

impl WorkspaceSpawner {
    pub fn new(config: Arc<HubConfig>, backend: Arc<dyn ContainerBackend>) -> Self {
        let allocator = SubnetAllocator::new(backend.clone(), &config.hub_name);
        let planner = LaunchPlanner::new(config.clone(), backend.supports_networks());
        Self {
            config,
            backend,
            allocator,
            planner,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ContainerBackend> {
        &self.backend
    }

    fn object_name(&self, identity: &Identity) -> String {
        identity.object_name(&self.config.workspace.name_prefix)
    }

    /// Allocate (or recover) the user's network and attach the hub to it.
    async fn prepare_network(&self, spec: &LaunchSpec, network: &str) -> Result<(), SpawnError> {
        let mut net_labels = labels::origin_labels(&self.config.hub_name);
        net_labels.insert(LABEL_USER.to_string(), spec.identity.user.clone());
        let handle = self.allocator.allocate_or_get(network, &net_labels).await?;
        self.connect_hub(&handle.name).await
    }

    async fn connect_hub(&self, network: &str) -> Result<(), SpawnError> {
        match self
            .backend
            .connect_network(network, &self.config.hub_name)
            .await
        {
            Ok(ConnectOutcome::Connected) => {
                info!("Connected hub {} to network {}", self.config.hub_name, network);
                Ok(())
            }
            Ok(ConnectOutcome::AlreadyConnected) => Ok(()),
            Err(source) => Err(SpawnError::HubConnect {
                network: network.to_string(),
                source,
            }),
        }
    }

    /// Reattach the hub to every network it created. Run once at startup,
    /// since a recreated hub container starts on its default network only.
    pub async fn reconnect_hub_networks(&self) -> Result<usize, SpawnError> {
        if !self.backend.supports_networks() {
            return Ok(0);
        }
        let networks = self.backend.list_networks().await?;
        let mut connected = 0;
        for network in networks
            .iter()
            .filter(|n| n.labels.get(LABEL_ORIGIN) == Some(&self.config.hub_name))
        {
            match self.connect_hub(&network.name).await {
                Ok(()) => connected += 1,
                Err(e) => warn!("Could not reconnect hub to {}: {}", network.name, e),
            }
        }
        info!("Hub attached to {} workspace networks", connected);
        Ok(connected)
    }
}

#[async_trait]
impl Spawner for WorkspaceSpawner {
    fn plan_launch(
        &self,
        identity: &Identity,
        options: &LaunchOptions,
        host: &HostResources,
    ) -> Result<LaunchSpec, SpawnError> {
        self.planner
            .plan_launch_at(identity, options, host, now_unix())
    }

    async fn apply(&self, spec: &LaunchSpec) -> Result<WorkspaceHandle, SpawnError> {
        // The workspace must be able to reach the hub before it starts.
        if let Some(network) = &spec.network {
            self.prepare_network(spec, network).await?;
        }

        let existing = self.backend.get_workspace(&spec.name).await?;
        if existing.is_some() && spec.fresh {
            info!("Replacing existing workspace {} for a fresh launch", spec.name);
            self.backend
                .remove_workspace(&spec.name, RemoveOptions::forced())
                .await?;
            if let Some(volume) = &spec.volume
                && !self.config.workspace.preserve_volume_on_recreate
            {
                info!("Discarding volume {} of {}", volume.name, spec.name);
                self.backend.remove_volume(&volume.name).await?;
            }
        }

        if let Some(volume) = &spec.volume {
            let outcome = self.backend.create_volume(&volume.name, &spec.labels).await?;
            if outcome.was_created() {
                info!("Created volume {} for {}", volume.name, spec.identity);
            }
        }

        // An existing workspace that survived the step above is resumed untouched.
        let handle = match self.backend.create_workspace(spec).await? {
            CreateOutcome::Created(handle) => {
                info!("Created workspace {} ({})", spec.name, spec.image);
                handle
            }
            CreateOutcome::AlreadyExists(handle) => {
                info!("Resuming existing workspace {}", spec.name);
                handle
            }
        };

        self.backend.start_workspace(&handle.name).await?;
        Ok(handle)
    }

    async fn stop(&self, identity: &Identity) -> Result<(), SpawnError> {
        let name = self.object_name(identity);
        self.backend.stop_workspace(&name).await?;
        info!("Stopped workspace {}", name);
        Ok(())
    }

    async fn remove(&self, identity: &Identity) -> Result<RemoveOutcome, SpawnError> {
        let name = self.object_name(identity);
        let outcome = self
            .backend
            .remove_workspace(&name, RemoveOptions::forced())
            .await?;
        info!("Removed workspace {} ({:?})", name, outcome);
        Ok(outcome)
    }

    async fn get_status(
        &self,
        identity: &Identity,
        saved: LaunchOptions,
    ) -> Result<WorkspaceStatus, SpawnError> {
        let workspace = self.backend.get_workspace(&self.object_name(identity)).await?;
        let empty = Labels::new();
        let ws_labels = workspace.as_ref().map(|w| &w.labels).unwrap_or(&empty);
        let mut status = WorkspaceStatus::new(saved, ws_labels, now_unix());
        if let Some(ws) = &workspace {
            status.update_available = update_available(&self.config.workspace.image, &ws.image);
            status.state = Some(ws.state);
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_container::MemoryBackend;
    use pkg_types::WorkspaceState;
    use pkg_types::config::HubConfigFile;

    fn config(preserve_volume: bool) -> Arc<HubConfig> {
        let mut file = HubConfigFile::default();
        file.hub_name = Some("nbhub".into());
        file.workspace.preserve_volume_on_recreate = Some(preserve_volume);
        Arc::new(HubConfig::from_file(file))
    }

    fn host() -> HostResources {
        HostResources {
            cpu_count: 4,
            memory_bytes: 8 * 1024 * 1024 * 1024,
            gpu_count: 0,
        }
    }

    fn position(ops: &[String], prefix: &str) -> usize {
        ops.iter()
            .position(|op| op.starts_with(prefix))
            .unwrap_or_else(|| panic!("no op starting with {:?} in {:?}", prefix, ops))
    }

    async fn launch(
        spawner: &WorkspaceSpawner,
        identity: &Identity,
        options: &LaunchOptions,
    ) -> WorkspaceHandle {
        let spec = spawner.plan_launch(identity, options, &host()).unwrap();
        spawner.apply(&spec).await.unwrap()
    }

    #[tokio::test]
    async fn test_network_and_hub_before_workspace() {
        let backend = Arc::new(MemoryBackend::local());
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        let identity = Identity::new("nbhub", "alice", "");
        let options = LaunchOptions {
            mount_volume: true,
            ..Default::default()
        };
        let handle = launch(&spawner, &identity, &options).await;
        assert_eq!(handle.name, "ws-alice-hub");
        assert_eq!(handle.endpoint, "ws-alice-hub:8080");

        let ops = backend.ops().await;
        let network = position(&ops, "create_network nbhub-alice 172.33.0.0/24");
        let connect = position(&ops, "connect nbhub-alice nbhub");
        let volume = position(&ops, "create_volume ws-alice-hub");
        let create = position(&ops, "create_workspace ws-alice-hub");
        let start = position(&ops, "start ws-alice-hub");
        assert!(network < connect && connect < volume && volume < create && create < start);

        assert!(backend.is_connected("nbhub-alice", "nbhub").await);
        let ws = backend.workspace("ws-alice-hub").await.unwrap();
        assert_eq!(ws.state, WorkspaceState::Running);
        let net = backend.network("nbhub-alice").await.unwrap();
        assert_eq!(net.labels.get(LABEL_USER).unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_resume_reuses_existing() {
        let backend = Arc::new(MemoryBackend::local());
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        let identity = Identity::new("nbhub", "alice", "");
        let first = launch(&spawner, &identity, &LaunchOptions::default()).await;
        spawner.stop(&identity).await.unwrap();
        let second = launch(&spawner, &identity, &LaunchOptions::default()).await;
        assert_eq!(first.id, second.id);
        assert!(!backend.ops().await.iter().any(|op| op.starts_with("remove_workspace")));
    }

    #[tokio::test]
    async fn test_fresh_launch_replaces_container_keeps_volume() {
        let backend = Arc::new(MemoryBackend::local());
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        let identity = Identity::new("nbhub", "alice", "");
        let mut options = LaunchOptions {
            mount_volume: true,
            ..Default::default()
        };
        let first = launch(&spawner, &identity, &options).await;
        options.update = true;
        let second = launch(&spawner, &identity, &options).await;
        assert_ne!(first.id, second.id);

        let ops = backend.ops().await;
        assert!(ops.contains(&"remove_workspace ws-alice-hub".to_string()));
        assert!(!ops.iter().any(|op| op.starts_with("remove_volume")));
        assert_eq!(backend.volume_names().await, vec!["ws-alice-hub".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_launch_discards_volume_when_configured() {
        let backend = Arc::new(MemoryBackend::local());
        let spawner = WorkspaceSpawner::new(config(false), backend.clone());
        let identity = Identity::new("nbhub", "alice", "");
        let mut options = LaunchOptions {
            mount_volume: true,
            ..Default::default()
        };
        launch(&spawner, &identity, &options).await;
        options.update = true;
        launch(&spawner, &identity, &options).await;

        let ops = backend.ops().await;
        let removed = position(&ops, "remove_volume ws-alice-hub");
        let recreated = ops
            .iter()
            .rposition(|op| op == "create_volume ws-alice-hub")
            .unwrap();
        assert!(removed < recreated);
        assert_eq!(backend.volume_names().await, vec!["ws-alice-hub".to_string()]);
    }

    #[tokio::test]
    async fn test_second_server_shares_user_network() {
        let backend = Arc::new(MemoryBackend::local());
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        launch(&spawner, &Identity::new("nbhub", "alice", ""), &LaunchOptions::default()).await;
        launch(&spawner, &Identity::new("nbhub", "alice", "gpu"), &LaunchOptions::default()).await;
        assert_eq!(backend.network_names().await, vec!["nbhub-alice".to_string()]);
        assert_eq!(
            backend.workspace_names().await,
            vec!["ws-alice-hub".to_string(), "ws-alice-hub-gpu".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cluster_mode_skips_networks() {
        let backend = Arc::new(MemoryBackend::cluster());
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        let identity = Identity::new("nbhub", "alice", "");
        launch(&spawner, &identity, &LaunchOptions::default()).await;
        let ops = backend.ops().await;
        assert!(!ops.iter().any(|op| op.contains("network") || op.starts_with("connect")));
        assert_eq!(spawner.reconnect_hub_networks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_only_own_networks() {
        let backend = Arc::new(MemoryBackend::local());
        backend
            .add_network("nbhub-alice", Some("172.33.0.0/24"), labels::origin_labels("nbhub"))
            .await;
        backend
            .add_network("nbhub-bob", Some("172.33.1.0/24"), labels::origin_labels("nbhub"))
            .await;
        backend
            .add_network("other-carol", Some("172.33.2.0/24"), labels::origin_labels("other"))
            .await;
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        assert_eq!(spawner.reconnect_hub_networks().await.unwrap(), 2);
        assert!(backend.is_connected("nbhub-bob", "nbhub").await);
        assert!(!backend.is_connected("other-carol", "nbhub").await);
    }

    #[tokio::test]
    async fn test_status_reports_lifetime_and_update() {
        let backend = Arc::new(MemoryBackend::local());
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        let identity = Identity::new("nbhub", "alice", "");
        let options = LaunchOptions {
            days_to_live: Some(1),
            ..Default::default()
        };
        launch(&spawner, &identity, &options).await;

        let status = spawner.get_status(&identity, options.clone()).await.unwrap();
        let seconds = status.remaining_lifetime_seconds.unwrap();
        assert!(seconds > 86_000 && seconds <= 86_400);
        assert_eq!(status.remaining_lifetime_days, Some(1));
        assert!(!status.update_available);
        assert_eq!(status.state, Some(WorkspaceState::Running));
        assert_eq!(status.options, options);

        let other = Identity::new("nbhub", "alice", "old");
        backend
            .add_workspace("ws-alice-hub-old", "mltooling/ml-workspace:0.8.0", Labels::new())
            .await;
        let status = spawner.get_status(&other, LaunchOptions::default()).await.unwrap();
        assert!(status.update_available);
        assert_eq!(status.remaining_lifetime_seconds, None);
    }

    #[tokio::test]
    async fn test_backend_down_is_unavailable() {
        let backend = Arc::new(MemoryBackend::local());
        backend.set_unavailable(true).await;
        let spawner = WorkspaceSpawner::new(config(true), backend.clone());
        let identity = Identity::new("nbhub", "alice", "");
        let spec = spawner
            .plan_launch(&identity, &LaunchOptions::default(), &host())
            .unwrap();
        let err = spawner.apply(&spec).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let backend = Arc::new(MemoryBackend::local());
        let spawner = WorkspaceSpawner::new(config(true), backend);
        let outcome = spawner
            .remove(&Identity::new("nbhub", "ghost", ""))
            .await
            .unwrap();
        assert_eq!(outcome, RemoveOutcome::NotFound);
    }
}
