use async_trait::async_trait;
use pkg_types::config::ExecutionMode;
use pkg_types::{
    Labels, LaunchSpec, NetworkHandle, NetworkInfo, Subnet, VolumeInfo, WorkspaceHandle,
    WorkspaceInfo,
};

use crate::error::{BackendError, BackendResult};

// ─── Outcomes ───────────────────────────────────────────────────

/// Result of an idempotent create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome<T> {
    Created(T),
    /// Another call (or another process) created it first; carries the existing object.
    AlreadyExists(T),
}

impl<T> CreateOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            CreateOutcome::Created(v) | CreateOutcome::AlreadyExists(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Result of a delete. `NotFound` counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    /// Kill a running workspace instead of failing.
    pub force: bool,
    /// Also remove anonymous volumes attached to the workspace.
    pub volumes: bool,
}

impl RemoveOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            volumes: true,
        }
    }
}

// ─── Capability trait ───────────────────────────────────────────

/// Orchestration capabilities the hub consumes.
/// Implementations: `DockerBackend` (local engine), `KubernetesBackend` (cluster),
/// `MemoryBackend` (in-process fake).
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Human-readable name of this backend.
    fn name(&self) -> &'static str;

    fn mode(&self) -> ExecutionMode;

    /// Whether per-user networks exist on this backend.
    fn supports_networks(&self) -> bool {
        false
    }

    // --- networks ---

    async fn list_networks(&self) -> BackendResult<Vec<NetworkInfo>> {
        Err(self.unsupported("list_networks"))
    }

    /// Create a bridge network with the given subnet; the gateway is the subnet's first address.
    async fn create_network(
        &self,
        name: &str,
        subnet: &Subnet,
        labels: &Labels,
    ) -> BackendResult<CreateOutcome<NetworkHandle>> {
        let _ = (name, subnet, labels);
        Err(self.unsupported("create_network"))
    }

    /// Attach `endpoint` (a container name or id) to `network`.
    async fn connect_network(&self, network: &str, endpoint: &str) -> BackendResult<ConnectOutcome> {
        let _ = (network, endpoint);
        Err(self.unsupported("connect_network"))
    }

    async fn disconnect_network(
        &self,
        network: &str,
        endpoint: &str,
    ) -> BackendResult<DisconnectOutcome> {
        let _ = (network, endpoint);
        Err(self.unsupported("disconnect_network"))
    }

    async fn remove_network(&self, name: &str) -> BackendResult<RemoveOutcome> {
        let _ = name;
        Err(self.unsupported("remove_network"))
    }

    // --- volumes ---

    async fn create_volume(
        &self,
        name: &str,
        labels: &Labels,
    ) -> BackendResult<CreateOutcome<VolumeInfo>>;

    /// Volumes matching a `key=value[,key=value]` selector.
    async fn list_volumes(&self, selector: &str) -> BackendResult<Vec<VolumeInfo>>;

    async fn remove_volume(&self, name: &str) -> BackendResult<RemoveOutcome>;

    // --- workspaces ---

    /// Create (not start) the workspace. An existing object with the same name
    /// comes back as `AlreadyExists`, untouched.
    async fn create_workspace(
        &self,
        spec: &LaunchSpec,
    ) -> BackendResult<CreateOutcome<WorkspaceHandle>>;

    /// Look up by name or id. `None` when it does not exist.
    async fn get_workspace(&self, name: &str) -> BackendResult<Option<WorkspaceInfo>>;

    async fn list_workspaces(&self, selector: &str) -> BackendResult<Vec<WorkspaceInfo>>;

    async fn start_workspace(&self, name: &str) -> BackendResult<()>;

    /// Stop without removing. A missing workspace is already stopped.
    async fn stop_workspace(&self, name: &str) -> BackendResult<()>;

    async fn remove_workspace(&self, name: &str, opts: RemoveOptions)
    -> BackendResult<RemoveOutcome>;

    fn unsupported(&self, operation: &'static str) -> BackendError {
        BackendError::Unsupported {
            backend: self.name(),
            operation,
        }
    }
}
