use async_trait::async_trait;
use pkg_types::config::ExecutionMode;
use pkg_types::{
    Labels, LaunchSpec, NetworkHandle, NetworkInfo, Subnet, VolumeInfo, WorkspaceHandle,
    WorkspaceInfo, WorkspaceState, labels,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

use crate::backend::{
    ConnectOutcome, ContainerBackend, CreateOutcome, DisconnectOutcome, RemoveOptions,
    RemoveOutcome,
};
use crate::error::{BackendError, BackendResult};

/// A concurrent actor that beats the next `create_network` call.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkRace {
    /// A network with the requested name appears with this subnet.
    NameTaken(Subnet),
    /// An unrelated network grabs the requested subnet.
    PoolTaken,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    networks: BTreeMap<String, NetworkInfo>,
    connections: BTreeSet<(String, String)>,
    volumes: BTreeMap<String, VolumeInfo>,
    workspaces: BTreeMap<String, WorkspaceInfo>,
    specs: BTreeMap<String, LaunchSpec>,
    removal_failures: HashMap<String, u32>,
    network_race: Option<NetworkRace>,
    unavailable: bool,
    ops: Vec<String>,
}

impl Inner {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", kind, self.next_id)
    }

    fn record(&mut self, op: String) -> BackendResult<()> {
        if self.unavailable {
            return Err(BackendError::Unavailable("memory backend switched off".into()));
        }
        self.ops.push(op);
        Ok(())
    }

    fn injected_removal_failure(&mut self, name: &str) -> BackendResult<()> {
        if let Some(left) = self.removal_failures.get_mut(name)
            && *left > 0
        {
            *left -= 1;
            return Err(BackendError::Api(format!("injected removal failure for {}", name)));
        }
        Ok(())
    }
}

/// In-process backend. Keeps every object in memory and logs each call,
/// so launch ordering and reclamation can be asserted without a daemon.
pub struct MemoryBackend {
    mode: ExecutionMode,
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Behaves like the local engine: networks supported, sizes reported.
    pub fn local() -> Self {
        Self {
            mode: ExecutionMode::Local,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Behaves like the cluster backend: no per-user networks.
    pub fn cluster() -> Self {
        Self {
            mode: ExecutionMode::Kubernetes,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Seed a network created by someone else.
    pub async fn add_network(&self, name: &str, subnet: Option<&str>, labels: Labels) {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id("net");
        inner.networks.insert(
            name.to_string(),
            NetworkInfo {
                id,
                name: name.to_string(),
                subnet: subnet.and_then(|s| s.parse().ok()),
                labels,
            },
        );
    }

    pub async fn add_volume(&self, name: &str, labels: Labels) {
        let mut inner = self.inner.lock().await;
        inner.volumes.insert(
            name.to_string(),
            VolumeInfo {
                name: name.to_string(),
                labels,
            },
        );
    }

    /// Seed a running workspace.
    pub async fn add_workspace(&self, name: &str, image: &str, labels: Labels) -> WorkspaceInfo {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id("ctr");
        let info = WorkspaceInfo {
            id,
            name: name.to_string(),
            image: image.to_string(),
            labels,
            state: WorkspaceState::Running,
            address: None,
            size_rw_bytes: Some(0),
        };
        inner.workspaces.insert(name.to_string(), info.clone());
        info
    }

    pub async fn set_workspace_size(&self, name: &str, bytes: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(ws) = inner.workspaces.get_mut(name) {
            ws.size_rw_bytes = Some(bytes);
        }
    }

    /// Make the next `times` removals of `name` fail.
    pub async fn fail_removals(&self, name: &str, times: u32) {
        self.inner
            .lock()
            .await
            .removal_failures
            .insert(name.to_string(), times);
    }

    pub async fn arm_network_race(&self, race: NetworkRace) {
        self.inner.lock().await.network_race = Some(race);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// Every successful call so far, in order.
    pub async fn ops(&self) -> Vec<String> {
        self.inner.lock().await.ops.clone()
    }

    pub async fn network(&self, name: &str) -> Option<NetworkInfo> {
        self.inner.lock().await.networks.get(name).cloned()
    }

    pub async fn network_names(&self) -> Vec<String> {
        self.inner.lock().await.networks.keys().cloned().collect()
    }

    pub async fn volume_names(&self) -> Vec<String> {
        self.inner.lock().await.volumes.keys().cloned().collect()
    }

    pub async fn workspace_names(&self) -> Vec<String> {
        self.inner.lock().await.workspaces.keys().cloned().collect()
    }

    pub async fn workspace(&self, name: &str) -> Option<WorkspaceInfo> {
        self.inner.lock().await.workspaces.get(name).cloned()
    }

    /// The spec the workspace was last created from.
    pub async fn spec(&self, name: &str) -> Option<LaunchSpec> {
        self.inner.lock().await.specs.get(name).cloned()
    }

    pub async fn is_connected(&self, network: &str, endpoint: &str) -> bool {
        self.inner
            .lock()
            .await
            .connections
            .contains(&(network.to_string(), endpoint.to_string()))
    }

    fn require_networks(&self, operation: &'static str) -> BackendResult<()> {
        if self.supports_networks() {
            Ok(())
        } else {
            Err(self.unsupported(operation))
        }
    }
}

#[async_trait]
impl ContainerBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn supports_networks(&self) -> bool {
        self.mode == ExecutionMode::Local
    }

    async fn list_networks(&self) -> BackendResult<Vec<NetworkInfo>> {
        self.require_networks("list_networks")?;
        let mut inner = self.inner.lock().await;
        inner.record("list_networks".into())?;
        Ok(inner.networks.values().cloned().collect())
    }

    async fn create_network(
        &self,
        name: &str,
        subnet: &Subnet,
        labels: &Labels,
    ) -> BackendResult<CreateOutcome<NetworkHandle>> {
        self.require_networks("create_network")?;
        let mut inner = self.inner.lock().await;
        inner.record(format!("create_network {} {}", name, subnet))?;

        match inner.network_race.take() {
            Some(NetworkRace::NameTaken(theirs)) => {
                let id = inner.next_id("net");
                let info = NetworkInfo {
                    id,
                    name: name.to_string(),
                    subnet: Some(theirs),
                    labels: labels.clone(),
                };
                inner.networks.insert(name.to_string(), info.clone());
                return Ok(CreateOutcome::AlreadyExists(info.into()));
            }
            Some(NetworkRace::PoolTaken) => {
                let id = inner.next_id("net");
                let squatter = format!("external-{}", id);
                inner.networks.insert(
                    squatter.clone(),
                    NetworkInfo {
                        id,
                        name: squatter,
                        subnet: Some(*subnet),
                        labels: Labels::new(),
                    },
                );
                return Err(BackendError::SubnetConflict(subnet.to_string()));
            }
            None => {}
        }

        if let Some(existing) = inner
            .networks
            .values()
            .find(|n| n.name.eq_ignore_ascii_case(name))
        {
            return Ok(CreateOutcome::AlreadyExists(existing.clone().into()));
        }
        if inner
            .networks
            .values()
            .filter_map(|n| n.subnet)
            .any(|s| s.overlaps(subnet))
        {
            return Err(BackendError::SubnetConflict(subnet.to_string()));
        }

        let id = inner.next_id("net");
        let info = NetworkInfo {
            id,
            name: name.to_string(),
            subnet: Some(*subnet),
            labels: labels.clone(),
        };
        inner.networks.insert(name.to_string(), info.clone());
        Ok(CreateOutcome::Created(info.into()))
    }

    async fn connect_network(&self, network: &str, endpoint: &str) -> BackendResult<ConnectOutcome> {
        self.require_networks("connect_network")?;
        let mut inner = self.inner.lock().await;
        inner.record(format!("connect {} {}", network, endpoint))?;
        if !inner.networks.contains_key(network) {
            return Err(BackendError::Api(format!("network {} not found", network)));
        }
        if inner
            .connections
            .insert((network.to_string(), endpoint.to_string()))
        {
            Ok(ConnectOutcome::Connected)
        } else {
            Ok(ConnectOutcome::AlreadyConnected)
        }
    }

    async fn disconnect_network(
        &self,
        network: &str,
        endpoint: &str,
    ) -> BackendResult<DisconnectOutcome> {
        self.require_networks("disconnect_network")?;
        let mut inner = self.inner.lock().await;
        inner.record(format!("disconnect {} {}", network, endpoint))?;
        if inner
            .connections
            .remove(&(network.to_string(), endpoint.to_string()))
        {
            Ok(DisconnectOutcome::Disconnected)
        } else {
            Ok(DisconnectOutcome::NotConnected)
        }
    }

    async fn remove_network(&self, name: &str) -> BackendResult<RemoveOutcome> {
        self.require_networks("remove_network")?;
        let mut inner = self.inner.lock().await;
        inner.injected_removal_failure(name)?;
        inner.record(format!("remove_network {}", name))?;
        if inner.connections.iter().any(|(net, _)| net == name) {
            return Err(BackendError::Api(format!(
                "network {} has active endpoints",
                name
            )));
        }
        match inner.networks.remove(name) {
            Some(_) => Ok(RemoveOutcome::Removed),
            None => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &Labels,
    ) -> BackendResult<CreateOutcome<VolumeInfo>> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("create_volume {}", name))?;
        if let Some(existing) = inner.volumes.get(name) {
            return Ok(CreateOutcome::AlreadyExists(existing.clone()));
        }
        let info = VolumeInfo {
            name: name.to_string(),
            labels: labels.clone(),
        };
        inner.volumes.insert(name.to_string(), info.clone());
        Ok(CreateOutcome::Created(info))
    }

    async fn list_volumes(&self, selector: &str) -> BackendResult<Vec<VolumeInfo>> {
        let mut inner = self.inner.lock().await;
        inner.record("list_volumes".into())?;
        Ok(inner
            .volumes
            .values()
            .filter(|v| labels::matches_selector(&v.labels, selector))
            .cloned()
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> BackendResult<RemoveOutcome> {
        let mut inner = self.inner.lock().await;
        inner.injected_removal_failure(name)?;
        inner.record(format!("remove_volume {}", name))?;
        match inner.volumes.remove(name) {
            Some(_) => Ok(RemoveOutcome::Removed),
            None => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn create_workspace(
        &self,
        spec: &LaunchSpec,
    ) -> BackendResult<CreateOutcome<WorkspaceHandle>> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("create_workspace {}", spec.name))?;
        let endpoint = format!("{}:{}", spec.name, spec.port);
        if let Some(existing) = inner.workspaces.get(&spec.name) {
            return Ok(CreateOutcome::AlreadyExists(WorkspaceHandle {
                id: existing.id.clone(),
                name: existing.name.clone(),
                endpoint,
            }));
        }
        if let Some(network) = &spec.network
            && !inner.networks.contains_key(network)
        {
            return Err(BackendError::InvalidSpec(format!(
                "network {} does not exist",
                network
            )));
        }
        let id = inner.next_id("ctr");
        inner.workspaces.insert(
            spec.name.clone(),
            WorkspaceInfo {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                labels: spec.labels.clone(),
                state: WorkspaceState::Created,
                address: None,
                size_rw_bytes: Some(0),
            },
        );
        inner.specs.insert(spec.name.clone(), spec.clone());
        Ok(CreateOutcome::Created(WorkspaceHandle {
            id,
            name: spec.name.clone(),
            endpoint,
        }))
    }

    async fn get_workspace(&self, name: &str) -> BackendResult<Option<WorkspaceInfo>> {
        let inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(BackendError::Unavailable("memory backend switched off".into()));
        }
        Ok(inner
            .workspaces
            .values()
            .find(|w| w.name == name || w.id == name)
            .cloned())
    }

    async fn list_workspaces(&self, selector: &str) -> BackendResult<Vec<WorkspaceInfo>> {
        let mut inner = self.inner.lock().await;
        inner.record("list_workspaces".into())?;
        Ok(inner
            .workspaces
            .values()
            .filter(|w| labels::matches_selector(&w.labels, selector))
            .cloned()
            .collect())
    }

    async fn start_workspace(&self, name: &str) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("start {}", name))?;
        match inner.workspaces.get_mut(name) {
            Some(ws) => {
                ws.state = WorkspaceState::Running;
                Ok(())
            }
            None => Err(BackendError::Api(format!("no such container: {}", name))),
        }
    }

    async fn stop_workspace(&self, name: &str) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("stop {}", name))?;
        if let Some(ws) = inner.workspaces.get_mut(name) {
            ws.state = WorkspaceState::Exited;
        }
        Ok(())
    }

    async fn remove_workspace(
        &self,
        name: &str,
        opts: RemoveOptions,
    ) -> BackendResult<RemoveOutcome> {
        let mut inner = self.inner.lock().await;
        inner.injected_removal_failure(name)?;
        inner.record(format!("remove_workspace {}", name))?;
        let running = inner
            .workspaces
            .get(name)
            .is_some_and(|w| w.state == WorkspaceState::Running);
        if running && !opts.force {
            return Err(BackendError::Api(format!(
                "container {} is running; stop it or force removal",
                name
            )));
        }
        match inner.workspaces.remove(name) {
            Some(_) => {
                inner.specs.remove(name);
                Ok(RemoveOutcome::Removed)
            }
            None => Ok(RemoveOutcome::NotFound),
        }
    }
}
