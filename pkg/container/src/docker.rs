use async_trait::async_trait;
use pkg_types::config::ExecutionMode;
use pkg_types::{
    Labels, LaunchSpec, NetworkHandle, NetworkInfo, Subnet, VolumeInfo, WorkspaceHandle,
    WorkspaceInfo, WorkspaceState, labels,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backend::{
    ConnectOutcome, ContainerBackend, CreateOutcome, DisconnectOutcome, RemoveOptions,
    RemoveOutcome,
};
use crate::error::{BackendError, BackendResult};

/// Local container engine backend, driven through the `docker` CLI.
/// Every call is a subprocess bounded by the configured timeout.
pub struct DockerBackend {
    binary: String,
    timeout: Duration,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl DockerBackend {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
        }
    }

    /// Create a backend and verify the daemon answers.
    pub async fn detect(binary: &str, timeout: Duration) -> anyhow::Result<Self> {
        let backend = Self::new(binary, timeout);
        let out = backend
            .run(
                "version",
                &args(["version", "--format", "{{.Server.Version}}"]),
            )
            .await?;
        if !out.success {
            anyhow::bail!("docker daemon not reachable: {}", out.stderr.trim());
        }
        info!("Using docker engine {} via {}", out.stdout.trim(), binary);
        Ok(backend)
    }

    async fn run(&self, operation: &str, args: &[String]) -> BackendResult<CommandOutput> {
        debug!("[docker] {} {}", self.binary, args.join(" "));
        let fut = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BackendError::Unavailable(format!(
                    "failed to execute {}: {}",
                    self.binary, e
                )));
            }
            Err(_) => {
                return Err(BackendError::Timeout {
                    operation: operation.to_string(),
                    after: self.timeout,
                });
            }
        };
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn inspect_network(&self, name: &str) -> BackendResult<Option<NetworkInfo>> {
        let out = self
            .run("inspect_network", &args(["network", "inspect", name]))
            .await?;
        if !out.success {
            return match classify_stderr(&out.stderr) {
                Failure::NotFound => Ok(None),
                _ => Err(into_error("inspect_network", &out.stderr)),
            };
        }
        Ok(parse_networks(&out.stdout)?.into_iter().next())
    }

    async fn inspect_volume(&self, name: &str) -> BackendResult<Option<VolumeInfo>> {
        let out = self
            .run("inspect_volume", &args(["volume", "inspect", name]))
            .await?;
        if !out.success {
            return match classify_stderr(&out.stderr) {
                Failure::NotFound => Ok(None),
                _ => Err(into_error("inspect_volume", &out.stderr)),
            };
        }
        Ok(parse_volumes(&out.stdout)?.into_iter().next())
    }

    /// `docker inspect --size` for a batch of containers.
    /// Containers removed between listing and inspecting are skipped.
    async fn inspect_containers(&self, ids: &[String]) -> BackendResult<Vec<WorkspaceInfo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = args(["inspect", "--size", "--type", "container"]);
        cmd.extend(ids.iter().cloned());
        let out = self.run("inspect_workspace", &cmd).await?;
        if !out.success {
            match classify_stderr(&out.stderr) {
                Failure::NotFound if ids.len() == 1 => return Ok(Vec::new()),
                Failure::NotFound => {}
                _ => return Err(into_error("inspect_workspace", &out.stderr)),
            }
        }
        parse_containers(&out.stdout)
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ─── stderr classification ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    DaemonDown,
    PoolOverlap,
    AlreadyExists,
    NotConnected,
    NotFound,
    InvalidSpec,
    Other,
}

fn classify_stderr(stderr: &str) -> Failure {
    let s = stderr.to_ascii_lowercase();
    if s.contains("cannot connect to the docker daemon") || s.contains("is the docker daemon running")
    {
        Failure::DaemonDown
    } else if s.contains("pool overlaps") {
        Failure::PoolOverlap
    } else if s.contains("already exists") || s.contains("is already in use") {
        Failure::AlreadyExists
    } else if s.contains("is not connected") {
        Failure::NotConnected
    } else if s.contains("no such") || s.contains("not found") {
        Failure::NotFound
    } else if s.contains("invalid") {
        Failure::InvalidSpec
    } else {
        Failure::Other
    }
}

fn into_error(operation: &str, stderr: &str) -> BackendError {
    let msg = stderr.trim().to_string();
    match classify_stderr(stderr) {
        Failure::DaemonDown => BackendError::Unavailable(msg),
        Failure::PoolOverlap => BackendError::SubnetConflict(msg),
        Failure::InvalidSpec => BackendError::InvalidSpec(msg),
        _ => BackendError::Api(format!("{}: {}", operation, msg)),
    }
}

// ─── JSON parsing ───────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkJson {
    id: String,
    name: String,
    #[serde(rename = "IPAM", default)]
    ipam: Option<IpamJson>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpamJson {
    #[serde(default)]
    config: Option<Vec<IpamConfigJson>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpamConfigJson {
    #[serde(default)]
    subnet: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeJson {
    name: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerJson {
    id: String,
    name: String,
    config: ContainerConfigJson,
    state: ContainerStateJson,
    #[serde(default)]
    network_settings: Option<NetworkSettingsJson>,
    #[serde(default)]
    size_rw: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfigJson {
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerStateJson {
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettingsJson {
    #[serde(default)]
    networks: Option<BTreeMap<String, EndpointJson>>,
}

#[derive(Deserialize)]
struct EndpointJson {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> BackendResult<Vec<T>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| BackendError::Api(format!("unexpected docker output: {}", e)))
}

fn parse_networks(raw: &str) -> BackendResult<Vec<NetworkInfo>> {
    let networks: Vec<NetworkJson> = parse_json(raw)?;
    Ok(networks
        .into_iter()
        .map(|n| {
            // First parseable IPv4 subnet; IPv6 pools are skipped.
            let subnet = n
                .ipam
                .and_then(|ipam| ipam.config)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|c| c.subnet)
                .find_map(|s| s.parse::<Subnet>().ok());
            NetworkInfo {
                id: n.id,
                name: n.name,
                subnet,
                labels: n.labels.unwrap_or_default(),
            }
        })
        .collect())
}

fn parse_volumes(raw: &str) -> BackendResult<Vec<VolumeInfo>> {
    let volumes: Vec<VolumeJson> = parse_json(raw)?;
    Ok(volumes
        .into_iter()
        .map(|v| VolumeInfo {
            name: v.name,
            labels: v.labels.unwrap_or_default(),
        })
        .collect())
}

fn parse_containers(raw: &str) -> BackendResult<Vec<WorkspaceInfo>> {
    let containers: Vec<ContainerJson> = parse_json(raw)?;
    Ok(containers
        .into_iter()
        .map(|c| {
            let address = c
                .network_settings
                .and_then(|s| s.networks)
                .unwrap_or_default()
                .into_values()
                .filter_map(|e| e.ip_address)
                .find(|ip| !ip.is_empty());
            WorkspaceInfo {
                id: c.id,
                name: c.name.trim_start_matches('/').to_string(),
                image: c.config.image,
                labels: c.config.labels.unwrap_or_default(),
                state: WorkspaceState::from_backend(&c.state.status),
                address,
                size_rw_bytes: c.size_rw.and_then(|s| u64::try_from(s).ok()),
            }
        })
        .collect())
}

/// Arguments for `docker create` from a launch spec.
pub(crate) fn create_args(spec: &LaunchSpec) -> Vec<String> {
    let mut cmd = args([
        "create",
        "--name",
        spec.name.as_str(),
        "--hostname",
        spec.name.as_str(),
    ]);
    for pair in labels::to_pairs(&spec.labels) {
        cmd.push("--label".into());
        cmd.push(pair);
    }
    for (key, value) in &spec.env {
        cmd.push("--env".into());
        cmd.push(format!("{}={}", key, value));
    }
    if let Some(network) = &spec.network {
        cmd.push("--network".into());
        cmd.push(network.clone());
    }
    if let Some(cpus) = spec.limits.cpus {
        cmd.push("--cpus".into());
        cmd.push(cpus.to_string());
    }
    if let Some(memory) = &spec.limits.memory {
        cmd.push("--memory".into());
        cmd.push(memory.clone());
    }
    if let Some(shm) = &spec.limits.shm_size {
        cmd.push("--shm-size".into());
        cmd.push(shm.clone());
    }
    if let Some(storage) = &spec.limits.storage {
        cmd.push("--storage-opt".into());
        cmd.push(format!("size={}", storage));
    }
    if spec.gpus.is_some() {
        cmd.push("--runtime".into());
        cmd.push("nvidia".into());
    }
    if let Some(volume) = &spec.volume {
        cmd.push("--volume".into());
        cmd.push(format!("{}:{}", volume.name, volume.mount_path));
    }
    cmd.push(spec.image.clone());
    cmd
}

fn selector_filters(selector: &str) -> Vec<String> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .flat_map(|term| ["--filter".to_string(), format!("label={}", term)])
        .collect()
}

fn ids_from(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    fn supports_networks(&self) -> bool {
        true
    }

    async fn list_networks(&self) -> BackendResult<Vec<NetworkInfo>> {
        let out = self
            .run("list_networks", &args(["network", "ls", "-q", "--no-trunc"]))
            .await?;
        if !out.success {
            return Err(into_error("list_networks", &out.stderr));
        }
        let ids = ids_from(&out.stdout);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = args(["network", "inspect"]);
        cmd.extend(ids);
        let out = self.run("list_networks", &cmd).await?;
        if !out.success && out.stdout.trim().is_empty() {
            return Err(into_error("list_networks", &out.stderr));
        }
        parse_networks(&out.stdout)
    }

    async fn create_network(
        &self,
        name: &str,
        subnet: &Subnet,
        labels: &Labels,
    ) -> BackendResult<CreateOutcome<NetworkHandle>> {
        let mut cmd = args(["network", "create", "--driver", "bridge"]);
        cmd.push("--subnet".into());
        cmd.push(subnet.to_string());
        cmd.push("--gateway".into());
        cmd.push(subnet.gateway().to_string());
        for pair in labels::to_pairs(labels) {
            cmd.push("--label".into());
            cmd.push(pair);
        }
        cmd.push(name.to_string());

        let out = self.run("create_network", &cmd).await?;
        if out.success {
            info!("[docker] created network {} ({})", name, subnet);
            return Ok(CreateOutcome::Created(NetworkHandle {
                id: out.stdout.trim().to_string(),
                name: name.to_string(),
                subnet: Some(*subnet),
            }));
        }
        match classify_stderr(&out.stderr) {
            Failure::AlreadyExists => match self.inspect_network(name).await? {
                Some(existing) => Ok(CreateOutcome::AlreadyExists(existing.into())),
                None => Err(BackendError::Api(format!(
                    "network {} reported as existing but could not be inspected",
                    name
                ))),
            },
            _ => Err(into_error("create_network", &out.stderr)),
        }
    }

    async fn connect_network(&self, network: &str, endpoint: &str) -> BackendResult<ConnectOutcome> {
        let out = self
            .run("connect_network", &args(["network", "connect", network, endpoint]))
            .await?;
        if out.success {
            return Ok(ConnectOutcome::Connected);
        }
        match classify_stderr(&out.stderr) {
            Failure::AlreadyExists => Ok(ConnectOutcome::AlreadyConnected),
            _ => Err(into_error("connect_network", &out.stderr)),
        }
    }

    async fn disconnect_network(
        &self,
        network: &str,
        endpoint: &str,
    ) -> BackendResult<DisconnectOutcome> {
        let out = self
            .run(
                "disconnect_network",
                &args(["network", "disconnect", "--force", network, endpoint]),
            )
            .await?;
        if out.success {
            return Ok(DisconnectOutcome::Disconnected);
        }
        match classify_stderr(&out.stderr) {
            Failure::NotConnected | Failure::NotFound => Ok(DisconnectOutcome::NotConnected),
            _ => Err(into_error("disconnect_network", &out.stderr)),
        }
    }

    async fn remove_network(&self, name: &str) -> BackendResult<RemoveOutcome> {
        let out = self
            .run("remove_network", &args(["network", "rm", name]))
            .await?;
        if out.success {
            info!("[docker] removed network {}", name);
            return Ok(RemoveOutcome::Removed);
        }
        match classify_stderr(&out.stderr) {
            Failure::NotFound => Ok(RemoveOutcome::NotFound),
            _ => Err(into_error("remove_network", &out.stderr)),
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &Labels,
    ) -> BackendResult<CreateOutcome<VolumeInfo>> {
        // `docker volume create` succeeds silently on an existing name.
        if let Some(existing) = self.inspect_volume(name).await? {
            return Ok(CreateOutcome::AlreadyExists(existing));
        }
        let mut cmd = args(["volume", "create"]);
        for pair in labels::to_pairs(labels) {
            cmd.push("--label".into());
            cmd.push(pair);
        }
        cmd.push(name.to_string());
        let out = self.run("create_volume", &cmd).await?;
        if !out.success {
            return Err(into_error("create_volume", &out.stderr));
        }
        info!("[docker] created volume {}", name);
        Ok(CreateOutcome::Created(VolumeInfo {
            name: name.to_string(),
            labels: labels.clone(),
        }))
    }

    async fn list_volumes(&self, selector: &str) -> BackendResult<Vec<VolumeInfo>> {
        let mut cmd = args(["volume", "ls", "-q"]);
        cmd.extend(selector_filters(selector));
        let out = self.run("list_volumes", &cmd).await?;
        if !out.success {
            return Err(into_error("list_volumes", &out.stderr));
        }
        let names = ids_from(&out.stdout);
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = args(["volume", "inspect"]);
        cmd.extend(names);
        let out = self.run("list_volumes", &cmd).await?;
        if !out.success && out.stdout.trim().is_empty() {
            return Err(into_error("list_volumes", &out.stderr));
        }
        parse_volumes(&out.stdout)
    }

    async fn remove_volume(&self, name: &str) -> BackendResult<RemoveOutcome> {
        let out = self
            .run("remove_volume", &args(["volume", "rm", name]))
            .await?;
        if out.success {
            info!("[docker] removed volume {}", name);
            return Ok(RemoveOutcome::Removed);
        }
        match classify_stderr(&out.stderr) {
            Failure::NotFound => Ok(RemoveOutcome::NotFound),
            _ => Err(into_error("remove_volume", &out.stderr)),
        }
    }

    async fn create_workspace(
        &self,
        spec: &LaunchSpec,
    ) -> BackendResult<CreateOutcome<WorkspaceHandle>> {
        let out = self.run("create_workspace", &create_args(spec)).await?;
        let endpoint = format!("{}:{}", spec.name, spec.port);
        if out.success {
            info!("[docker] created workspace container {}", spec.name);
            return Ok(CreateOutcome::Created(WorkspaceHandle {
                id: out.stdout.trim().to_string(),
                name: spec.name.clone(),
                endpoint,
            }));
        }
        match classify_stderr(&out.stderr) {
            Failure::AlreadyExists => {
                let existing = self.get_workspace(&spec.name).await?.ok_or_else(|| {
                    BackendError::Api(format!(
                        "container {} reported as existing but could not be inspected",
                        spec.name
                    ))
                })?;
                Ok(CreateOutcome::AlreadyExists(WorkspaceHandle {
                    id: existing.id,
                    name: existing.name,
                    endpoint,
                }))
            }
            _ => Err(into_error("create_workspace", &out.stderr)),
        }
    }

    async fn get_workspace(&self, name: &str) -> BackendResult<Option<WorkspaceInfo>> {
        Ok(self
            .inspect_containers(&[name.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn list_workspaces(&self, selector: &str) -> BackendResult<Vec<WorkspaceInfo>> {
        let mut cmd = args(["ps", "-a", "-q", "--no-trunc"]);
        cmd.extend(selector_filters(selector));
        let out = self.run("list_workspaces", &cmd).await?;
        if !out.success {
            return Err(into_error("list_workspaces", &out.stderr));
        }
        self.inspect_containers(&ids_from(&out.stdout)).await
    }

    async fn start_workspace(&self, name: &str) -> BackendResult<()> {
        let out = self.run("start_workspace", &args(["start", name])).await?;
        if !out.success {
            return Err(into_error("start_workspace", &out.stderr));
        }
        Ok(())
    }

    async fn stop_workspace(&self, name: &str) -> BackendResult<()> {
        let out = self.run("stop_workspace", &args(["stop", name])).await?;
        if out.success {
            return Ok(());
        }
        match classify_stderr(&out.stderr) {
            Failure::NotFound => {
                warn!("[docker] stop: container {} does not exist", name);
                Ok(())
            }
            _ => Err(into_error("stop_workspace", &out.stderr)),
        }
    }

    async fn remove_workspace(
        &self,
        name: &str,
        opts: RemoveOptions,
    ) -> BackendResult<RemoveOutcome> {
        let mut cmd = args(["rm"]);
        if opts.force {
            cmd.push("--force".into());
        }
        if opts.volumes {
            cmd.push("--volumes".into());
        }
        cmd.push(name.to_string());
        let out = self.run("remove_workspace", &cmd).await?;
        if out.success {
            info!("[docker] removed container {}", name);
            return Ok(RemoveOutcome::Removed);
        }
        match classify_stderr(&out.stderr) {
            Failure::NotFound => Ok(RemoveOutcome::NotFound),
            _ => Err(into_error("remove_workspace", &out.stderr)),
        }
    }
}
