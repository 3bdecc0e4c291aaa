use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Pod, PodSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::ErrorResponse;
use kube::Client;
use pkg_constants::labels::{LABEL_NVIDIA_VISIBLE_DEVICES, LABEL_ORIGIN, LABEL_POD_NAME};
use pkg_types::config::ExecutionMode;
use pkg_types::{Labels, LaunchSpec, VolumeInfo, WorkspaceHandle, WorkspaceInfo, WorkspaceState};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::{ContainerBackend, CreateOutcome, RemoveOptions, RemoveOutcome};
use crate::error::{BackendError, BackendResult};

const CONTAINER_NAME: &str = "workspace";
const SHM_VOLUME: &str = "dshm";
const DATA_VOLUME: &str = "workspace-data";
const GPU_RUNTIME_CLASS: &str = "nvidia";

/// Cluster backend: one Pod plus one ClusterIP Service per workspace,
/// PersistentVolumeClaims for named volumes. No per-user networks.
pub struct KubernetesBackend {
    client: Client,
    namespace: String,
    volume_capacity: String,
    timeout: Duration,
}

impl KubernetesBackend {
    pub fn new(client: Client, namespace: &str, volume_capacity: &str, timeout: Duration) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            volume_capacity: volume_capacity.to_string(),
            timeout,
        }
    }

    /// In-cluster config first, then the local kubeconfig.
    pub async fn connect(
        namespace: &str,
        volume_capacity: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        info!("Using cluster backend in namespace {}", namespace);
        Ok(Self::new(client, namespace, volume_capacity, timeout))
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn claims(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Bound a cluster API call by the configured timeout.
    async fn timed<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, kube::Error>>,
    ) -> BackendResult<Result<T, kube::Error>> {
        debug!("[k8s] {} in {}", operation, self.namespace);
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| BackendError::Timeout {
                operation: operation.to_string(),
                after: self.timeout,
            })
    }

    async fn ensure_service(&self, spec: &LaunchSpec) -> BackendResult<()> {
        let service = build_service(spec);
        match self
            .timed(
                "create_service",
                self.services().create(&PostParams::default(), &service),
            )
            .await?
        {
            Ok(_) | Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => Ok(()),
            Err(e) => Err(kube_error("create_service", e)),
        }
    }

    async fn delete_service(&self, name: &str) -> BackendResult<()> {
        match self
            .timed(
                "delete_service",
                self.services().delete(name, &DeleteParams::default()),
            )
            .await?
        {
            Ok(_) | Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
            Err(e) => Err(kube_error("delete_service", e)),
        }
    }

    fn endpoint(&self, name: &str, port: u16) -> String {
        format!("{}.{}.svc:{}", name, self.namespace, port)
    }
}

fn kube_error(operation: &str, err: kube::Error) -> BackendError {
    match err {
        kube::Error::Api(resp) if resp.code == 400 || resp.code == 422 => {
            BackendError::InvalidSpec(format!("{}: {}", operation, resp.message))
        }
        kube::Error::Api(resp) => {
            BackendError::Api(format!("{}: {} ({})", operation, resp.message, resp.code))
        }
        other => BackendError::Unavailable(format!("{}: {}", operation, other)),
    }
}

/// Device lists contain commas, which label values may not; they ride in an annotation.
fn split_labels(labels: &Labels) -> (Labels, Labels) {
    let mut plain = labels.clone();
    let mut annotations = Labels::new();
    if let Some(devices) = plain.remove(LABEL_NVIDIA_VISIBLE_DEVICES) {
        annotations.insert(LABEL_NVIDIA_VISIBLE_DEVICES.to_string(), devices);
    }
    (plain, annotations)
}

fn quantity(value: &str) -> Quantity {
    Quantity(value.to_string())
}

pub(crate) fn build_pod(spec: &LaunchSpec) -> Pod {
    let (mut labels, annotations) = split_labels(&spec.labels);
    labels.insert(LABEL_POD_NAME.to_string(), spec.name.clone());

    let mut limits = BTreeMap::new();
    if let Some(cpus) = spec.limits.cpus {
        limits.insert(
            "cpu".to_string(),
            Quantity(format!("{}m", (cpus * 1000.0).round() as i64)),
        );
    }
    if let Some(memory) = &spec.limits.memory {
        limits.insert("memory".to_string(), quantity(memory));
    }
    if let Some(storage) = &spec.limits.storage {
        limits.insert("ephemeral-storage".to_string(), quantity(storage));
    }
    // Zero requests: the scheduler must not reserve the whole limit.
    let requests = BTreeMap::from([
        ("cpu".to_string(), quantity("0")),
        ("memory".to_string(), quantity("0")),
    ]);

    let env = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let mut volumes = vec![Volume {
        name: SHM_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            size_limit: spec.limits.shm_size.as_deref().map(quantity),
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: SHM_VOLUME.to_string(),
        mount_path: "/dev/shm".to_string(),
        ..Default::default()
    }];
    if let Some(volume) = &spec.volume {
        volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: volume.name.clone(),
                read_only: None,
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: volume.mount_path.clone(),
            ..Default::default()
        });
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(spec.name.clone()),
            restart_policy: Some("Always".to_string()),
            runtime_class_name: spec.gpus.as_ref().map(|_| GPU_RUNTIME_CLASS.to_string()),
            containers: vec![Container {
                name: CONTAINER_NAME.to_string(),
                image: Some(spec.image.clone()),
                env: Some(env),
                ports: Some(vec![ContainerPort {
                    container_port: i32::from(spec.port),
                    ..Default::default()
                }]),
                resources: Some(ResourceRequirements {
                    limits: Some(limits),
                    requests: Some(requests),
                    ..Default::default()
                }),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn build_service(spec: &LaunchSpec) -> Service {
    let (labels, _) = split_labels(&spec.labels);
    let mut selector = BTreeMap::new();
    if let Some(origin) = spec.labels.get(LABEL_ORIGIN) {
        selector.insert(LABEL_ORIGIN.to_string(), origin.clone());
    }
    selector.insert(LABEL_POD_NAME.to_string(), spec.name.clone());

    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: i32::from(spec.port),
                target_port: Some(IntOrString::Int(i32::from(spec.port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn build_claim(name: &str, labels: &Labels, capacity: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(split_labels(labels).0),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), quantity(capacity))])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_info(pod: Pod, namespace: &str) -> WorkspaceInfo {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let mut labels = pod.metadata.labels.clone().unwrap_or_default();
    if let Some(devices) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(LABEL_NVIDIA_VISIBLE_DEVICES))
    {
        labels.insert(LABEL_NVIDIA_VISIBLE_DEVICES.to_string(), devices.clone());
    }
    let image = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    let state = if pod.metadata.deletion_timestamp.is_some() {
        WorkspaceState::Exited
    } else {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(WorkspaceState::from_backend)
            .unwrap_or(WorkspaceState::Pending)
    };
    WorkspaceInfo {
        id: pod.metadata.uid.clone().unwrap_or_else(|| name.clone()),
        address: Some(format!("{}.{}.svc", name, namespace)),
        name,
        image,
        labels,
        state,
        size_rw_bytes: None,
    }
}

fn claim_info(claim: PersistentVolumeClaim) -> VolumeInfo {
    VolumeInfo {
        name: claim.metadata.name.unwrap_or_default(),
        labels: claim.metadata.labels.unwrap_or_default(),
    }
}

#[async_trait]
impl ContainerBackend for KubernetesBackend {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Kubernetes
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &Labels,
    ) -> BackendResult<CreateOutcome<VolumeInfo>> {
        let claim = build_claim(name, labels, &self.volume_capacity);
        match self
            .timed(
                "create_volume",
                self.claims().create(&PostParams::default(), &claim),
            )
            .await?
        {
            Ok(created) => {
                info!("[k8s] created claim {}", name);
                Ok(CreateOutcome::Created(claim_info(created)))
            }
            Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
                match self.timed("get_volume", self.claims().get(name)).await? {
                    Ok(existing) => Ok(CreateOutcome::AlreadyExists(claim_info(existing))),
                    Err(e) => Err(kube_error("get_volume", e)),
                }
            }
            Err(e) => Err(kube_error("create_volume", e)),
        }
    }

    async fn list_volumes(&self, selector: &str) -> BackendResult<Vec<VolumeInfo>> {
        let params = ListParams::default().labels(selector);
        match self
            .timed("list_volumes", self.claims().list(&params))
            .await?
        {
            Ok(list) => Ok(list.items.into_iter().map(claim_info).collect()),
            Err(e) => Err(kube_error("list_volumes", e)),
        }
    }

    async fn remove_volume(&self, name: &str) -> BackendResult<RemoveOutcome> {
        match self
            .timed(
                "remove_volume",
                self.claims().delete(name, &DeleteParams::default()),
            )
            .await?
        {
            Ok(_) => {
                info!("[k8s] removed claim {}", name);
                Ok(RemoveOutcome::Removed)
            }
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(RemoveOutcome::NotFound),
            Err(e) => Err(kube_error("remove_volume", e)),
        }
    }

    async fn create_workspace(
        &self,
        spec: &LaunchSpec,
    ) -> BackendResult<CreateOutcome<WorkspaceHandle>> {
        let pod = build_pod(spec);
        let outcome = match self
            .timed(
                "create_workspace",
                self.pods().create(&PostParams::default(), &pod),
            )
            .await?
        {
            Ok(created) => {
                info!("[k8s] created pod {}", spec.name);
                CreateOutcome::Created(pod_info(created, &self.namespace))
            }
            Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
                match self
                    .timed("get_workspace", self.pods().get(&spec.name))
                    .await?
                {
                    Ok(existing) => {
                        CreateOutcome::AlreadyExists(pod_info(existing, &self.namespace))
                    }
                    Err(e) => return Err(kube_error("get_workspace", e)),
                }
            }
            Err(e) => return Err(kube_error("create_workspace", e)),
        };
        self.ensure_service(spec).await?;

        let endpoint = self.endpoint(&spec.name, spec.port);
        let handle = |info: WorkspaceInfo| WorkspaceHandle {
            id: info.id,
            name: info.name,
            endpoint: endpoint.clone(),
        };
        Ok(match outcome {
            CreateOutcome::Created(info) => CreateOutcome::Created(handle(info)),
            CreateOutcome::AlreadyExists(info) => CreateOutcome::AlreadyExists(handle(info)),
        })
    }

    async fn get_workspace(&self, name: &str) -> BackendResult<Option<WorkspaceInfo>> {
        match self
            .timed("get_workspace", self.pods().get_opt(name))
            .await?
        {
            Ok(pod) => Ok(pod.map(|p| pod_info(p, &self.namespace))),
            Err(e) => Err(kube_error("get_workspace", e)),
        }
    }

    async fn list_workspaces(&self, selector: &str) -> BackendResult<Vec<WorkspaceInfo>> {
        let params = ListParams::default().labels(selector);
        match self
            .timed("list_workspaces", self.pods().list(&params))
            .await?
        {
            Ok(list) => Ok(list
                .items
                .into_iter()
                .map(|p| pod_info(p, &self.namespace))
                .collect()),
            Err(e) => Err(kube_error("list_workspaces", e)),
        }
    }

    async fn start_workspace(&self, name: &str) -> BackendResult<()> {
        // Pods run as soon as they are scheduled.
        debug!("[k8s] start {}: nothing to do", name);
        Ok(())
    }

    async fn stop_workspace(&self, name: &str) -> BackendResult<()> {
        // A pod cannot be paused; stopping deletes it and its service.
        self.remove_workspace(name, RemoveOptions::default())
            .await
            .map(|_| ())
    }

    async fn remove_workspace(
        &self,
        name: &str,
        opts: RemoveOptions,
    ) -> BackendResult<RemoveOutcome> {
        let params = if opts.force {
            DeleteParams {
                grace_period_seconds: Some(0),
                ..Default::default()
            }
        } else {
            DeleteParams::default()
        };
        let outcome = match self
            .timed("remove_workspace", self.pods().delete(name, &params))
            .await?
        {
            Ok(_) => {
                info!("[k8s] removed pod {}", name);
                RemoveOutcome::Removed
            }
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => RemoveOutcome::NotFound,
            Err(e) => return Err(kube_error("remove_workspace", e)),
        };
        self.delete_service(name).await?;
        Ok(outcome)
    }
}
