use pkg_constants::{network, paths, workspace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Which backend the hub drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Single-host container engine.
    #[default]
    Local,
    /// Cluster orchestrator.
    #[serde(alias = "k8s")]
    Kubernetes,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ExecutionMode::Local),
            "kubernetes" | "k8s" => Ok(ExecutionMode::Kubernetes),
            other => Err(anyhow::anyhow!("unknown execution mode: {}", other)),
        }
    }
}

/// Hub configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// hub-name: nbhub
/// execution-mode: local
/// port: 8000
/// cleanup-interval-seconds: 3600
/// session:
///   api-url: http://nbhub:8081/hub/api
///   api-token: secret
/// workspace:
///   image: mltooling/ml-workspace:0.8.7
///   max-container-size-gb: 50
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfigFile {
    #[serde(default, alias = "hub-name")]
    pub hub_name: Option<String>,
    #[serde(default, alias = "execution-mode")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "admin-token")]
    pub admin_token: Option<String>,
    #[serde(default, alias = "cleanup-interval-seconds")]
    pub cleanup_interval_seconds: Option<i64>,
    #[serde(default)]
    pub session: SessionConfigFile,
    #[serde(default)]
    pub workspace: WorkspaceConfigFile,
    #[serde(default)]
    pub backend: BackendConfigFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfigFile {
    #[serde(default, alias = "api-url")]
    pub api_url: Option<String>,
    #[serde(default, alias = "api-token")]
    pub api_token: Option<String>,
    #[serde(default, alias = "timeout-seconds")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfigFile {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "name-prefix")]
    pub name_prefix: Option<String>,
    #[serde(default, alias = "shm-size")]
    pub shm_size: Option<String>,
    #[serde(default, alias = "mount-path")]
    pub mount_path: Option<String>,
    #[serde(default)]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default, alias = "preserve-volume-on-recreate")]
    pub preserve_volume_on_recreate: Option<bool>,
    #[serde(default, alias = "max-container-size-gb")]
    pub max_container_size_gb: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfigFile {
    #[serde(default, alias = "docker-binary")]
    pub docker_binary: Option<String>,
    #[serde(default, alias = "timeout-seconds")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, alias = "volume-capacity")]
    pub volume_capacity: Option<String>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

// --- Resolved configuration ---

/// Fully resolved hub configuration, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub hub_name: String,
    pub mode: ExecutionMode,
    pub port: u16,
    pub data_dir: String,
    pub admin_token: Option<String>,
    /// `None` disables the periodic reclaimer.
    pub cleanup_interval: Option<Duration>,
    pub session: SessionConfig,
    pub workspace: WorkspaceConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_url: String,
    pub api_token: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub image: String,
    pub images: Vec<String>,
    pub port: u16,
    pub name_prefix: String,
    pub shm_size: String,
    pub mount_path: String,
    pub environment: BTreeMap<String, String>,
    pub preserve_volume_on_recreate: bool,
    pub max_container_size_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub docker_binary: String,
    pub timeout: Duration,
    pub namespace: String,
    pub volume_capacity: String,
}

impl HubConfig {
    /// Fill every unset field of the file with its default.
    pub fn from_file(file: HubConfigFile) -> Self {
        let hub_name = file
            .hub_name
            .unwrap_or_else(|| workspace::DEFAULT_HUB_NAME.to_string());

        let cleanup_interval = match file
            .cleanup_interval_seconds
            .unwrap_or(workspace::DEFAULT_CLEANUP_INTERVAL_SECS)
        {
            secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
            _ => None,
        };

        let image = file
            .workspace
            .image
            .unwrap_or_else(|| workspace::DEFAULT_IMAGE.to_string());
        let images = file
            .workspace
            .images
            .unwrap_or_else(|| vec![image.clone()]);

        let environment = file.workspace.environment.unwrap_or_else(|| {
            workspace::DEFAULT_ENVIRONMENT
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        });

        let max_container_size_bytes = file
            .workspace
            .max_container_size_gb
            .filter(|gb| *gb > 0.0)
            .map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64);

        Self {
            session: SessionConfig {
                api_url: file
                    .session
                    .api_url
                    .unwrap_or_else(|| format!("http://{}:8081/hub/api", hub_name)),
                api_token: file.session.api_token.unwrap_or_default(),
                timeout: Duration::from_secs(
                    file.session
                        .timeout_seconds
                        .filter(|secs| *secs > 0)
                        .unwrap_or(workspace::DEFAULT_SESSION_TIMEOUT_SECS),
                ),
            },
            workspace: WorkspaceConfig {
                image,
                images,
                port: file
                    .workspace
                    .port
                    .unwrap_or(workspace::DEFAULT_WORKSPACE_PORT),
                name_prefix: file
                    .workspace
                    .name_prefix
                    .unwrap_or_else(|| workspace::DEFAULT_NAME_PREFIX.to_string()),
                shm_size: file
                    .workspace
                    .shm_size
                    .unwrap_or_else(|| workspace::DEFAULT_SHM_SIZE.to_string()),
                mount_path: file
                    .workspace
                    .mount_path
                    .unwrap_or_else(|| workspace::DEFAULT_MOUNT_PATH.to_string()),
                environment,
                preserve_volume_on_recreate: file
                    .workspace
                    .preserve_volume_on_recreate
                    .unwrap_or(true),
                max_container_size_bytes,
            },
            backend: BackendConfig {
                docker_binary: file
                    .backend
                    .docker_binary
                    .unwrap_or_else(|| paths::DEFAULT_DOCKER_BINARY.to_string()),
                timeout: Duration::from_secs(
                    file.backend
                        .timeout_seconds
                        .unwrap_or(workspace::DEFAULT_BACKEND_TIMEOUT_SECS),
                ),
                namespace: file
                    .backend
                    .namespace
                    .unwrap_or_else(|| workspace::DEFAULT_NAMESPACE.to_string()),
                volume_capacity: file
                    .backend
                    .volume_capacity
                    .unwrap_or_else(|| workspace::DEFAULT_VOLUME_CAPACITY.to_string()),
            },
            hub_name,
            mode: file.execution_mode.unwrap_or_default(),
            port: file.port.unwrap_or(network::DEFAULT_API_PORT),
            data_dir: file
                .data_dir
                .unwrap_or_else(|| paths::DEFAULT_SERVER_DATA_DIR.to_string()),
            admin_token: file.admin_token.filter(|t| !t.is_empty()),
            cleanup_interval,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_file(HubConfigFile::default())
    }
}
