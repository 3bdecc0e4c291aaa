use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::identity::Identity;
use crate::labels::Labels;

// --- Host introspection ---

/// What the host machine offers. Used to clamp and inform, never to refuse a launch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct HostResources {
    pub cpu_count: usize,
    pub memory_bytes: u64,
    pub gpu_count: usize,
}

impl HostResources {
    /// Total memory in GB, rounded to one decimal.
    pub fn memory_gb(&self) -> f64 {
        (self.memory_bytes as f64 / 1024.0 / 1024.0 / 1024.0 * 10.0).round() / 10.0
    }
}

// --- Launch specification ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceLimits {
    /// Clamped CPU count.
    #[serde(default)]
    pub cpus: Option<f64>,
    /// Same limit in the local engine's native unit.
    #[serde(default)]
    pub nano_cpus: Option<i64>,
    /// Normalized single-letter suffix form, e.g. `8G`.
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub shm_size: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub name: String,
    pub mount_path: String,
}

/// Everything a backend needs to create one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub identity: Identity,
    /// Container/pod name.
    pub name: String,
    pub image: String,
    /// Per-user network (local engine only).
    pub network: Option<String>,
    pub labels: Labels,
    pub env: BTreeMap<String, String>,
    pub limits: ResourceLimits,
    /// Raw GPU selection; requests the GPU-capable runtime when present.
    pub gpus: Option<String>,
    pub volume: Option<VolumeBinding>,
    pub port: u16,
    /// Fresh launches replace an existing resource; resumes reuse it.
    pub fresh: bool,
}

/// Public description of a running hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubInfo {
    pub hub_name: String,
    pub mode: crate::config::ExecutionMode,
    pub host: HostResources,
    pub default_image: String,
    pub images: Vec<String>,
}

// --- Backend-reported workspace state ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkspaceState {
    Pending,
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Unknown,
}

impl WorkspaceState {
    /// Map a local-engine state or a cluster pod phase onto the common set.
    pub fn from_backend(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => WorkspaceState::Pending,
            "created" => WorkspaceState::Created,
            "running" => WorkspaceState::Running,
            "paused" => WorkspaceState::Paused,
            "restarting" => WorkspaceState::Restarting,
            "exited" | "dead" | "removing" | "succeeded" | "failed" => WorkspaceState::Exited,
            _ => WorkspaceState::Unknown,
        }
    }
}

impl std::fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceState::Pending => write!(f, "Pending"),
            WorkspaceState::Created => write!(f, "Created"),
            WorkspaceState::Running => write!(f, "Running"),
            WorkspaceState::Paused => write!(f, "Paused"),
            WorkspaceState::Restarting => write!(f, "Restarting"),
            WorkspaceState::Exited => write!(f, "Exited"),
            WorkspaceState::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: Labels,
    pub state: WorkspaceState,
    /// Address reachable from the hub (container IP or service DNS name).
    pub address: Option<String>,
    /// Writable-layer size; only the local engine reports it.
    pub size_rw_bytes: Option<u64>,
}

/// Returned by a launch: enough for the proxy to route to the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceHandle {
    pub id: String,
    pub name: String,
    /// `address:port`
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(WorkspaceState::from_backend("running"), WorkspaceState::Running);
        assert_eq!(WorkspaceState::from_backend("Running"), WorkspaceState::Running);
        assert_eq!(WorkspaceState::from_backend("Pending"), WorkspaceState::Pending);
        assert_eq!(WorkspaceState::from_backend("dead"), WorkspaceState::Exited);
        assert_eq!(WorkspaceState::from_backend("weird"), WorkspaceState::Unknown);
    }

    #[test]
    fn test_memory_gb_rounding() {
        let host = HostResources {
            cpu_count: 8,
            memory_bytes: 16 * 1024 * 1024 * 1024 + 200 * 1024 * 1024,
            gpu_count: 0,
        };
        assert_eq!(host.memory_gb(), 16.2);
    }
}
