pub mod config;
pub mod identity;
pub mod labels;
pub mod network;
pub mod options;
pub mod validate;
pub mod workspace;

pub use config::{ExecutionMode, HubConfig};
pub use identity::Identity;
pub use labels::Labels;
pub use network::{NetworkHandle, NetworkInfo, Subnet};
pub use options::{GpuSelection, LaunchOptions};
pub use workspace::{
    HostResources, HubInfo, LaunchSpec, ResourceLimits, VolumeBinding, VolumeInfo, WorkspaceHandle,
    WorkspaceInfo, WorkspaceState,
};
