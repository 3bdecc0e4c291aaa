pub mod backend;
pub mod docker;
pub mod error;
pub mod kubernetes;
pub mod memory;

pub use backend::{
    ConnectOutcome, ContainerBackend, CreateOutcome, DisconnectOutcome, RemoveOptions,
    RemoveOutcome,
};
pub use docker::DockerBackend;
pub use error::{BackendError, BackendResult};
pub use kubernetes::KubernetesBackend;
pub use memory::{MemoryBackend, NetworkRace};
