use pkg_container::BackendError;
use pkg_network::AllocationError;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid launch options: {0}")]
    InvalidOptions(String),

    /// Connecting the hub to the workspace network failed for a reason other
    /// than "already connected".
    #[error("could not connect hub to network {network}: {source}")]
    HubConnect {
        network: String,
        #[source]
        source: BackendError,
    },
}

impl SpawnError {
    pub fn is_unavailable(&self) -> bool {
        match self {
            SpawnError::Backend(e) | SpawnError::HubConnect { source: e, .. } => e.is_unavailable(),
            SpawnError::Allocation(AllocationError::Backend(e)) => e.is_unavailable(),
            _ => false,
        }
    }
}
