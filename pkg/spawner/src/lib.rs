pub mod error;
pub mod host;
pub mod lifecycle;
pub mod planner;
pub mod spawner;
pub mod units;

pub use error::SpawnError;
pub use host::detect_host_resources;
pub use lifecycle::{WorkspaceStatus, is_expired, remaining_seconds};
pub use planner::LaunchPlanner;
pub use spawner::{Spawner, WorkspaceSpawner};
