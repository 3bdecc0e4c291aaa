//! Workspace defaults and the environment variables the hub manages itself.

/// Default hub instance name (also the hub's container name on the local engine).
pub const DEFAULT_HUB_NAME: &str = "nbhub";

/// Default workspace image.
pub const DEFAULT_IMAGE: &str = "mltooling/ml-workspace:0.8.7";

/// Port the notebook server listens on inside a workspace.
pub const DEFAULT_WORKSPACE_PORT: u16 = 8080;

/// Prefix of every workspace object name.
pub const DEFAULT_NAME_PREFIX: &str = "ws";

/// Default shared memory size for local containers.
pub const DEFAULT_SHM_SIZE: &str = "256m";

/// Mount point of the named workspace volume.
pub const DEFAULT_MOUNT_PATH: &str = "/workspace";

/// Default reclaimer interval.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: i64 = 3600;

/// Default timeout for backend calls that create or destroy resources.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 600;

/// Default timeout for one request to the session API.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;

/// Default PVC size in cluster mode.
pub const DEFAULT_VOLUME_CAPACITY: &str = "10Gi";

/// Default namespace in cluster mode.
pub const DEFAULT_NAMESPACE: &str = "nbhub";

/// Attempts per resource removal during a cleanup sweep.
pub const REMOVAL_ATTEMPTS: u32 = 3;

/// Pause between failed removal attempts.
pub const REMOVAL_RETRY_DELAY_SECS: u64 = 3;

/// Seconds per day, used for days-to-live.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Characters stripped from user names before any resource name is derived.
pub const FORBIDDEN_USERNAME_CHARS: &[char] = &[' ', ',', ';', '.'];

pub const ENV_NVIDIA_VISIBLE_DEVICES: &str = "NVIDIA_VISIBLE_DEVICES";
pub const ENV_MAX_NUM_THREADS: &str = "MAX_NUM_THREADS";
pub const ENV_SSH_JUMPHOST_TARGET: &str = "SSH_JUMPHOST_TARGET";
pub const ENV_HUB_API_URL: &str = "HUB_API_URL";

/// Variables a user may never override.
pub const ENV_DENYLIST: &[&str] = &[
    "AUTHENTICATE_VIA_JUPYTER",
    "SHUTDOWN_INACTIVE_KERNELS",
    ENV_NVIDIA_VISIBLE_DEVICES,
    ENV_MAX_NUM_THREADS,
    ENV_SSH_JUMPHOST_TARGET,
    ENV_HUB_API_URL,
];

/// Default environment for every workspace.
pub const DEFAULT_ENVIRONMENT: &[(&str, &str)] = &[
    ("AUTHENTICATE_VIA_JUPYTER", "true"),
    ("SHUTDOWN_INACTIVE_KERNELS", "true"),
];
