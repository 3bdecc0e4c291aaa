//! Label keys attached to every resource the hub manages.

/// Identifies the hub instance that created a resource. The only filter used by reclamation scans.
pub const LABEL_ORIGIN: &str = "origin";

/// Owning user name.
pub const LABEL_USER: &str = "user";

/// Named-server identifier (empty string = default server).
pub const LABEL_SERVER_NAME: &str = "server-name";

/// Absolute UNIX time after which the workspace may be reclaimed. `"0"` means never.
pub const LABEL_EXPIRATION_TIMESTAMP: &str = "expiration-timestamp-seconds";

/// GPU index list granted to the workspace.
pub const LABEL_NVIDIA_VISIBLE_DEVICES: &str = "nvidia-visible-devices";

/// Pod name, used as the Service selector in cluster mode.
pub const LABEL_POD_NAME: &str = "pod-name";

/// Value stored in the expiration label for workspaces that never expire.
pub const NEVER_EXPIRES: &str = "0";
