//! Filesystem path constants.

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/nbhub/config.yaml";

/// Default data directory for the server state store.
pub const DEFAULT_SERVER_DATA_DIR: &str = "/data/nbhub";

/// Where the GPU count is probed from (one `nvidia` entry per device IRQ).
pub const PROC_IRQ_DIR: &str = "/proc/irq";

/// Default docker CLI binary.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";
