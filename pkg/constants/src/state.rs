//! State store constants.

/// Key prefix under which per-workspace launch state is stored.
pub const WORKSPACE_STATE_PREFIX: &str = "/registry/workspaces/";

/// Key segment used for the default (unnamed) server.
pub const DEFAULT_SERVER_KEY: &str = "_default";
