use pkg_constants::workspace::FORBIDDEN_USERNAME_CHARS;
use serde::{Deserialize, Serialize};

/// Who a workspace belongs to: hub instance, user and named server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub hub_name: String,
    pub user: String,
    /// Empty for the default server.
    #[serde(default)]
    pub server_name: String,
}

impl Identity {
    pub fn new(hub_name: &str, user: &str, server_name: &str) -> Self {
        Self {
            hub_name: hub_name.to_string(),
            user: normalize_username(user),
            server_name: server_name.to_string(),
        }
    }

    pub fn is_default_server(&self) -> bool {
        self.server_name.is_empty()
    }

    /// Container/pod name: `<prefix>-<user>-hub[-<server>]`.
    pub fn object_name(&self, prefix: &str) -> String {
        if self.is_default_server() {
            format!("{}-{}-hub", prefix, self.user)
        } else {
            format!("{}-{}-hub-{}", prefix, self.user, self.server_name)
        }
    }

    /// One network per user, shared by all of that user's servers.
    pub fn network_name(&self) -> String {
        format!("{}-{}", self.hub_name, self.user)
    }

    /// Named volume; deterministic so a restarted hub finds the same volume.
    pub fn volume_name(&self, prefix: &str) -> String {
        self.object_name(prefix)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_default_server() {
            write!(f, "{}/{}", self.hub_name, self.user)
        } else {
            write!(f, "{}/{}/{}", self.hub_name, self.user, self.server_name)
        }
    }
}

/// Strip characters that break proxy routing from a user name.
pub fn normalize_username(user: &str) -> String {
    user.chars()
        .filter(|c| !FORBIDDEN_USERNAME_CHARS.contains(c))
        .collect()
}
