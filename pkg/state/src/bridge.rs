//! Persistence of the last launch options per (user, server).
//!
//! Nothing else about a workspace is stored: its concrete state is always
//! re-read from the backend through its labels.

use pkg_constants::state::{DEFAULT_SERVER_KEY, WORKSPACE_STATE_PREFIX};
use pkg_types::{Identity, LaunchOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::StateStore;

/// The stored blob. Unknown keys are ignored so older or newer hubs can
/// share a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_user_options: Option<LaunchOptions>,
}

impl StateBlob {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a stored blob. Bytes that are not a JSON object yield an empty blob.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Ignoring unreadable workspace state: {}", e);
                Self::default()
            }
        }
    }
}

/// Capture the options most recently applied. Last write wins.
pub fn save(options: &LaunchOptions) -> StateBlob {
    StateBlob {
        saved_user_options: Some(options.clone()),
    }
}

/// The saved options, or defaults for a blob that predates them.
pub fn restore(blob: &StateBlob) -> LaunchOptions {
    blob.saved_user_options.clone().unwrap_or_default()
}

/// Store key for an identity: `/registry/workspaces/<user>/<server>`.
pub fn state_key(identity: &Identity) -> String {
    let server = if identity.is_default_server() {
        DEFAULT_SERVER_KEY
    } else {
        identity.server_name.as_str()
    };
    format!("{}{}/{}", WORKSPACE_STATE_PREFIX, identity.user, server)
}

/// Reads and writes launch options through the state store.
#[derive(Clone)]
pub struct WorkspaceStateBridge {
    store: StateStore,
}

impl WorkspaceStateBridge {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub async fn record(&self, identity: &Identity, options: &LaunchOptions) -> anyhow::Result<()> {
        let key = state_key(identity);
        self.store.put(&key, &save(options).to_bytes()?).await?;
        debug!("Saved launch options for {}", identity);
        Ok(())
    }

    pub async fn load(&self, identity: &Identity) -> anyhow::Result<LaunchOptions> {
        let blob = match self.store.get(&state_key(identity)).await? {
            Some(bytes) => StateBlob::from_bytes(&bytes),
            None => StateBlob::default(),
        };
        Ok(restore(&blob))
    }

    pub async fn forget(&self, identity: &Identity) -> anyhow::Result<()> {
        self.store.delete(&state_key(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn options() -> LaunchOptions {
        LaunchOptions {
            image: Some("mltooling/ml-workspace-gpu:0.8.7".into()),
            cpu_limit: Some(2.5),
            mem_limit: Some("8G".into()),
            days_to_live: Some(7),
            env: BTreeMap::from([("FOO".to_string(), "bar".to_string())]),
            gpus: Some("0,1".into()),
            mount_volume: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_restore_saved() {
        let blob = StateBlob::from_bytes(&save(&options()).to_bytes().unwrap());
        assert_eq!(restore(&blob), options());
    }

    #[test]
    fn test_missing_or_garbage_restores_defaults() {
        assert_eq!(restore(&StateBlob::default()), LaunchOptions::default());
        assert_eq!(restore(&StateBlob::from_bytes(b"{}")), LaunchOptions::default());
        assert_eq!(restore(&StateBlob::from_bytes(b"not json")), LaunchOptions::default());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let raw = br#"{"saved_user_options":{"cpu_limit":4.0},"profile":"legacy"}"#;
        let restored = restore(&StateBlob::from_bytes(raw));
        assert_eq!(restored.cpu_limit, Some(4.0));
    }

    #[test]
    fn test_state_key() {
        assert_eq!(
            state_key(&Identity::new("nbhub", "alice", "")),
            "/registry/workspaces/alice/_default"
        );
        assert_eq!(
            state_key(&Identity::new("nbhub", "alice", "gpu")),
            "/registry/workspaces/alice/gpu"
        );
    }

    #[tokio::test]
    async fn test_bridge_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        let alice = Identity::new("nbhub", "alice", "");
        let bob = Identity::new("nbhub", "bob", "");

        let store = StateStore::open(&path).await.unwrap();
        let bridge = WorkspaceStateBridge::new(store.clone());
        bridge.record(&alice, &LaunchOptions::default()).await.unwrap();
        bridge.record(&alice, &options()).await.unwrap();
        store.close().await.unwrap();

        let bridge = WorkspaceStateBridge::new(StateStore::open(&path).await.unwrap());
        assert_eq!(bridge.load(&alice).await.unwrap(), options());
        assert_eq!(bridge.load(&bob).await.unwrap(), LaunchOptions::default());

        bridge.forget(&alice).await.unwrap();
        assert_eq!(bridge.load(&alice).await.unwrap(), LaunchOptions::default());
    }
}
