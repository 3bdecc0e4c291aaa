//! Label/metadata model shared by every managed resource.

use pkg_constants::labels::{
    LABEL_EXPIRATION_TIMESTAMP, LABEL_ORIGIN, LABEL_SERVER_NAME, LABEL_USER,
};
use std::collections::BTreeMap;

use crate::identity::Identity;

/// Labels are kept ordered so backend calls and test assertions are deterministic.
pub type Labels = BTreeMap<String, String>;

/// The minimal label set: only the origin hub.
pub fn origin_labels(hub_name: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(LABEL_ORIGIN.to_string(), hub_name.to_string());
    labels
}

/// Labels for workspace-level resources (container/pod, volume, network).
pub fn workspace_labels(identity: &Identity) -> Labels {
    let mut labels = origin_labels(&identity.hub_name);
    labels.insert(LABEL_USER.to_string(), identity.user.clone());
    labels.insert(LABEL_SERVER_NAME.to_string(), identity.server_name.clone());
    labels
}

/// `origin=<hub>` selector used by every reclamation scan.
pub fn origin_selector(hub_name: &str) -> String {
    format!("{}={}", LABEL_ORIGIN, hub_name)
}

/// Expiration timestamp in UNIX seconds. Absent or unparseable means `0` (never expires).
pub fn expiration_timestamp(labels: &Labels) -> f64 {
    labels
        .get(LABEL_EXPIRATION_TIMESTAMP)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub fn owner(labels: &Labels) -> Option<&str> {
    labels.get(LABEL_USER).map(|s| s.as_str())
}

/// Named-server label; the default server is the empty string.
pub fn server_name(labels: &Labels) -> &str {
    labels
        .get(LABEL_SERVER_NAME)
        .map(|s| s.as_str())
        .unwrap_or("")
}

/// Check a `key=value[,key=value]` selector against a label set.
/// A bare `key` term only requires the key to be present.
pub fn matches_selector(labels: &Labels, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(|v| v.as_str()) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

/// Render labels as `key=value` pairs, e.g. for `--label` flags.
pub fn to_pairs(labels: &Labels) -> Vec<String> {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_labels_carry_identity() {
        let identity = Identity::new("hub", "alice", "gpu");
        let labels = workspace_labels(&identity);
        assert_eq!(labels.get(LABEL_ORIGIN).unwrap(), "hub");
        assert_eq!(owner(&labels), Some("alice"));
        assert_eq!(server_name(&labels), "gpu");
    }

    #[test]
    fn test_expiration_absent_or_garbage_is_zero() {
        let mut labels = origin_labels("hub");
        assert_eq!(expiration_timestamp(&labels), 0.0);
        labels.insert(LABEL_EXPIRATION_TIMESTAMP.into(), "soon".into());
        assert_eq!(expiration_timestamp(&labels), 0.0);
        labels.insert(LABEL_EXPIRATION_TIMESTAMP.into(), "1700000000.5".into());
        assert_eq!(expiration_timestamp(&labels), 1_700_000_000.5);
    }

    #[test]
    fn test_matches_selector() {
        let labels = workspace_labels(&Identity::new("hub", "bob", ""));
        assert!(matches_selector(&labels, "origin=hub"));
        assert!(matches_selector(&labels, "origin=hub,user=bob"));
        assert!(matches_selector(&labels, "server-name"));
        assert!(!matches_selector(&labels, "origin=other"));
        assert!(!matches_selector(&labels, "origin=hub,user=alice"));
    }

    #[test]
    fn test_origin_selector() {
        assert_eq!(origin_selector("nbhub"), "origin=nbhub");
    }
}
