//! Time-to-live bookkeeping on top of the expiration label.

use pkg_constants::labels::NEVER_EXPIRES;
use pkg_constants::workspace::SECONDS_PER_DAY;
use pkg_types::labels::{self, Labels};
use pkg_types::{LaunchOptions, WorkspaceState};
use serde::{Deserialize, Serialize};

/// Current UNIX time in seconds, with sub-second precision.
pub fn now_unix() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Expiration label value for a launch at `now`.
pub fn expiration_label(days_to_live: Option<u32>, now: f64) -> String {
    match days_to_live {
        Some(days) if days > 0 => (now + f64::from(days) * SECONDS_PER_DAY as f64).to_string(),
        _ => NEVER_EXPIRES.to_string(),
    }
}

/// Seconds until expiry, rounded up. `None` means the workspace never expires;
/// a negative value means it already has.
pub fn remaining_seconds(labels: &Labels, now: f64) -> Option<i64> {
    let expires_at = labels::expiration_timestamp(labels);
    if expires_at == 0.0 {
        return None;
    }
    Some((expires_at - now).ceil() as i64)
}

pub fn remaining_days(seconds: i64) -> i64 {
    (seconds as f64 / SECONDS_PER_DAY as f64).ceil() as i64
}

pub fn is_expired(labels: &Labels, now: f64) -> bool {
    matches!(remaining_seconds(labels, now), Some(s) if s < 0)
}

/// Whether the configured image differs from the one a workspace runs.
/// Only the last path segment counts, so `org/ws:1` and `ws:1` match.
pub fn update_available(configured_image: &str, workspace_image: &str) -> bool {
    last_segment(configured_image) != last_segment(workspace_image)
}

fn last_segment(image: &str) -> &str {
    image.rsplit('/').next().unwrap_or(image)
}

/// What a user sees about one of their workspaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    #[serde(flatten)]
    pub options: LaunchOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_lifetime_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_lifetime_days: Option<i64>,
    #[serde(default)]
    pub update_available: bool,
    /// `None` when no workspace exists right now.
    #[serde(default)]
    pub state: Option<WorkspaceState>,
}

impl WorkspaceStatus {
    pub fn new(saved: LaunchOptions, workspace_labels: &Labels, now: f64) -> Self {
        let remaining = remaining_seconds(workspace_labels, now);
        Self {
            options: saved,
            remaining_lifetime_seconds: remaining,
            remaining_lifetime_days: remaining.map(remaining_days),
            update_available: false,
            state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::labels::LABEL_EXPIRATION_TIMESTAMP;

    fn expiring_at(ts: f64) -> Labels {
        let mut labels = Labels::new();
        labels.insert(LABEL_EXPIRATION_TIMESTAMP.to_string(), ts.to_string());
        labels
    }

    #[test]
    fn test_zero_never_expires() {
        let labels = expiring_at(0.0);
        for now in [0.0, 1.0, 1e9, 4e9] {
            assert_eq!(remaining_seconds(&labels, now), None);
        }
        assert_eq!(remaining_seconds(&Labels::new(), 1e9), None);
    }

    #[test]
    fn test_past_and_future() {
        let now = 1_700_000_000.0;
        assert_eq!(remaining_seconds(&expiring_at(now - 10.0), now), Some(-10));
        assert!(is_expired(&expiring_at(now - 10.0), now));
        assert_eq!(remaining_seconds(&expiring_at(now + 10.0), now), Some(10));
        assert!(!is_expired(&expiring_at(now + 10.0), now));
    }

    #[test]
    fn test_remaining_rounds_up() {
        let now = 1_700_000_000.0;
        assert_eq!(remaining_seconds(&expiring_at(now + 0.2), now), Some(1));
        assert_eq!(remaining_days(1), 1);
        assert_eq!(remaining_days(86_400), 1);
        assert_eq!(remaining_days(86_401), 2);
    }

    #[test]
    fn test_expiration_label() {
        assert_eq!(expiration_label(None, 100.0), "0");
        assert_eq!(expiration_label(Some(0), 100.0), "0");
        assert_eq!(expiration_label(Some(2), 100.0), "172900");
    }

    #[test]
    fn test_update_available() {
        assert!(!update_available("mltooling/ml-workspace:0.8.7", "ml-workspace:0.8.7"));
        assert!(update_available("mltooling/ml-workspace:0.8.7", "ml-workspace:0.8.6"));
        assert!(!update_available("ws:1", "registry.local:5000/team/ws:1"));
    }

    #[test]
    fn test_status_view_json() {
        let now = 1_700_000_000.0;
        let saved = LaunchOptions {
            cpu_limit: Some(2.0),
            ..Default::default()
        };
        let status = WorkspaceStatus::new(saved, &expiring_at(now + 90_000.0), now);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["cpu_limit"], 2.0);
        assert_eq!(json["remaining_lifetime_seconds"], 90_000);
        assert_eq!(json["remaining_lifetime_days"], 2);
        assert_eq!(json["update_available"], false);
    }
}
