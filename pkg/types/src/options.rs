use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-chosen launch configuration for one workspace.
/// Every field is optional; absent means "use the configured default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Number of CPUs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<f64>,
    /// Memory limit, in GB when given as a bare number (`"8"`, `"8GB"`, `"512mb"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,
    /// Storage limit, same format as `mem_limit`. Best effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_to_live: Option<u32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shm_size: Option<String>,
    /// Empty/absent, `"all"`, or a comma-separated GPU index list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<String>,
    /// Mount a named persistent volume at the workspace mount path.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mount_volume: bool,
    /// Force a fresh container even when one already exists.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub update: bool,
}

impl LaunchOptions {
    /// Parsed GPU selection; `None` when no GPU was requested.
    pub fn gpu_selection(&self) -> Result<Option<GpuSelection>> {
        match self.gpus.as_deref() {
            Some(raw) => GpuSelection::parse(raw),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuSelection {
    All,
    Indices(Vec<u32>),
}

impl GpuSelection {
    /// Parse a raw selection. Blank input means no GPU.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if raw.eq_ignore_ascii_case("all") {
            return Ok(Some(GpuSelection::All));
        }
        let mut indices = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            match part.parse::<u32>() {
                Ok(i) => indices.push(i),
                Err(_) => bail!("invalid GPU index '{}' in selection '{}'", part, raw),
            }
        }
        Ok(Some(GpuSelection::Indices(indices)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_selection_parse() {
        assert_eq!(GpuSelection::parse("").unwrap(), None);
        assert_eq!(GpuSelection::parse("  ").unwrap(), None);
        assert_eq!(GpuSelection::parse("all").unwrap(), Some(GpuSelection::All));
        assert_eq!(
            GpuSelection::parse("0, 2").unwrap(),
            Some(GpuSelection::Indices(vec![0, 2]))
        );
        assert!(GpuSelection::parse("0,x").is_err());
    }

    #[test]
    fn test_empty_options_serialize_to_empty_object() {
        let json = serde_json::to_string(&LaunchOptions::default()).unwrap();
        assert_eq!(json, "{}");
        let back: LaunchOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(back, LaunchOptions::default());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let opts: LaunchOptions =
            serde_json::from_str(r#"{"cpu_limit": 4, "legacy_field": true}"#).unwrap();
        assert_eq!(opts.cpu_limit, Some(4.0));
    }
}
