use pkg_constants::labels::{LABEL_EXPIRATION_TIMESTAMP, LABEL_NVIDIA_VISIBLE_DEVICES};
use pkg_constants::workspace::{
    ENV_DENYLIST, ENV_HUB_API_URL, ENV_MAX_NUM_THREADS, ENV_NVIDIA_VISIBLE_DEVICES,
    ENV_SSH_JUMPHOST_TARGET,
};
use pkg_types::config::HubConfig;
use pkg_types::labels;
use pkg_types::validate::validate_options;
use pkg_types::{HostResources, Identity, LaunchOptions, LaunchSpec, ResourceLimits, VolumeBinding};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::SpawnError;
use crate::lifecycle::expiration_label;
use crate::units::{clamp_cpus, nano_cpus, normalize_size};

/// Turns launch options into a concrete `LaunchSpec`. Pure: no backend calls.
pub struct LaunchPlanner {
    config: Arc<HubConfig>,
    /// Whether the backend gives each user a private network.
    networks: bool,
}

impl LaunchPlanner {
    pub fn new(config: Arc<HubConfig>, networks: bool) -> Self {
        Self { config, networks }
    }

    pub fn plan_launch_at(
        &self,
        identity: &Identity,
        options: &LaunchOptions,
        host: &HostResources,
        now: f64,
    ) -> Result<LaunchSpec, SpawnError> {
        validate_options(options).map_err(|e| SpawnError::InvalidOptions(e.to_string()))?;
        let ws = &self.config.workspace;
        let name = identity.object_name(&ws.name_prefix);

        let gpus = options
            .gpu_selection()
            .map_err(|e| SpawnError::InvalidOptions(e.to_string()))?
            .and(options.gpus.as_deref().map(|g| g.trim().to_string()));

        let mut spec_labels = labels::workspace_labels(identity);
        spec_labels.insert(
            LABEL_EXPIRATION_TIMESTAMP.to_string(),
            expiration_label(options.days_to_live, now),
        );
        if let Some(devices) = &gpus {
            spec_labels.insert(LABEL_NVIDIA_VISIBLE_DEVICES.to_string(), devices.clone());
        }

        let cpus = options.cpu_limit.map(|requested| {
            let clamped = clamp_cpus(requested, host.cpu_count);
            if clamped < requested {
                warn!(
                    "{}: CPU limit {} exceeds host capacity, clamped to {}",
                    identity, requested, clamped
                );
            }
            clamped
        });
        let limits = ResourceLimits {
            cpus,
            nano_cpus: cpus.map(nano_cpus),
            memory: options
                .mem_limit
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .map(normalize_size)
                .transpose()?,
            storage: options
                .storage_limit
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(normalize_size)
                .transpose()?,
            shm_size: Some(
                options
                    .shm_size
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| ws.shm_size.clone()),
            ),
        };

        let env = self.compose_env(identity, options, &name, gpus.as_deref());

        let volume = options.mount_volume.then(|| VolumeBinding {
            name: identity.volume_name(&ws.name_prefix),
            mount_path: ws.mount_path.clone(),
        });

        let spec = LaunchSpec {
            identity: identity.clone(),
            name,
            image: options
                .image
                .clone()
                .filter(|i| !i.trim().is_empty())
                .unwrap_or_else(|| ws.image.clone()),
            network: self.networks.then(|| identity.network_name()),
            labels: spec_labels,
            env,
            limits,
            gpus,
            volume,
            port: ws.port,
            fresh: options.update,
        };
        debug!("Planned launch for {}: {:?}", identity, spec);
        Ok(spec)
    }

    /// Configured defaults, then user overrides minus the denylist, then the
    /// variables the hub manages itself.
    fn compose_env(
        &self,
        identity: &Identity,
        options: &LaunchOptions,
        object_name: &str,
        gpus: Option<&str>,
    ) -> BTreeMap<String, String> {
        let mut env = self.config.workspace.environment.clone();

        for (key, value) in &options.env {
            if ENV_DENYLIST.iter().any(|d| d.eq_ignore_ascii_case(key)) {
                warn!("{}: ignoring managed environment variable {}", identity, key);
                continue;
            }
            env.insert(key.clone(), value.clone());
        }

        if let Some(devices) = gpus {
            env.insert(ENV_NVIDIA_VISIBLE_DEVICES.to_string(), devices.to_string());
        }
        if let Some(cpu) = options.cpu_limit {
            env.insert(ENV_MAX_NUM_THREADS.to_string(), cpu.to_string());
        }
        env.insert(ENV_SSH_JUMPHOST_TARGET.to_string(), object_name.to_string());
        env.insert(
            ENV_HUB_API_URL.to_string(),
            replace_host(&self.config.session.api_url, &self.config.hub_name),
        );
        env
    }
}

/// Swap the host of `url` for `host`, keeping scheme, port and path.
/// Workspaces reach the hub by its container name, which survives hub recreation.
pub fn replace_host(url: &str, host: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let end = rest.find([':', '/']).unwrap_or(rest.len());
    let replaced = format!("{}{}", host, &rest[end..]);
    match scheme {
        Some(scheme) => format!("{}://{}", scheme, replaced),
        None => replaced,
    }
}
