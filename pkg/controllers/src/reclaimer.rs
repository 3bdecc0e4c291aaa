use pkg_constants::workspace::{REMOVAL_ATTEMPTS, REMOVAL_RETRY_DELAY_SECS};
use pkg_container::{BackendError, ContainerBackend, RemoveOptions, RemoveOutcome};
use pkg_session::{SessionError, SessionProvider};
use pkg_spawner::is_expired;
use pkg_spawner::lifecycle::now_unix;
use pkg_types::config::{ExecutionMode, HubConfig};
use pkg_types::identity::normalize_username;
use pkg_types::labels::{self, Labels};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReclaimError {
    #[error("{policy} is not supported in {mode} mode")]
    UnsupportedInMode {
        policy: &'static str,
        mode: ExecutionMode,
    },

    #[error("could not fetch users from the session layer: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What a sweep did, by resource name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub recreated: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.removed.extend(other.removed);
        self.recreated.extend(other.recreated);
        self.failed.extend(other.failed);
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.recreated.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum ResourceKind {
    Workspace,
    Network,
    Volume,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Workspace => write!(f, "workspace"),
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Volume => write!(f, "volume"),
        }
    }
}

/// Removes resources of deleted users, expired workspaces and workspaces
/// over the storage cap. Every scan is limited to resources labeled with
/// this hub's origin.
pub struct ResourceReclaimer {
    config: Arc<HubConfig>,
    backend: Arc<dyn ContainerBackend>,
    session: Arc<dyn SessionProvider>,
    retry_delay: Duration,
}

impl ResourceReclaimer {
    pub fn new(
        config: Arc<HubConfig>,
        backend: Arc<dyn ContainerBackend>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            config,
            backend,
            session,
            retry_delay: Duration::from_secs(REMOVAL_RETRY_DELAY_SECS),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run every policy on a fixed interval. The first sweep happens one
    /// interval after start.
    pub fn start(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("ResourceReclaimer started (interval={}s)", every.as_secs());
            let mut interval = interval_at(Instant::now() + every, every);
            loop {
                interval.tick().await;
                let report = self.sweep().await;
                if !report.is_empty() {
                    info!(
                        "Sweep finished: {} removed, {} recreated, {} failed",
                        report.removed.len(),
                        report.recreated.len(),
                        report.failed.len()
                    );
                }
            }
        })
    }

    /// One full pass over all policies. Policies that cannot run in the
    /// current mode are skipped; failures are logged and never stop the pass.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let policies = [
            ("orphan", self.sweep_orphans().await),
            ("expiry", self.sweep_expired().await),
            ("storage", self.sweep_oversized().await),
        ];
        for (policy, result) in policies {
            match result {
                Ok(r) => report.merge(r),
                Err(ReclaimError::UnsupportedInMode { .. }) => {
                    debug!("Skipping {} policy in {} mode", policy, self.backend.mode())
                }
                Err(e) => error!("{} policy failed: {}", policy, e),
            }
        }
        report
    }

    fn require_local(&self, policy: &'static str) -> Result<(), ReclaimError> {
        match self.backend.mode() {
            ExecutionMode::Local => Ok(()),
            mode => Err(ReclaimError::UnsupportedInMode { policy, mode }),
        }
    }

    fn selector(&self) -> String {
        labels::origin_selector(&self.config.hub_name)
    }

    /// Live session users, keyed by the normalized name found in owner labels.
    async fn live_users(&self) -> Result<HashMap<String, String>, ReclaimError> {
        Ok(self
            .session
            .list_users()
            .await?
            .into_iter()
            .map(|name| (normalize_username(&name), name))
            .collect())
    }

    /// Remove every workspace, network and volume whose owner no longer
    /// exists in the session layer.
    pub async fn sweep_orphans(&self) -> Result<SweepReport, ReclaimError> {
        self.require_local("orphan cleanup")?;
        let users = self.live_users().await?;
        let is_orphan = |l: &Labels| labels::owner(l).is_some_and(|u| !users.contains_key(u));
        let selector = self.selector();
        let mut report = SweepReport::default();

        // Containers first so their networks have no endpoints left.
        for ws in self.backend.list_workspaces(&selector).await? {
            if is_orphan(&ws.labels) {
                self.remove_into(&mut report, ResourceKind::Workspace, &ws.name).await;
            }
        }

        for net in self.backend.list_networks().await? {
            if net.labels.get(pkg_constants::labels::LABEL_ORIGIN) == Some(&self.config.hub_name)
                && is_orphan(&net.labels)
            {
                if let Err(e) = self
                    .backend
                    .disconnect_network(&net.name, &self.config.hub_name)
                    .await
                {
                    debug!("Disconnecting hub from {}: {}", net.name, e);
                }
                self.remove_into(&mut report, ResourceKind::Network, &net.name).await;
            }
        }

        for volume in self.backend.list_volumes(&selector).await? {
            if is_orphan(&volume.labels) {
                self.remove_into(&mut report, ResourceKind::Volume, &volume.name).await;
            }
        }

        info!(
            "Orphan cleanup: {} removed, {} failed",
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Delete expired workspaces through the session layer, then remove the
    /// container once the session layer has agreed.
    pub async fn sweep_expired(&self) -> Result<SweepReport, ReclaimError> {
        let now = now_unix();
        let mut report = SweepReport::default();
        let expired: Vec<_> = self
            .backend
            .list_workspaces(&self.selector())
            .await?
            .into_iter()
            .filter(|ws| is_expired(&ws.labels, now))
            .collect();
        if expired.is_empty() {
            return Ok(report);
        }
        let users = self.live_users().await?;

        for ws in expired {
            let Some(owner) = labels::owner(&ws.labels) else {
                warn!("Expired workspace {} has no owner label, skipping", ws.name);
                continue;
            };
            let user = users.get(owner).map_or(owner, String::as_str);
            let server = labels::server_name(&ws.labels);
            match self.session.delete_server(user, server, true).await {
                Ok(()) => {
                    info!("Deleting expired workspace {}", ws.name);
                    self.remove_into(&mut report, ResourceKind::Workspace, &ws.name).await;
                }
                Err(e) => {
                    warn!("Session layer did not delete {}: {}", ws.name, e);
                    report.failed.push(ws.name);
                }
            }
        }
        Ok(report)
    }

    /// Replace workspaces whose writable layer exceeds the configured cap
    /// with a fresh container. The named volume is untouched.
    pub async fn sweep_oversized(&self) -> Result<SweepReport, ReclaimError> {
        self.require_local("storage cleanup")?;
        let mut report = SweepReport::default();
        let Some(cap) = self.config.workspace.max_container_size_bytes else {
            return Ok(report);
        };
        let oversized: Vec<_> = self
            .backend
            .list_workspaces(&self.selector())
            .await?
            .into_iter()
            .filter(|ws| ws.size_rw_bytes.is_some_and(|size| size > cap))
            .collect();
        if oversized.is_empty() {
            return Ok(report);
        }
        let users = self.live_users().await?;

        for ws in oversized {
            let size = ws.size_rw_bytes.unwrap_or_default();
            let Some(owner) = labels::owner(&ws.labels) else {
                continue;
            };
            let user = users.get(owner).map_or(owner, String::as_str);
            let server = labels::server_name(&ws.labels);
            info!(
                "Workspace {} uses {} bytes (cap {}), recreating",
                ws.name, size, cap
            );

            if let Err(e) = self.session.stop_server(user, server).await {
                warn!("Session layer did not stop {}: {}", ws.name, e);
                report.failed.push(ws.name);
                continue;
            }
            if !self.remove_with_retry(ResourceKind::Workspace, &ws.name).await {
                report.failed.push(ws.name);
                continue;
            }
            match self.session.create_server(user, server).await {
                Ok(()) => report.recreated.push(ws.name),
                Err(e) => {
                    warn!("Session layer did not recreate {}: {}", ws.name, e);
                    report.failed.push(ws.name);
                }
            }
        }
        Ok(report)
    }

    async fn remove_into(&self, report: &mut SweepReport, kind: ResourceKind, name: &str) {
        if self.remove_with_retry(kind, name).await {
            report.removed.push(name.to_string());
        } else {
            report.failed.push(name.to_string());
        }
    }

    async fn remove_once(&self, kind: ResourceKind, name: &str) -> Result<RemoveOutcome, BackendError> {
        match kind {
            ResourceKind::Workspace => {
                self.backend
                    .remove_workspace(name, RemoveOptions::forced())
                    .await
            }
            ResourceKind::Network => self.backend.remove_network(name).await,
            ResourceKind::Volume => self.backend.remove_volume(name).await,
        }
    }

    /// Bounded retry; `NotFound` counts as removed.
    async fn remove_with_retry(&self, kind: ResourceKind, name: &str) -> bool {
        for attempt in 1..=REMOVAL_ATTEMPTS {
            match self.remove_once(kind, name).await {
                Ok(outcome) => {
                    info!("Removed {} {} ({:?})", kind, name, outcome);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Removing {} {} failed (attempt {}/{}): {}",
                        kind, name, attempt, REMOVAL_ATTEMPTS, e
                    );
                    if attempt < REMOVAL_ATTEMPTS {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }
        error!("Giving up on {} {}", kind, name);
        false
    }
}
