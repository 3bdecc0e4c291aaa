use clap::{Parser, ValueEnum};
use pkg_api::AppState;
use pkg_api::server::serve;
use pkg_constants::paths::DEFAULT_SERVER_CONFIG;
use pkg_container::{ContainerBackend, DockerBackend, KubernetesBackend, MemoryBackend};
use pkg_controllers::ResourceReclaimer;
use pkg_session::{HubApiClient, SessionProvider};
use pkg_spawner::{WorkspaceSpawner, detect_host_resources};
use pkg_state::{StateStore, WorkspaceStateBridge};
use pkg_types::config::{ExecutionMode, HubConfig, HubConfigFile, load_config_file};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "nbhub-server", about = "Multi-tenant notebook hub control plane")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, env = "NBHUB_CONFIG", default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for the state store
    #[arg(long)]
    data_dir: Option<String>,

    /// Backend to drive: local or kubernetes
    #[arg(long)]
    mode: Option<ExecutionMode>,

    /// Token that grants admin access to the API
    #[arg(long, env = "NBHUB_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Keep workspaces in memory instead of talking to a real backend
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn build_backend(
    config: &HubConfig,
    dry_run: bool,
) -> anyhow::Result<Arc<dyn ContainerBackend>> {
    let backend: Arc<dyn ContainerBackend> = match (config.mode, dry_run) {
        (ExecutionMode::Local, true) => Arc::new(MemoryBackend::local()),
        (ExecutionMode::Kubernetes, true) => Arc::new(MemoryBackend::cluster()),
        (ExecutionMode::Local, false) => Arc::new(
            DockerBackend::detect(&config.backend.docker_binary, config.backend.timeout).await?,
        ),
        (ExecutionMode::Kubernetes, false) => Arc::new(
            KubernetesBackend::connect(
                &config.backend.namespace,
                &config.backend.volume_capacity,
                config.backend.timeout,
            )
            .await?,
        ),
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Merge: CLI args > config file > defaults
    let mut file: HubConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);
    file.port = cli.port.or(file.port);
    file.data_dir = cli.data_dir.or(file.data_dir);
    file.execution_mode = cli.mode.or(file.execution_mode);
    file.admin_token = cli.admin_token.or(file.admin_token);
    let config = Arc::new(HubConfig::from_file(file));

    info!("Starting nbhub-server");
    info!("  Hub:       {}", config.hub_name);
    info!("  Mode:      {}", config.mode);
    info!("  Port:      {}", config.port);
    info!("  Data dir:  {}", config.data_dir);
    if config.admin_token.is_none() {
        warn!("No admin token configured; admin routes need a session-layer admin");
    }

    let backend = build_backend(&config, cli.dry_run).await?;
    let spawner = Arc::new(WorkspaceSpawner::new(config.clone(), backend.clone()));
    if let Err(e) = spawner.reconnect_hub_networks().await {
        warn!("Could not reattach hub to workspace networks: {}", e);
    }

    let store = StateStore::open(&config.data_dir).await?;
    let session: Arc<dyn SessionProvider> = Arc::new(HubApiClient::from_config(&config.session)?);
    let reclaimer = Arc::new(ResourceReclaimer::new(
        config.clone(),
        backend,
        session.clone(),
    ));
    match config.cleanup_interval {
        Some(every) => {
            reclaimer.clone().start(every);
        }
        None => info!("Periodic cleanup disabled"),
    }

    let state = AppState {
        config: config.clone(),
        host: detect_host_resources(),
        spawner,
        session,
        bridge: WorkspaceStateBridge::new(store),
        reclaimer,
    };
    serve(SocketAddr::from(([0, 0, 0, 0], config.port)), state).await
}
