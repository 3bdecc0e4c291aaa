use clap::{Parser, Subcommand, ValueEnum};
use pkg_constants::network::DEFAULT_API_ADDR;
use pkg_controllers::SweepReport;
use pkg_spawner::WorkspaceStatus;
use pkg_types::HubInfo;
use serde::de::DeserializeOwned;
use tracing::info;

#[derive(Parser)]
#[command(name = "nbhubctl", about = "CLI tool for the notebook hub")]
struct Cli {
    /// Hub API endpoint
    #[arg(long, env = "NBHUB_URL", default_value = DEFAULT_API_ADDR)]
    server: String,

    /// Bearer token (admin token or a session token)
    #[arg(long, env = "NBHUB_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show hub information
    Info,
    /// Show the status of a user's workspace
    Status {
        user: String,
        /// Named server; the default server when omitted
        #[arg(long)]
        server: Option<String>,
    },
    /// Run a cleanup policy now
    Cleanup {
        #[arg(value_enum)]
        target: CleanupTarget,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum CleanupTarget {
    /// Resources of users that no longer exist
    Users,
    /// Workspaces past their lifetime
    Expired,
    /// Workspaces over the storage cap
    Storage,
    All,
}

impl CleanupTarget {
    fn routes(self) -> &'static [&'static str] {
        match self {
            CleanupTarget::Users => &["users"],
            CleanupTarget::Expired => &["expired"],
            CleanupTarget::Storage => &["storage"],
            CleanupTarget::All => &["users", "expired", "storage"],
        }
    }
}

struct HubClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl HubClient {
    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{}", self.base, path);
        info!("GET {}", url);
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("server returned {}: {}", status, body.trim());
        }
        Ok(resp.json().await?)
    }
}

fn print_report(policy: &str, report: &SweepReport) {
    println!(
        "{:<8} removed={} recreated={} failed={}",
        policy,
        report.removed.len(),
        report.recreated.len(),
        report.failed.len()
    );
    for name in &report.removed {
        println!("  - removed   {}", name);
    }
    for name in &report.recreated {
        println!("  - recreated {}", name);
    }
    for name in &report.failed {
        println!("  - failed    {}", name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let client = HubClient {
        http: reqwest::Client::new(),
        base: cli.server.trim_end_matches('/').to_string(),
        token: cli.token,
    };

    match &cli.command {
        Commands::Info => {
            let info: HubInfo = client.get("/api/v1/hub/info").await?;
            println!("Hub:            {}", info.hub_name);
            println!("Mode:           {}", info.mode);
            println!(
                "Host:           {} CPUs, {:.1}GB memory, {} GPUs",
                info.host.cpu_count,
                info.host.memory_gb(),
                info.host.gpu_count
            );
            println!("Default image:  {}", info.default_image);
            for image in &info.images {
                println!("  - {}", image);
            }
        }
        Commands::Status { user, server } => {
            let path = match server {
                Some(server) => format!("/api/v1/users/{}/servers/{}/status", user, server),
                None => format!("/api/v1/users/{}/server/status", user),
            };
            let status: WorkspaceStatus = client.get(&path).await?;
            let state = status
                .state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("State:            {}", state);
            match status.remaining_lifetime_seconds {
                Some(seconds) => println!(
                    "Remaining:        {}s (~{} days)",
                    seconds,
                    status.remaining_lifetime_days.unwrap_or_default()
                ),
                None => println!("Remaining:        unlimited"),
            }
            println!("Update available: {}", status.update_available);
            if let Some(image) = &status.options.image {
                println!("Image:            {}", image);
            }
            if let Some(cpu) = status.options.cpu_limit {
                println!("CPU limit:        {}", cpu);
            }
            if let Some(mem) = &status.options.mem_limit {
                println!("Memory limit:     {}", mem);
            }
        }
        Commands::Cleanup { target } => {
            for policy in target.routes() {
                let report: SweepReport = client.get(&format!("/api/v1/cleanup/{}", policy)).await?;
                print_report(policy, &report);
            }
        }
    }

    Ok(())
}
