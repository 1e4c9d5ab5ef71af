use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use bitgrid_core::config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(
    name = "bitgrid",
    about = "Shared bitmap canvas with a real-time WebSocket hub",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the grid server
    Serve {
        /// Port to listen on (default: 6060)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List sessions connected to a running server
    Clients {
        /// Base URL of the server (default: local gateway)
        #[arg(long)]
        url: Option<String>,
    },

    /// Disconnect a session and ban its address
    Kick {
        /// Session id as shown by `clients`
        client_id: String,

        /// Ban length in seconds (0 disconnects without a ban)
        #[arg(short, long, default_value_t = 0)]
        duration: i64,

        /// Base URL of the server (default: local gateway)
        #[arg(long)]
        url: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".into())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![level];
        directives.extend(logging.filters.iter().cloned());
        EnvFilter::new(directives.join(","))
    });

    let writer = match logging.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn base_url(url: Option<String>, config: &Config) -> String {
    url.map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.gateway_port()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)?;

    init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("invalid configuration in {}", config_path.display());
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            let grid = bitgrid_gateway::open_grid(&config).await?;
            tracing::info!(
                size = grid.size(),
                storage = ?config.storage_kind(),
                "Grid ready"
            );

            let state = bitgrid_gateway::GatewayState::new(Arc::new(config), grid);

            #[cfg(feature = "metrics")]
            let state = state.with_metrics(bitgrid_gateway::metrics::install_prometheus_recorder()?);

            tracing::info!("Starting bitgrid on port {port}");
            bitgrid_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Clients { url } => {
            let url = format!("{}/clients", base_url(url, &config));
            let resp = reqwest::get(&url).await?.error_for_status()?;
            let clients: Vec<serde_json::Value> = resp.json().await?;
            if clients.is_empty() {
                println!("No connected clients");
                return Ok(());
            }
            println!("{:<36}  {:<39}  {:>7}  CONNECTED", "ID", "IP", "ACTIONS");
            for client in &clients {
                println!(
                    "{:<36}  {:<39}  {:>7}  {}",
                    client["id"].as_str().unwrap_or("-"),
                    client["ip"].as_str().unwrap_or("-"),
                    client["actionCount"].as_u64().unwrap_or(0),
                    client["connectedAt"].as_str().unwrap_or("-"),
                );
            }
        }
        Commands::Kick {
            client_id,
            duration,
            url,
        } => {
            let url = format!("{}/kick", base_url(url, &config));
            let duration = duration.to_string();
            let resp = reqwest::Client::new()
                .post(&url)
                .query(&[
                    ("clientId", client_id.as_str()),
                    ("duration", duration.as_str()),
                ])
                .send()
                .await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                anyhow::bail!("kick failed ({status}): {body}");
            }
            println!("{body}");
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
        },
    }

    Ok(())
}
