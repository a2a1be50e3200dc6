use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use codex_relay::config::RelayConfig;
use codex_relay::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "codex-relay")]
#[command(about = "Anthropic Messages SSE relay for the Codex CLI", version)]
struct Cli {
    #[arg(long, short = 'H', default_value = "0.0.0.0")]
    host: String,

    #[arg(long, short = 'p', default_value_t = 9001)]
    port: u16,

    /// `KEY=VALUE` file with CODEX_* and RELAY_* overrides.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Also append logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = %err, "codex-relay failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    tracing::info!("codex-relay starting");
    let relay = RelayConfig::load(&cli.env_file)?;
    run_server(ServerConfig {
        host: cli.host,
        port: cli.port,
        relay,
    })
    .await?;
    Ok(())
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), std::io::Error> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(tracing_logfmt::builder().layer().with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    Ok(())
}
