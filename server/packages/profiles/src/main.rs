use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};
use codex_relay_profiles::profile::{Profile, DEFAULT_RELAY_URL};
use codex_relay_profiles::settings::{apply_profile, SettingsLocations};
use codex_relay_profiles::{relay_is_healthy, ProfileError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "cc-env-switch")]
#[command(about = "Switch Claude Code between native, GLM, and codex-relay backends", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Extra `KEY=VALUE` pairs merged into the settings `env` block.
    #[arg(long = "env", global = true, value_parser = parse_env_pair)]
    env: Vec<(String, String)>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Native Anthropic subscription.
    Claude,
    /// z.ai GLM models.
    Glm,
    /// A local codex-relay.
    Relay {
        /// Switch even when the relay health check fails.
        #[arg(long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_RELAY_URL)]
        url: String,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ProfileError> {
    init_logging();
    let cli = Cli::parse();
    let extra: BTreeMap<String, String> = cli.env.into_iter().collect();

    let command = match cli.command {
        Some(command) => command,
        None => match prompt_for_command()? {
            Some(command) => command,
            None => {
                println!("Cancelled.");
                return Ok(());
            }
        },
    };

    let profile = match command {
        Command::Claude => Profile::Claude,
        Command::Glm => Profile::Glm {
            api_key: std::env::var("ZAI_API_KEY")
                .or_else(|_| std::env::var("GLM_API_KEY"))
                .ok(),
        },
        Command::Relay { force, url } => {
            if !relay_is_healthy(&url)? {
                let health_url = format!("{}/health", url.trim_end_matches('/'));
                if !force {
                    return Err(ProfileError::RelayUnavailable { url: health_url });
                }
                eprintln!("warning: {health_url} not OK, switching anyway");
            }
            Profile::Relay { base_url: url }
        }
    };

    let locations = SettingsLocations::discover()?;
    let updated = apply_profile(&locations, &profile, &extra)?;
    println!("Switched to {profile}. Updated:");
    for path in updated {
        println!("  {}", path.display());
    }
    Ok(())
}

fn prompt_for_command() -> Result<Option<Command>, ProfileError> {
    println!("Select a Claude Code backend:");
    println!("  1) claude  (native subscription)");
    println!("  2) glm     (z.ai)");
    println!("  3) relay   ({DEFAULT_RELAY_URL})");
    print!("> ");
    io::stdout().flush()?;

    let mut choice = String::new();
    io::stdin().lock().read_line(&mut choice)?;
    Ok(menu_choice(&choice))
}

fn menu_choice(input: &str) -> Option<Command> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "claude" => Some(Command::Claude),
        "2" | "glm" => Some(Command::Glm),
        "3" | "relay" => Some(Command::Relay {
            force: false,
            url: DEFAULT_RELAY_URL.to_string(),
        }),
        _ => None,
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
}
