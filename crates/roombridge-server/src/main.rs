use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roombridge::config::{LogFormat, Settings};
use roombridge::rtc::WebRtcConnector;
use roombridge::{echo, shutdown, token};

#[derive(Parser)]
#[command(name = "roombridge", version, about = "Relay audio and video between two rooms")]
struct Cli {
    /// Config file (defaults to ./roombridge.toml when present)
    #[arg(short, long, env = "ROOMBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Join both rooms and relay tracks until interrupted
    Run,
    /// Mint a join token from the configured API key and secret
    Token {
        #[arg(long)]
        room: String,
        #[arg(long)]
        identity: String,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,
    },
    /// Echo the first audio track of a room back into it
    Echo {
        /// Room to join (defaults to room A)
        #[arg(long)]
        room: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "roombridge=info,roombridge_media=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Token {
            room,
            identity,
            ttl_secs,
        } => {
            let Some((key, secret)) = settings.api_credentials() else {
                anyhow::bail!("api_key and api_secret must be configured to mint tokens");
            };
            let token =
                token::mint_join_token(key, secret, &room, &identity, chrono::Duration::seconds(ttl_secs))?;
            println!("{token}");
        }
        Command::Echo { room } => {
            init_tracing(settings.log_format);

            let target = settings.echo_target(room.as_deref())?;
            let connector = Arc::new(WebRtcConnector::new(settings.stun_servers.clone())?);
            let stats = echo::run_echo(
                target,
                connector,
                settings.relay_settings(),
                shutdown::interrupt_signal(),
            )
            .await?;

            match stats {
                Some(stats) => tracing::info!("Echoed {} audio frames", stats.frames_written),
                None => tracing::info!("No audio track was echoed"),
            }
        }
        Command::Run => {
            init_tracing(settings.log_format);
            tracing::info!("Starting roombridge...");

            let connector = Arc::new(WebRtcConnector::new(settings.stun_servers.clone())?);
            let report = roombridge::run(&settings, connector, shutdown::interrupt_signal()).await?;
            if report.aborted > 0 {
                tracing::warn!("Exited with {} session tasks still running", report.aborted);
            }
        }
    }

    Ok(())
}
