use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use quicknews::commands::{self, ConfigFormat, StartOptions};
use quicknews::config::Config;
use quicknews::logging;

#[derive(Parser)]
#[command(name = "quicknews", version, about = "News digests, speech audio and a daily podcast")]
struct Cli {
    /// Config file (default: ~/.config/quicknews/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Let environment variables override config values
    #[arg(long, global = true)]
    env: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to feeds, discovering the feed url from a page when needed
    Add {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Import feeds from an OPML file
    Import { path: PathBuf },
    /// Export subscribed feeds as OPML
    ExportOpml {
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch every feed once and summarize new items
    Fetch,
    /// Browse digests in the terminal reader
    Read,
    /// Read out unlistened digests
    Play {
        /// Only digests of this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Save pages under the bookmark feed
    Bookmark {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Publish one day's podcast episodes
    Publish {
        /// Day to publish (YYYY-MM-DD)
        date: NaiveDate,
    },
    /// Write audio files for digests that have none
    ExportAudio,
    /// Show the effective configuration
    Config {
        #[arg(long, value_enum, default_value_t = ConfigFormat::Table)]
        format: ConfigFormat,
        #[arg(long)]
        show_secrets: bool,
    },
    /// Run or control the background service
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(clap::Args)]
struct StartArgs {
    /// Time between fetch runs, e.g. 30m or 1h (at least 1m)
    #[arg(long)]
    interval: Option<String>,
    /// Feeds fetched in parallel
    #[arg(long)]
    max_workers: Option<usize>,
    #[arg(long)]
    pid_file: Option<String>,
    /// Run in the background
    #[arg(long)]
    detach: bool,
    /// Port for /health and /metrics, 0 disables
    #[arg(long)]
    health_check_port: Option<u16>,
}

impl From<StartArgs> for StartOptions {
    fn from(args: StartArgs) -> Self {
        Self {
            interval: args.interval,
            max_workers: args.max_workers,
            pid_file: args.pid_file,
            detach: args.detach,
            health_check_port: args.health_check_port,
        }
    }
}

#[derive(Subcommand)]
enum DaemonAction {
    Start(StartArgs),
    Stop {
        #[arg(long)]
        pid_file: Option<String>,
        /// Send SIGKILL instead of SIGTERM
        #[arg(long)]
        force: bool,
    },
    Restart(StartArgs),
    Status {
        #[arg(long)]
        pid_file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Interactive commands only show warnings and errors; the daemon logs at info.
    let level = match &cli.command {
        Commands::Daemon {
            action: DaemonAction::Start(_) | DaemonAction::Restart(_),
        } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    let log_toggle = logging::init(level);

    let config = Config::load(cli.config.as_deref(), cli.env).context("Failed to load config")?;

    match cli.command {
        Commands::Add { urls } => commands::add(&config, &urls).await?,
        Commands::Import { path } => commands::import(&config, &path)
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?,
        Commands::ExportOpml { output } => commands::export_opml(&config, output).await?,
        Commands::Fetch => commands::fetch(&config).await?,
        Commands::Read => commands::read(&config).await?,
        Commands::Play { date } => commands::play(&config, date).await?,
        Commands::Bookmark { urls } => commands::bookmark(&config, &urls).await?,
        Commands::Publish { date } => commands::publish(&config, date)
            .await
            .with_context(|| format!("Failed to publish {date}"))?,
        Commands::ExportAudio => commands::export_audio(&config).await?,
        Commands::Config {
            format,
            show_secrets,
        } => commands::show_config(&config, format, show_secrets)?,
        Commands::Daemon { action } => match action {
            DaemonAction::Start(args) => {
                commands::start(config, args.into(), log_toggle).await?;
            }
            DaemonAction::Stop { pid_file, force } => {
                commands::stop(&config, pid_file.as_deref(), force).await?;
            }
            DaemonAction::Restart(args) => {
                commands::restart(config, args.into(), log_toggle).await?;
            }
            DaemonAction::Status { pid_file } => {
                commands::status(&config, pid_file.as_deref()).await?;
            }
        },
    }

    Ok(())
}
