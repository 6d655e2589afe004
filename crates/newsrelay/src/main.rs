use std::io;
use std::str::FromStr as _;
use std::sync::Arc;

use clap::Parser;
use newsrelay::ai::{AiError, OpenAiClient};
use newsrelay::channel::{PublishError, TelegramChannel};
use newsrelay::config::{Config, ConfigError, RelayOpts};
use newsrelay::feed::{FeedError, FeedSource as _, HttpFeedSource};
use newsrelay::image::{HttpImageProbe, ImageError};
use newsrelay::page::{HttpPageFetcher, PageError};
use newsrelay::pipeline::ArticlePipeline;
use newsrelay::scheduler::{CycleOutcome, CycleScheduler};
use newsrelay_db::{Database, DbError, RecentTitle};
use serde::Serialize;
use snafu::{ResultExt as _, Snafu};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub const LOG_TARGET: &str = "newsrelay::main";

#[derive(Debug, Snafu)]
pub enum RelayError {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },
    #[snafu(display("Database error: {source}"))]
    Database { source: DbError },
    #[snafu(display("Feed error: {source}"))]
    Feed { source: FeedError },
    #[snafu(display("Page client error: {source}"))]
    Page { source: PageError },
    #[snafu(display("Image client error: {source}"))]
    Image { source: ImageError },
    #[snafu(display("AI client error: {source}"))]
    Ai { source: AiError },
    #[snafu(display("Channel client error: {source}"))]
    Channel { source: PublishError },
    #[snafu(display("Failed to serialize output: {source}"))]
    Output { source: serde_json::Error },
    #[snafu(display("Logging initialization failed"))]
    Logging,
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Relays relevant RSS articles, summarized, to a Telegram channel
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub relay: RelayOpts,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Run a single cycle immediately and exit
    RunOnce,
    /// Development commands
    Dev {
        #[command(subcommand)]
        dev_command: DevCommand,
    },
}

#[derive(Debug, Parser)]
pub enum DevCommand {
    /// Fetch one feed and print its parsed articles
    TestFeed {
        #[arg(long)]
        url: String,
    },
    /// Print the record count and the recent-title window
    StoreStats,
}

#[snafu::report]
#[tokio::main]
async fn main() -> RelayResult<()> {
    let dotenv = dotenvy::dotenv();

    let opts = Opts::parse();
    init_logging(&opts.relay.log_level)?;

    match dotenv {
        Ok(path) => info!(target: LOG_TARGET, path = %path.display(), "Loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => warn!(target: LOG_TARGET, err = %err, "Failed to load .env"),
    }

    match opts.command {
        Some(Command::Dev { dev_command }) => handle_dev_command(&opts.relay, dev_command).await,
        Some(Command::RunOnce) => {
            let config = Config::from_opts(&opts.relay).context(ConfigSnafu)?;
            let scheduler = build_scheduler(&config).await?;
            if let CycleOutcome::Completed(report) = scheduler.run_cycle().await {
                print_json(&report)?;
            }
            Ok(())
        }
        None => {
            let config = Config::from_opts(&opts.relay).context(ConfigSnafu)?;
            run_relay(config).await
        }
    }
}

async fn run_relay(config: Config) -> RelayResult<()> {
    info!(
        target: LOG_TARGET,
        feeds = config.feeds.len(),
        channel = %config.telegram.channel_id,
        model = %config.openai.model,
        interval_mins = config.cycle_interval.as_secs() / 60,
        align = config.align_to_interval,
        retention_days = config.retention.max_age.as_secs() / 86400,
        max_records = ?config.retention.max_records,
        "Relay configuration"
    );

    let scheduler = Arc::new(build_scheduler(&config).await?);

    tokio::spawn({
        let scheduler = scheduler.clone();
        async move {
            shutdown_signal().await;
            info!(target: LOG_TARGET, "Shutdown requested, finishing current article");
            scheduler.request_shutdown();
        }
    });

    info!(target: LOG_TARGET, "Relay is running. Press Ctrl+C to stop.");
    scheduler.run_forever().await;
    Ok(())
}

async fn build_scheduler(config: &Config) -> RelayResult<CycleScheduler> {
    let db = Arc::new(
        Database::open(&config.db_file)
            .await
            .context(DatabaseSnafu)?,
    );
    info!(target: LOG_TARGET, path = %db.path().display(), "Database opened");

    let ai = Arc::new(OpenAiClient::new(config.openai.clone()).context(AiSnafu)?);

    let pipeline = ArticlePipeline::builder()
        .db(db.clone())
        .pages(Arc::new(
            HttpPageFetcher::new(config.http_timeout).context(PageSnafu)?,
        ))
        .images(Arc::new(
            HttpImageProbe::new(config.http_timeout).context(ImageSnafu)?,
        ))
        .classifier(ai.clone())
        .summarizer(ai.clone())
        .oracle(ai)
        .channel(Arc::new(
            TelegramChannel::new(config.telegram.clone()).context(ChannelSnafu)?,
        ))
        .similarity_window(config.similarity_window)
        .build();

    Ok(CycleScheduler::builder()
        .feeds(Arc::new(
            HttpFeedSource::new(config.http_timeout).context(FeedSnafu)?,
        ))
        .feed_urls(config.feeds.clone())
        .pipeline(pipeline)
        .db(db)
        .retention(config.retention)
        .interval(config.cycle_interval)
        .align_to_interval(config.align_to_interval)
        .build())
}

#[derive(Serialize)]
struct StoreStats {
    path: String,
    count: usize,
    recent: Vec<RecentTitle>,
}

async fn handle_dev_command(relay: &RelayOpts, dev_command: DevCommand) -> RelayResult<()> {
    match dev_command {
        DevCommand::TestFeed { url } => {
            info!(target: LOG_TARGET, %url, "Testing feed");

            let timeout = std::time::Duration::from_secs(relay.http_timeout_secs);
            let source = HttpFeedSource::new(timeout).context(FeedSnafu)?;
            match source.fetch(&url).await {
                Ok(articles) => print_json(&articles),
                Err(err) => {
                    error!(target: LOG_TARGET, err = %err, %url, "Failed to fetch feed");
                    Err(RelayError::Feed { source: err })
                }
            }
        }
        DevCommand::StoreStats => {
            let path = relay.db_file().context(ConfigSnafu)?;
            let db = Database::open(&path).await.context(DatabaseSnafu)?;

            print_json(&StoreStats {
                path: path.display().to_string(),
                count: db.count().await.context(DatabaseSnafu)?,
                recent: db
                    .recent_titles(relay.similarity_window)
                    .await
                    .context(DatabaseSnafu)?,
            })
        }
    }
}

fn print_json(value: &impl Serialize) -> RelayResult<()> {
    let json = serde_json::to_string_pretty(value).context(OutputSnafu)?;
    println!("{json}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(target: LOG_TARGET, err = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(target: LOG_TARGET, err = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

pub fn init_logging(log_level: &str) -> RelayResult<()> {
    let default_level = LevelFilter::from_str(log_level).unwrap_or(LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| RelayError::Logging)?;

    Ok(())
}
