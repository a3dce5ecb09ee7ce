use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use feedsync::{
    Config, Database, FeedService, HttpFeedSource, Mailer, OutboxDelivery, RetryPolicy, Scheduler,
    StoredNotifier, SyncOrchestrator, UserRepository,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the periodic scheduler until interrupted
    Run,
    /// Sync every eligible feed once and exit
    SyncOnce,
    /// Follow a feed on behalf of a user
    Subscribe {
        username: String,
        url: String,
        /// Address for failure notifications
        #[arg(long)]
        email: Option<String>,
    },
    /// Sync one feed now, even if it is disabled
    Resync { feed_id: i64 },
    /// Stop following a feed
    Unsubscribe { username: String, feed_id: i64 },
    /// Make a disabled feed eligible for periodic sync again
    Enable { feed_id: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_with_env(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", cli.config.display());
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            if let Err(e) = config.apply_env_overrides() {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
            config
        }
    };

    if let Err(e) = feedsync::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        feedsync::logging::init_console_only(&config.logging.level);
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> feedsync::Result<()> {
    config.validate()?;

    let db = Database::open(&config.database.path).await?;
    let source = Arc::new(HttpFeedSource::new(&config.fetch)?);
    let notifier = Arc::new(StoredNotifier::new(db.clone()));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        db.clone(),
        source,
        notifier,
        RetryPolicy::from(&config.sync),
    ));
    let service = FeedService::new(Arc::clone(&orchestrator), config.fetch.allow_private_hosts);
    let delivery = if config.mail.enabled {
        Some(OutboxDelivery::new(db.clone(), Mailer::from_config(&config.mail)?))
    } else {
        None
    };

    match command {
        Command::Run => {
            if !config.sync.enabled {
                info!("Periodic sync is disabled in the configuration");
                return Ok(());
            }
            if delivery.is_none() {
                info!("Mail delivery is disabled; failure notices stay queued");
            }
            let scheduler = Scheduler::new(orchestrator, &config.sync);
            let deliver = async {
                match &delivery {
                    Some(delivery) => delivery.run(config.mail.delivery_interval()).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = scheduler.run() => {}
                _ = deliver => {}
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Shutting down");
                }
            }
        }
        Command::SyncOnce => {
            let scheduler = Scheduler::new(orchestrator, &config.sync);
            let report = scheduler.run_batch().await?;
            println!(
                "synced: {}, unchanged: {}, failed: {}, skipped: {}",
                report.succeeded, report.unchanged, report.failed, report.skipped
            );
            if let Some(delivery) = &delivery {
                let sent = delivery.deliver_pending().await?;
                println!("notifications sent: {}, failed: {}", sent.sent, sent.failed);
            }
        }
        Command::Subscribe {
            username,
            url,
            email,
        } => {
            let owner = UserRepository::new(db.pool())
                .get_or_create(&username, email.as_deref())
                .await?;
            let feed = service.subscribe(owner.id, &url).await?;
            println!("feed {}: {} ({})", feed.id, feed.title, feed.url);
        }
        Command::Resync { feed_id } => {
            let report = service.resync(feed_id).await?;
            println!(
                "feed {}: inserted {}, updated {}, unchanged {}",
                report.feed_id,
                report.stats.inserted,
                report.stats.updated,
                report.stats.unchanged
            );
        }
        Command::Unsubscribe { username, feed_id } => {
            let owner = UserRepository::new(db.pool())
                .get_by_username(&username)
                .await?
                .ok_or_else(|| feedsync::FeedsyncError::NotFound(format!("user {username}")))?;
            service.unsubscribe(owner.id, feed_id).await?;
            println!("unsubscribed from feed {feed_id}");
        }
        Command::Enable { feed_id } => {
            service.enable(feed_id).await?;
            println!("feed {feed_id} enabled");
        }
    }

    Ok(())
}
