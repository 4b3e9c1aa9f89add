//! byteguard - Track bandwidth usage against a budget and block heavy content

use byteguard::{
    cli::{BudgetChanges, Cli, Command, RULES_FILE, STATE_FILE, resolve_data_dir},
    clock::{Clock, SystemClock},
    error::Result,
    feed::{feed_events, feed_file},
    notify::{Notifier, TracingNotifier},
    output::{ConsoleNotifier, OutputFormatter, StatusReport, get_formatter},
    rules::StoredRuleEngine,
    scheduler::DailyResetScheduler,
    settings::SettingsStore,
    store::{JsonFileStore, KeyValueStore},
    timezone::TimezoneConfig,
    tracker::BandwidthTracker,
    types::Domain,
};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Everything a command needs, opened from the data directory
struct App {
    tracker: Arc<BandwidthTracker>,
    clock: Arc<dyn Clock>,
    timezone: TimezoneConfig,
    formatter: Box<dyn OutputFormatter>,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let timezone = TimezoneConfig::from_cli(cli.timezone.as_deref(), cli.utc)?;
        info!("Using timezone: {}", timezone.display_name());

        let data_dir = resolve_data_dir(cli.data_dir.clone())?;
        info!("Using data directory: {}", data_dir.display());

        let store: Arc<dyn KeyValueStore> =
            Arc::new(JsonFileStore::open(data_dir.join(STATE_FILE)).await?);
        let rules_store = Arc::new(JsonFileStore::open(data_dir.join(RULES_FILE)).await?);
        let engine = Arc::new(StoredRuleEngine::new(rules_store));

        // Keep stdout clean for JSON consumers
        let notifier: Arc<dyn Notifier> = if cli.json {
            Arc::new(TracingNotifier)
        } else {
            Arc::new(ConsoleNotifier)
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let tracker = BandwidthTracker::start(
            store.clone(),
            engine,
            notifier,
            clock.clone(),
            timezone.clone(),
        )
        .await?;

        Ok(Self {
            tracker: Arc::new(tracker),
            clock,
            timezone,
            formatter: get_formatter(cli.json),
        })
    }

    async fn status_report(&self) -> Result<StatusReport> {
        let blocking = self.tracker.blocking();
        Ok(StatusReport {
            usage: self.tracker.ledger().snapshot().await,
            settings: self.tracker.settings().load().await?,
            low_data: blocking.status().await,
            auto_low_data: blocking.block_state().await.auto_low_data_enabled,
            timezone: self.timezone.display_name().to_string(),
        })
    }

    async fn print_status(&self) -> Result<()> {
        let report = self.status_report().await?;
        println!("{}", self.formatter.format_status(&report));
        Ok(())
    }

    async fn print_low_data(&self) {
        let status = self.tracker.blocking().status().await;
        println!("{}", self.formatter.format_low_data(&status));
    }

    async fn replay(&self, file: &Path) -> Result<()> {
        info!("Replaying events from {}", file.display());
        let summary = feed_file(&self.tracker, file).await?;
        self.tracker.shutdown().await?;

        let report = self.status_report().await?;
        println!("{}", self.formatter.format_feed_summary(&summary, &report));
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        info!("Reading events from stdin, press Ctrl+C to stop");
        let cancel = CancellationToken::new();

        let scheduler = DailyResetScheduler::spawn(
            self.tracker.clone(),
            self.clock.clone(),
            self.timezone.clone(),
            cancel.child_token(),
        );

        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
                interrupt.cancel();
            }
        });

        let stdin = BufReader::new(tokio::io::stdin());
        let summary = feed_events(&self.tracker, stdin, &cancel).await;

        scheduler.stop().await;
        self.tracker.shutdown().await?;
        let summary = summary?;

        let report = self.status_report().await?;
        println!("{}", self.formatter.format_feed_summary(&summary, &report));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging. The --verbose flag overrides RUST_LOG.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("byteguard=info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("byteguard=warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Plain notifications when stderr is redirected
    if !is_terminal::is_terminal(std::io::stderr()) {
        colored::control::set_override(false);
    }

    if matches!(cli.command, Command::Clear) {
        let data_dir = resolve_data_dir(cli.data_dir.clone())?;
        let store = Arc::new(JsonFileStore::open(data_dir.join(STATE_FILE)).await?);
        SettingsStore::new(store).clear_all_data().await?;
    }

    // Opening also reconciles the rule table with the stored state
    let app = App::open(&cli).await?;

    match cli.command.clone() {
        Command::Replay { file } => app.replay(&file).await?,
        Command::Watch => app.watch().await?,
        Command::Status | Command::Clear => app.print_status().await?,
        Command::Toggle => {
            app.tracker.blocking().toggle().await?;
            app.print_low_data().await;
        }
        Command::Block { domain } => {
            app.tracker.blocking().block_domain(&Domain::parse(&domain)?).await?;
            app.print_low_data().await;
        }
        Command::Unblock { domain } => {
            app.tracker
                .blocking()
                .unblock_domain(&Domain::parse(&domain)?)
                .await?;
            app.print_low_data().await;
        }
        Command::AutoLowData { state } => {
            app.tracker.blocking().set_auto_low_data(state.is_on()).await?;
            app.print_status().await?;
        }
        Command::Budget {
            daily,
            monthly,
            threshold,
            alerts,
        } => {
            let changes = BudgetChanges {
                daily_mb: daily,
                monthly_gb: monthly,
                threshold,
                alerts: alerts.map(|a| a.is_on()),
            };
            let settings_store = app.tracker.settings();
            let mut settings = settings_store.load().await?;
            if !changes.is_empty() {
                changes.apply(&mut settings)?;
                settings_store.save(&settings).await?;
                info!("Saved budget settings");
            }
            println!("{}", app.formatter.format_settings(&settings));
        }
        Command::ResetDaily => {
            app.tracker.reset_daily().await?;
            app.tracker.shutdown().await?;
            app.print_status().await?;
        }
    }

    Ok(())
}
