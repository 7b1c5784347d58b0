use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use logwatcher::config::AppConfig;
use logwatcher::logging::{init_logging, start_retention_cleanup};
use logwatcher::notification::{Alert, FanoutNotifier, Notifier};
use logwatcher::services::{run, shutdown_signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Watch log files and journal units and send alerts when patterns appear.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file to use
    #[arg(short, long, env = "LOGWATCHER_CONFIG")]
    config: PathBuf,

    /// Print debug output
    #[arg(long)]
    debug: bool,

    /// Also write logs to daily rotated files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Send a test alert through every enabled channel and exit
    #[arg(long, conflicts_with = "check")]
    test_notification: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _guard = init_logging(args.debug, args.log_dir.as_deref())
        .context("failed to initialize logging")?;

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("could not load {}", args.config.display()))?;

    if args.check {
        print_summary(&config);
        return Ok(());
    }

    if args.test_notification {
        let notifier = FanoutNotifier::from_config(&config.notifications)?;
        if notifier.is_empty() {
            bail!("no notification channel is enabled");
        }
        notifier.deliver(&Alert::test()).await?;
        println!(
            "Test notification sent via {}",
            notifier.channel_types().join(", ")
        );
        return Ok(());
    }

    let token = CancellationToken::new();
    if let Some(dir) = &args.log_dir {
        start_retention_cleanup(dir, token.clone());
    }
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            token.cancel();
        }
    });

    let summary = run(token, config).await?;
    info!(
        received = summary.dispatch.received,
        delivered = summary.dispatch.delivered,
        dropped = summary.dispatch.dropped,
        errors = summary.sink.reported,
        "logwatcher stopped"
    );
    Ok(())
}

fn print_summary(config: &AppConfig) {
    println!("Configuration OK");
    for spec in config.watch_specs() {
        println!(
            "  {}: watches {:?}, excludes {:?}",
            spec.kind, spec.include, spec.exclude
        );
    }
    let channels: Vec<_> = config
        .notifications
        .channels()
        .into_iter()
        .filter(|c| c.is_enabled())
        .map(|c| c.channel_type())
        .collect();
    if channels.is_empty() {
        println!("  notifications: none enabled");
    } else {
        println!("  notifications: {}", channels.join(", "));
    }
    println!(
        "  retry: {} attempt(s), {} apart; queue capacity {}",
        config.retry.max_attempts,
        logwatcher::config::duration::format(&config.retry.interval),
        config.queue_capacity
    );
}
