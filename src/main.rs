//! Channel Access Bot - Main Entry Point
//!
//! A Telegram bot that sells time-limited access to a private channel:
//! subscribers pay, send a receipt, the reviewer approves, and expired
//! members are removed by a background sweeper.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use teloxide::dptree;
use teloxide::dispatching::Dispatcher;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use channel_access_bot::access::{AccessGranter, ApprovalWorkflow};
use channel_access_bot::commands::CommandHandler;
use channel_access_bot::config::{BotSettings, OfferConfig, TelegramConfig};
use channel_access_bot::scheduler::{ExpirySweeper, SweeperMessage, SweeperStats};
use channel_access_bot::store::SubscriptionStore;
use channel_access_bot::telegram::handlers::{self, BotState};
use channel_access_bot::telegram::{ChatGateway, TelegramBot};

/// Telegram bot selling time-limited access to a private channel.
#[derive(Parser, Debug)]
#[command(name = "access_bot")]
#[command(about = "Sell subscription access to a private Telegram channel")]
#[command(version)]
struct Args {
    /// Path to the offer JSON configuration file.
    #[arg(short, long, default_value = "offer.json")]
    offer: String,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error). Overrides `RUST_LOG`.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Generate an example offer file and exit.
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load environment variables before anything reads them
    let env_loaded = dotenvy::from_filename(&args.env_file);
    let settings = BotSettings::from_env_with_defaults();

    init_logging(args.log_level.as_deref().unwrap_or(&settings.log_level));

    if let Err(e) = env_loaded {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    if args.generate_config {
        return generate_example_config();
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let offer = OfferConfig::load_from_file(&args.offer)
        .context("Failed to load offer configuration")?;
    offer
        .validate()
        .context("Offer configuration validation failed")?;

    info!(
        "Offer: {} for {} days",
        offer.price_label(),
        offer.duration_days
    );

    // Open persistence
    let store = SubscriptionStore::open(&settings.database_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open database at {}",
                settings.database_path.display()
            )
        })?;

    info!(
        "Database ready at {} ({} subscriptions)",
        settings.database_path.display(),
        store.count().await.unwrap_or_default()
    );

    // Connect to Telegram
    let bot = TelegramBot::connect(&tg_config)
        .await
        .context("Failed to connect to Telegram")?;
    let gateway: Arc<dyn ChatGateway> = Arc::new(bot.clone());

    // Access lifecycle
    let granter = AccessGranter::new(
        Arc::clone(&gateway),
        store.clone(),
        tg_config.channel_id,
        offer.duration(),
    );
    let workflow = Arc::new(ApprovalWorkflow::new(
        Arc::clone(&gateway),
        store.clone(),
        granter,
        tg_config.reviewer_id,
    ));

    // Create sweeper channel and shared stats
    let (sweeper_tx, sweeper_rx) = mpsc::channel::<SweeperMessage>(8);
    let stats = Arc::new(RwLock::new(SweeperStats::new()));

    let sweeper = ExpirySweeper::new(
        Arc::clone(&gateway),
        store.clone(),
        tg_config.channel_id,
        settings.sweep_interval(),
    )
    .with_kick_interval(settings.kick_interval())
    .with_stats(Arc::clone(&stats));

    let commands = Arc::new(CommandHandler::new(
        store.clone(),
        Arc::clone(&workflow),
        stats,
        sweeper_tx.clone(),
        offer.clone(),
        settings.sweep_interval(),
    ));

    let state = BotState {
        commands,
        workflow,
        store: store.clone(),
        offer: Arc::new(offer),
        bot_username: bot.username().map(str::to_owned),
    };

    // Spawn sweeper task
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_rx).await;
    });

    info!("Bot is running. Use Ctrl+C to stop.");

    Dispatcher::builder(bot.inner().clone(), handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    // Cleanup
    info!("Shutting down...");
    if sweeper_tx.send(SweeperMessage::Shutdown).await.is_err() {
        warn!("Expiry sweeper already stopped");
    }
    if let Err(e) = sweeper_handle.await {
        warn!("Expiry sweeper task failed: {}", e);
    }
    store.close().await;

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Generates an example offer file.
fn generate_example_config() -> Result<()> {
    let example = OfferConfig::example();
    example.save_to_file("offer.example.json")?;

    println!("✓ Example offer written to: offer.example.json");
    println!("\nTo use this bot:");
    println!("1. Copy offer.example.json to offer.json and fill in the payment details");
    println!("2. Create a .env file with BOT_TOKEN, REVIEWER_ID and CHANNEL_ID");
    println!("3. Make the bot an administrator of the channel (invite and ban rights)");
    println!("4. Run: access_bot");

    Ok(())
}
