//! roundnote-bot entry point
//!
//! Wires the durable store, the entitlement gate, the media pipeline, both
//! payment drivers, and the broadcast machinery into one teloxide
//! dispatcher, then runs until stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use teloxide::prelude::*;
use teloxide::types::Message;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roundnote_bot::broadcast::BroadcastSessions;
use roundnote_bot::config::Config;
use roundnote_bot::entitlement::Gate;
use roundnote_bot::handlers::{self, AppContext, TelegramNotifier};
use roundnote_bot::health;
use roundnote_bot::media::{Pipeline, Transcoder};
use roundnote_bot::payments::{CryptoPayClient, InvoicePoller, Reconciler};
use roundnote_bot::store::{self, InvoiceLedger, UserStore};

/// roundnote-bot CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/roundnote.toml")]
    config: String,

    /// Telegram bot token (overrides config file)
    #[arg(long, env = "ROUNDNOTE_BOT_TOKEN")]
    bot_token: Option<String>,

    /// Database URL (overrides config file)
    #[arg(long, env = "ROUNDNOTE_DB_URL")]
    database_url: Option<String>,

    /// Health check server port
    #[arg(long, env = "HEALTH_CHECK_PORT", default_value = "3000")]
    health_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roundnote_bot=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting roundnote-bot");

    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        info!("Loading config from file: {}", args.config);
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using environment variables");
        Config::from_env()?
    };

    if let Some(bot_token) = args.bot_token {
        config.telegram.bot_token = bot_token;
    }
    if let Some(database_url) = args.database_url {
        config.database.url = database_url;
    }
    if config.telegram.bot_token.is_empty() {
        anyhow::bail!("bot token is not configured");
    }

    info!("Configuration loaded successfully");

    // Open the durable store
    let pool = store::connect(&config.database.url).await?;
    info!("Database ready at {}", config.database.url);

    let config = Arc::new(config);
    let users = UserStore::new(pool.clone());
    let ledger = InvoiceLedger::new(pool);

    // Create Telegram bot and verify the token
    info!("Initializing Telegram bot...");
    let bot = Bot::new(&config.telegram.bot_token);
    let bot_username = match bot.get_me().await {
        Ok(me) => {
            let username = me.username().to_string();
            info!("Bot authenticated as: @{}", username);
            Some(username)
        }
        Err(e) => {
            error!("Failed to authenticate bot: {}", e);
            return Err(e.into());
        }
    };

    // Start health check server
    let health_state = health::AppState::new(bot_username);
    let health_state_clone = health_state.clone();
    let health_port = args.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::start_health_server(health_state_clone, health_port).await {
            error!("Health check server error: {}", e);
        }
    });

    // Assemble the subsystems
    let gate = Gate::new(users.clone(), config.limits.daily_free_quota);
    let transcoder = Transcoder::new(
        config.media.note_length,
        Duration::from_secs(config.media.transcode_timeout_secs),
    );
    let pipeline = Pipeline::new(
        gate,
        config.media.scratch_dir.clone(),
        config.limits.max_clip_secs,
    );
    let reconciler = Reconciler::new(
        users.clone(),
        ledger,
        TelegramNotifier::new(bot.clone()),
        config.payments.premium_days,
    );
    let cryptopay = CryptoPayClient::new(
        config.payments.cryptopay_base_url.clone(),
        config.payments.cryptopay_token.clone(),
    );

    // Start the poll driver (Crypto Pay settled-invoice feed)
    let poller = InvoicePoller::new(
        cryptopay.clone(),
        reconciler.clone(),
        Duration::from_secs(config.payments.poll_interval_secs),
    );
    tokio::spawn(poller.run());
    info!(
        "Invoice poller started (every {}s)",
        config.payments.poll_interval_secs
    );

    let ctx = AppContext {
        config,
        users,
        pipeline,
        transcoder,
        reconciler,
        cryptopay,
        sessions: BroadcastSessions::new(),
    };

    info!("Bot initialized, starting message dispatcher...");

    // Setup dispatcher with one branch per update shape
    let message_handler = Update::filter_message()
        .branch(
            dptree::filter(|msg: Message| msg.successful_payment().is_some())
                .endpoint(handlers::handle_successful_payment),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some())
                .endpoint(handlers::handle_text_message),
        )
        .branch(
            dptree::filter(|msg: Message| msg.video().is_some())
                .endpoint(handlers::handle_video_message),
        )
        .endpoint(handlers::handle_other_message);

    let callback_handler =
        Update::filter_callback_query().endpoint(handlers::handle_callback_query);

    let pre_checkout_handler =
        Update::filter_pre_checkout_query().endpoint(handlers::handle_pre_checkout_query);

    let all_handlers = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
        .branch(pre_checkout_handler);

    Dispatcher::builder(bot, all_handlers)
        .dependencies(dptree::deps![ctx, health_state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("roundnote-bot stopped");
    Ok(())
}
