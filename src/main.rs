use anyhow::{Context, Result};
use newsdigest_bot::config::Config;
use newsdigest_bot::crypto::ai::HttpAiProvider;
use newsdigest_bot::crypto::market::HttpMarketProvider;
use newsdigest_bot::crypto::CryptoComposer;
use newsdigest_bot::dedup::DedupStore;
use newsdigest_bot::feed::FeedFetcher;
use newsdigest_bot::holiday::HttpHolidayProvider;
use newsdigest_bot::model::UserLogEntry;
use newsdigest_bot::scheduler::Scheduler;
use newsdigest_bot::transport::{TeloxideTransport, Transport};
use newsdigest_bot::weather::HttpWeatherProvider;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/3.0";
const HOLIDAY_BASE_URL: &str = "https://date.nager.at/api/v3";
const MARKET_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const AI_BASE_URL: &str = "https://api.openai.com/v1";

fn init_logging(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load configuration")?;
    init_logging(&config.log_level);

    let http_client = Client::builder()
        .gzip(true)
        .timeout(Duration::from_secs(15))
        .user_agent("newsdigest-bot/0.1")
        .build()
        .context("build shared HTTP client")?;

    let dedup = Arc::new(
        DedupStore::open(&config.dedup_db_path())
            .await
            .context("open dedup store")?,
    );
    let fetcher = Arc::new(FeedFetcher::new(
        http_client.clone(),
        config.feed_parallelism,
        config.per_host_parallelism,
    ));

    let market = Arc::new(HttpMarketProvider::new(
        http_client.clone(),
        MARKET_BASE_URL,
        config.market_dead_volume_floor_usd,
    ));
    let ai = Arc::new(HttpAiProvider::new(
        http_client.clone(),
        AI_BASE_URL,
        config.ai_api_key.clone(),
    ));
    let crypto = Arc::new(CryptoComposer::new(market, ai));

    let weather = Arc::new(HttpWeatherProvider::new(
        http_client.clone(),
        WEATHER_BASE_URL,
        config.weather_api_key.clone(),
    ));
    let holiday = Arc::new(HttpHolidayProvider::new(
        http_client.clone(),
        HOLIDAY_BASE_URL,
        config.holiday_api_key.clone(),
    ));
    let transport: Arc<dyn Transport> = Arc::new(TeloxideTransport::new(&config.telegram_token));

    let scheduler = Arc::new(Scheduler::new(
        config.clone(),
        fetcher,
        dedup.clone(),
        crypto,
        weather,
        holiday,
        transport.clone(),
    ));

    let once = std::env::args().any(|a| a == "--once");

    if once {
        info!("running a single scheduler tick and exiting");
        scheduler.clone().tick_once(chrono::Utc::now()).await?;
        return Ok(());
    }

    info!("starting newsdigest-bot scheduler");
    let scheduler_handle = tokio::spawn(scheduler.clone().run());
    let command_handle = tokio::spawn(run_command_loop(scheduler, dedup, transport));

    tokio::select! {
        res = scheduler_handle => {
            if let Err(e) = res {
                warn!(error = %e, "scheduler task exited");
            }
        }
        res = command_handle => {
            if let Err(e) = res {
                warn!(error = %e, "command loop task exited");
            }
        }
    }

    Ok(())
}

/// Polls `get_updates` for the bootstrap subscription commands (`/start`,
/// `/stop`) and the single in-scope on-demand entry point (`/coin <symbol>`).
/// Every inbound message is recorded to the audit log regardless of whether
/// it matches a known command.
async fn run_command_loop(
    scheduler: Arc<Scheduler>,
    dedup: Arc<DedupStore>,
    transport: Arc<dyn Transport>,
) {
    let mut offset = 0i32;
    loop {
        let updates = match transport.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = ?e, "get_updates failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if updates.is_empty() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            continue;
        }

        for update in updates {
            offset = offset.max(update.update_id + 1);

            let log = UserLogEntry {
                user_id: update.user_id,
                username: update.username.clone(),
                first_name: update.first_name.clone(),
                interaction_time: chrono::Utc::now(),
                message_type: classify(&update.text).to_string(),
                location: None,
            };
            if let Err(e) = scheduler.log_interaction(log).await {
                warn!(error = %e, "failed to append user log");
            }

            handle_command(&scheduler, &dedup, &transport, &update).await;
        }
    }
}

fn classify(text: &str) -> &'static str {
    if text.starts_with("/start") {
        "start"
    } else if text.starts_with("/stop") {
        "stop"
    } else if text.starts_with("/coin") {
        "coin"
    } else {
        "other"
    }
}

async fn handle_command(
    scheduler: &Scheduler,
    dedup: &DedupStore,
    transport: &Arc<dyn Transport>,
    update: &newsdigest_bot::transport::Update,
) {
    let mut parts = update.text.split_whitespace();
    let Some(command) = parts.next() else { return };

    let reply = match command {
        "/start" => {
            let timezone = parts.next().unwrap_or("UTC");
            match dedup.upsert_subscriber(update.chat_id, timezone).await {
                Ok(()) => format!("Subscribed. Digests will arrive in the {timezone} timezone at 08:00, 13:00, 19:00, and 23:00 local time."),
                Err(e) => {
                    warn!(error = %e, "upsert_subscriber failed");
                    "Could not subscribe right now, please try again.".to_string()
                }
            }
        }
        "/stop" => match dedup.set_active(update.chat_id, false).await {
            Ok(()) => "Unsubscribed. You will no longer receive scheduled digests.".to_string(),
            Err(e) => {
                warn!(error = %e, "set_active failed");
                "Could not unsubscribe right now, please try again.".to_string()
            }
        },
        "/coin" => match parts.next() {
            Some(symbol) => scheduler
                .coin_detail(symbol)
                .await
                .unwrap_or_else(|e| format!("Could not fetch {symbol}: {e}")),
            None => "Usage: /coin <symbol>".to_string(),
        },
        _ => return,
    };

    if let Err(e) = transport.send_message(update.chat_id, &reply, false).await {
        warn!(error = ?e, chat_id = update.chat_id, "failed to reply to command");
    }
}
