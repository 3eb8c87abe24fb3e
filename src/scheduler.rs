use crate::config::Config;
use crate::crypto::CryptoComposer;
use crate::dedup::DedupStore;
use crate::feed::FeedFetcher;
use crate::holiday::HolidayProvider;
use crate::model::{Category, Slot, Subscriber, UserLogEntry};
use crate::select::{self, SelectedItem};
use crate::transport::{Transport, TransportErrorKind};
use crate::weather::WeatherProvider;
use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

const JOB_DEADLINE: Duration = Duration::from_secs(45);
const RETRY_BACKOFFS: [Duration; 2] = [Duration::from_secs(30), Duration::from_secs(120)];
const DEFAULT_COUNTRY: &str = "BD";
const DEFAULT_LOCATION: &str = "Dhaka";

/// Digest Assembler & Scheduler: drives the four-slot delivery
/// and composes digest text for both scheduled and on-demand requests.
pub struct Scheduler {
    config: Config,
    fetcher: Arc<FeedFetcher>,
    dedup: Arc<DedupStore>,
    crypto: Arc<CryptoComposer>,
    weather: Arc<dyn WeatherProvider>,
    holiday: Arc<dyn HolidayProvider>,
    transport: Arc<dyn Transport>,
    chat_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    worker_permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        fetcher: Arc<FeedFetcher>,
        dedup: Arc<DedupStore>,
        crypto: Arc<CryptoComposer>,
        weather: Arc<dyn WeatherProvider>,
        holiday: Arc<dyn HolidayProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let worker_permits = Arc::new(Semaphore::new(config.delivery_parallelism.max(1)));
        Self {
            config,
            fetcher,
            dedup,
            crypto,
            weather,
            holiday,
            transport,
            chat_locks: Mutex::new(HashMap::new()),
            worker_permits,
        }
    }

    /// Runs the 60s tick loop until cancelled. One cooperative
    /// loop enumerates due subscribers; delivery jobs run on the bounded
    /// worker pool in parallel.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_interval_seconds));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.clone().tick_once(Utc::now()).await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Enumerates active subscribers due for any slot at `now` and fans out
    /// one delivery job per (subscriber, slot) match.
    pub async fn tick_once(self: Arc<Self>, now: DateTime<Utc>) -> Result<()> {
        let subscribers = self.dedup.get_active_subscribers().await?;
        let mut set = tokio::task::JoinSet::new();

        for sub in subscribers {
            for slot in Slot::ALL {
                if is_due(&sub, slot, now) {
                    let this = self.clone();
                    let chat_id = sub.chat_id;
                    let timezone = sub.timezone.clone();
                    set.spawn(async move {
                        this.run_scheduled_job(chat_id, &timezone, slot, now).await;
                    });
                }
            }
        }
        while set.join_next().await.is_some() {}
        Ok(())
    }

    async fn chat_lock(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        locks.entry(chat_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// One scheduled delivery job: serialized per chat, bounded by the
    /// worker pool, with a per-job deadline.
    async fn run_scheduled_job(&self, chat_id: i64, timezone: &str, slot: Slot, now: DateTime<Utc>) {
        let lock = self.chat_lock(chat_id).await;
        let _chat_guard = lock.lock().await;
        let Ok(_permit) = self.worker_permits.clone().acquire_owned().await else {
            return;
        };

        let tz: Tz = match Tz::from_str(timezone) {
            Ok(tz) => tz,
            Err(_) => {
                warn!(chat_id, timezone, "invalid timezone, skipping");
                return;
            }
        };

        let composed = match tokio::time::timeout(JOB_DEADLINE, self.compose_digest(chat_id, slot, now, tz)).await {
            Ok(Ok(composed)) => composed,
            Ok(Err(e)) => {
                warn!(chat_id, error = %e, "digest composition failed");
                return;
            }
            Err(_) => {
                warn!(chat_id, "delivery job deadline exceeded, slot not marked sent");
                return;
            }
        };

        if self.send_with_retry(chat_id, &composed.parts).await {
            for (category, fingerprint) in &composed.fingerprints {
                if let Err(e) = self.dedup.mark_sent(chat_id, fingerprint, *category, now).await {
                    warn!(chat_id, error = %e, "mark_sent failed");
                }
            }
            if let Err(e) = self
                .dedup
                .set_last_slot_sent(chat_id, slot, now.with_timezone(&tz).date_naive())
                .await
            {
                warn!(chat_id, error = %e, "set_last_slot_sent failed");
            }
            info!(chat_id, slot = slot.label(), "digest delivered");
        } else {
            warn!(chat_id, slot = slot.label(), "digest delivery failed after retries, giving up for this slot");
        }
    }

    /// Transport send with up to two retries at 30s/120s backoff.
    /// Respects `retry-after` on rate limiting.
    async fn send_with_retry(&self, chat_id: i64, parts: &[String]) -> bool {
        for backoff in [Duration::from_secs(0), RETRY_BACKOFFS[0], RETRY_BACKOFFS[1]] {
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            if self.send_all_parts(chat_id, parts).await {
                return true;
            }
        }
        false
    }

    async fn send_all_parts(&self, chat_id: i64, parts: &[String]) -> bool {
        for part in parts {
            match self.transport.send_message(chat_id, part, true).await {
                Ok(_) => continue,
                Err(TransportErrorKind::RateLimited { retry_after_secs }) => {
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    if self.transport.send_message(chat_id, part, true).await.is_err() {
                        return false;
                    }
                }
                Err(TransportErrorKind::Unauthorized) | Err(TransportErrorKind::ChatNotFound) => {
                    if let Err(e) = self.dedup.set_active(chat_id, false).await {
                        warn!(chat_id, error = %e, "failed to deactivate subscriber");
                    }
                    return false;
                }
                Err(_) => return false,
            }
        }
        true
    }

    /// Gathers feeds/market/weather/holiday, runs the Selection Engine five
    /// times, and renders digest text.
    async fn compose_digest(&self, chat_id: i64, slot: Slot, now: DateTime<Utc>, tz: Tz) -> Result<ComposedDigest> {
        futures::future::join_all(Category::ALL.iter().map(|c| self.fetcher.refresh(*c))).await;

        let mut categories = Vec::with_capacity(5);
        let mut fingerprints = Vec::new();
        for category in Category::ALL {
            let selected = select::select_five(&self.fetcher, &self.dedup, chat_id, category, now).await?;
            for item in &selected {
                if let SelectedItem::Real(real) = item {
                    fingerprints.push((category, real.fingerprint.clone()));
                }
            }
            categories.push((category, selected));
        }

        let market = self.crypto.snapshot().await.ok();
        let commentary = match &market {
            Some(snap) => Some(self.crypto.commentary(snap).await),
            None => None,
        };

        let weather = self.weather.current(DEFAULT_LOCATION).await.ok();
        let holidays = self
            .holiday
            .holidays(DEFAULT_COUNTRY, now.with_timezone(&tz).date_naive())
            .await
            .unwrap_or_default();

        let input = crate::assemble::DigestInput {
            slot,
            now_utc: now,
            timezone: tz,
            holiday: holidays.first().map(|s| s.as_str()),
            weather: weather.as_ref(),
            categories,
            market: market.as_ref(),
            commentary: commentary.as_deref(),
        };
        let parts = crate::assemble::compose(&input);

        Ok(ComposedDigest { parts, fingerprints })
    }

    /// On-demand digest: identical composition path, no slot bookkeeping, a
    /// single delivery attempt.
    pub async fn deliver_on_demand(&self, chat_id: i64, timezone: &str) -> Result<()> {
        let tz: Tz = Tz::from_str(timezone).unwrap_or(chrono_tz::UTC);
        let now = Utc::now();
        let composed = self.compose_digest(chat_id, Slot::Morning, now, tz).await?;

        for part in &composed.parts {
            if self.transport.send_message(chat_id, part, true).await.is_err() {
                anyhow::bail!("on-demand delivery failed for chat {chat_id}");
            }
        }
        for (category, fingerprint) in &composed.fingerprints {
            self.dedup.mark_sent(chat_id, fingerprint, *category, now).await?;
        }
        Ok(())
    }

    /// On-demand coin detail for `/coin <symbol>`.
    pub async fn coin_detail(&self, symbol: &str) -> Result<String> {
        Ok(self.crypto.coin_detail(symbol).await?)
    }

    pub async fn log_interaction(&self, entry: UserLogEntry) -> Result<()> {
        self.dedup.append_user_log(entry).await
    }

    /// Purges delivery-log rows older than the configured retention window;
    /// intended to be invoked daily.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.dedup
            .purge_older_than(chrono::Duration::days(self.config.dedup_retention_days))
            .await
    }
}

struct ComposedDigest {
    parts: Vec<String>,
    fingerprints: Vec<(Category, String)>,
}

/// Whether `(T_local.hour, T_local.minute)` matches `slot` and the
/// subscriber hasn't already received that slot's digest today.
fn is_due(sub: &Subscriber, slot: Slot, now_utc: DateTime<Utc>) -> bool {
    let Ok(tz) = Tz::from_str(&sub.timezone) else {
        return false;
    };
    let local = now_utc.with_timezone(&tz);
    let (hour, minute) = slot.local_time();
    if local.hour() != hour || local.minute() != minute {
        return false;
    }
    sub.last_sent(slot) != Some(local.date_naive())
}
