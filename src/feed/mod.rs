mod parse;

pub use parse::{entry_to_item, strip_html};

use crate::error::{DigestError, Result};
use crate::model::{Category, Item, Source};
use crate::sources;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_SOURCE_TTL: Duration = Duration::from_secs(10 * 60);
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_DISABLE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Idle,
    Disabled,
}

#[derive(Debug, Clone)]
struct SourceRuntime {
    state: SourceState,
    disabled_until: Option<DateTime<Utc>>,
    disable_interval: Duration,
}

impl Default for SourceRuntime {
    fn default() -> Self {
        Self {
            state: SourceState::Idle,
            disabled_until: None,
            disable_interval: BASE_BACKOFF,
        }
    }
}

#[derive(Debug, Default)]
struct CategoryCache {
    /// per-source cached items plus when that source was last (successfully) fetched.
    per_source: HashMap<&'static str, (Vec<Item>, DateTime<Utc>, Duration)>,
}

impl CategoryCache {
    fn flatten(&self, since: DateTime<Utc>) -> Vec<Item> {
        let now = Utc::now();
        let mut items: Vec<Item> = self
            .per_source
            .values()
            .filter(|(_, fetched_at, ttl)| now - *fetched_at < chrono::Duration::from_std(*ttl).unwrap_or_default())
            .flat_map(|(items, _, _)| items.iter().cloned())
            .filter(|item| item.published_at >= since)
            .collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        items
    }
}

/// Concurrent RSS/Atom ingestion and normalization layer.
///
/// Owns the in-memory item cache; the durable "already delivered" record
/// lives only in the Dedup Store.
pub struct FeedFetcher {
    client: Client,
    global_sem: Arc<Semaphore>,
    per_host_limit: usize,
    host_sems: Mutex<HashMap<String, Arc<Semaphore>>>,
    cache: RwLock<HashMap<Category, CategoryCache>>,
    source_runtime: Mutex<HashMap<&'static str, SourceRuntime>>,
    refresh_lock: Mutex<HashMap<Category, Arc<Mutex<()>>>>,
    outage_streak: Mutex<HashMap<Category, u32>>,
}

impl FeedFetcher {
    pub fn new(client: Client, global_parallelism: usize, per_host_limit: usize) -> Self {
        Self {
            client,
            global_sem: Arc::new(Semaphore::new(global_parallelism.max(1))),
            per_host_limit: per_host_limit.max(1),
            host_sems: Mutex::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            source_runtime: Mutex::new(HashMap::new()),
            refresh_lock: Mutex::new(HashMap::new()),
            outage_streak: Mutex::new(HashMap::new()),
        }
    }

    async fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut sems = self.host_sems.lock().await;
        sems.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    async fn category_lock(&self, category: Category) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_lock.lock().await;
        locks.entry(category).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Fetches all enabled sources for `category` concurrently (bounded by the
    /// global and per-host parallelism caps) and merges results into the cache.
    /// Concurrent calls for the same category coalesce onto one refresh.
    pub async fn refresh(&self, category: Category) -> Result<usize> {
        let lock = self.category_lock(category).await;
        let _guard = lock.lock().await;

        // Double-checked: if another caller just refreshed this category, skip.
        {
            let cache = self.cache.read().await;
            if let Some(cat_cache) = cache.get(&category) {
                if let Some((_, last, _)) = cat_cache.per_source.values().max_by_key(|(_, t, _)| *t) {
                    if Utc::now() - *last < chrono::Duration::from_std(MIN_REFRESH_INTERVAL).unwrap() {
                        return Ok(0);
                    }
                }
            }
        }

        let active_sources: Vec<&Source> = sources::enabled_for(category)
            .filter(|s| !self.is_disabled(s.id).await)
            .collect();

        if active_sources.is_empty() {
            return Ok(0);
        }

        let mut set = tokio::task::JoinSet::new();
        for source in active_sources.clone() {
            let global_sem = self.global_sem.clone();
            let host = host_of(source.url);
            let host_sem = self.host_semaphore(&host).await;
            let client = self.client.clone();
            let source_id = source.id;
            let url = source.url.to_string();
            set.spawn(async move {
                let _global_permit = global_sem.acquire_owned().await.ok();
                let _host_permit = host_sem.acquire_owned().await.ok();
                let outcome = fetch_source_with_retry(&client, source_id, &url, category).await;
                (source_id, category, outcome)
            });
        }

        let mut ingested = 0usize;
        let mut all_failed = true;
        let mut cache = self.cache.write().await;
        let cat_cache = cache.entry(category).or_default();

        while let Some(joined) = set.join_next().await {
            let (source_id, category, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "feed fetch task panicked");
                    continue;
                }
            };
            match outcome {
                Ok((items, ttl_minutes)) => {
                    all_failed = false;
                    self.note_success(source_id).await;
                    let ttl = Duration::from_secs(
                        (ttl_minutes.map(|m| m as u64 * 60).unwrap_or(u64::MAX)).min(MAX_SOURCE_TTL.as_secs()),
                    );
                    ingested += items.len();
                    cat_cache
                        .per_source
                        .insert(source_id, (items, Utc::now(), ttl));
                }
                Err(err) => {
                    warn!(source = source_id, error = %err, "feed source failed");
                    self.note_failure(source_id, &err).await;
                }
            }
            let _ = category; // category is uniform across this refresh
        }
        drop(cache);

        self.record_cycle_outcome(category, all_failed).await;
        info!(category = ?category, ingested, "refresh complete");
        Ok(ingested)
    }

    async fn record_cycle_outcome(&self, category: Category, all_failed: bool) {
        let mut streak = self.outage_streak.lock().await;
        let entry = streak.entry(category).or_insert(0);
        if all_failed {
            *entry += 1;
            if *entry >= 2 {
                warn!(category = ?category, "upstream outage: all sources failed for two consecutive cycles");
            }
        } else {
            *entry = 0;
        }
    }

    /// Whether `category` is currently in an `UpstreamOutage` condition —
    /// all sources failed for two consecutive refresh cycles.
    pub async fn is_outage(&self, category: Category) -> bool {
        let streak = self.outage_streak.lock().await;
        streak.get(&category).copied().unwrap_or(0) >= 2
    }

    async fn is_disabled(&self, source_id: &'static str) -> bool {
        let runtime = self.source_runtime.lock().await;
        match runtime.get(source_id) {
            Some(r) if r.state == SourceState::Disabled => {
                r.disabled_until.map(|until| Utc::now() < until).unwrap_or(false)
            }
            _ => false,
        }
    }

    async fn note_success(&self, source_id: &'static str) {
        let mut runtime = self.source_runtime.lock().await;
        runtime.insert(source_id, SourceRuntime::default());
    }

    async fn note_failure(&self, source_id: &'static str, err: &DigestError) {
        let mut runtime = self.source_runtime.lock().await;
        let r = runtime.entry(source_id).or_default();
        if matches!(err, DigestError::UpstreamUnavailable(_)) {
            r.state = SourceState::Disabled;
            r.disabled_until = Some(Utc::now() + chrono::Duration::from_std(r.disable_interval).unwrap());
            r.disable_interval = (r.disable_interval * 2).min(MAX_DISABLE_INTERVAL);
        }
    }

    /// Returns cached items with `published_at >= since`, newest first.
    pub async fn recent(&self, category: Category, since: DateTime<Utc>) -> Vec<Item> {
        let cache = self.cache.read().await;
        cache.get(&category).map(|c| c.flatten(since)).unwrap_or_default()
    }

    /// Seeds the cache directly, bypassing `refresh`. Used by tests that
    /// need deterministic items without a real HTTP fetch.
    pub async fn test_insert_items(&self, category: Category, items: Vec<Item>) {
        let mut cache = self.cache.write().await;
        let cat_cache = cache.entry(category).or_default();
        cat_cache
            .per_source
            .insert("test-fixture", (items, Utc::now(), Duration::from_secs(600)));
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

/// Fetches and parses a single feed, retrying once on a transient error with
/// exponential backoff. Returns the normalized items plus the
/// feed-advertised TTL in minutes, if any.
async fn fetch_source_with_retry(
    client: &Client,
    source_id: &'static str,
    url: &str,
    category: Category,
) -> Result<(Vec<Item>, Option<u32>)> {
    let mut attempt = 0u32;
    loop {
        match fetch_source_once(client, source_id, url, category).await {
            Ok(v) => return Ok(v),
            Err(err) if err.is_retryable() && attempt < 1 => {
                attempt += 1;
                let backoff = BASE_BACKOFF * 2u32.pow(attempt - 1);
                warn!(url, attempt, ?backoff, "retrying feed fetch after transient failure");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn fetch_source_once(
    client: &Client,
    source_id: &'static str,
    url: &str,
    category: Category,
) -> Result<(Vec<Item>, Option<u32>)> {
    let resp = tokio::time::timeout(REQUEST_TIMEOUT, client.get(url).send())
        .await
        .map_err(|_| DigestError::UpstreamTransient(format!("{source_id}: request timed out")))?
        .map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DigestError::UpstreamTransient(format!("{source_id}: {e}"))
            } else {
                DigestError::UpstreamUnavailable(format!("{source_id}: {e}"))
            }
        })?;

    if resp.status().is_server_error() {
        return Err(DigestError::UpstreamTransient(format!(
            "{source_id}: HTTP {}",
            resp.status()
        )));
    }
    if !resp.status().is_success() {
        return Err(DigestError::UpstreamUnavailable(format!(
            "{source_id}: HTTP {}",
            resp.status()
        )));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| DigestError::UpstreamTransient(format!("{source_id}: {e}")))?;

    let feed = feed_rs::parser::parse(Cursor::new(&bytes[..]))
        .map_err(|e| DigestError::UpstreamUnavailable(format!("{source_id}: parse error: {e}")))?;

    let fetched_at = Utc::now();
    Ok((
        feed.entries
            .iter()
            .filter_map(|e| entry_to_item(e, source_id, category, fetched_at))
            .collect(),
        feed.ttl,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_filters_by_since_and_sorts_desc() {
        let fetcher = FeedFetcher::new(Client::new(), 4, 2);
        let now = Utc::now();
        let mut cache = fetcher.cache.write().await;
        let cat = cache.entry(Category::Local).or_default();
        cat.per_source.insert(
            "src-a",
            (
                vec![
                    Item::new("src-a", Category::Local, "old", "u1", now - chrono::Duration::hours(5), now, false),
                    Item::new("src-a", Category::Local, "new", "u2", now - chrono::Duration::minutes(5), now, false),
                ],
                now,
                Duration::from_secs(600),
            ),
        );
        drop(cache);

        let items = fetcher.recent(Category::Local, now - chrono::Duration::hours(1)).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "new");
    }

    #[tokio::test]
    async fn outage_detected_after_two_failed_cycles() {
        let fetcher = FeedFetcher::new(Client::new(), 4, 2);
        fetcher.record_cycle_outcome(Category::Global, true).await;
        assert!(!fetcher.is_outage(Category::Global).await);
        fetcher.record_cycle_outcome(Category::Global, true).await;
        assert!(fetcher.is_outage(Category::Global).await);
        fetcher.record_cycle_outcome(Category::Global, false).await;
        assert!(!fetcher.is_outage(Category::Global).await);
    }
}
