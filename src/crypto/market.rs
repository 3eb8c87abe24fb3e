use super::indicators::Candle;
use crate::error::{DigestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct GlobalAggregates {
    pub total_cap_usd: f64,
    pub total_volume_usd: f64,
    pub fear_greed_index: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinQuote {
    pub symbol: String,
    pub price: f64,
    pub pct_change_1h: f64,
    pub pct_change_24h: f64,
    pub pct_change_7d: f64,
    pub pct_change_30d: f64,
    pub volume_24h: f64,
}

#[derive(Debug, Clone)]
pub struct IndexQuote {
    pub symbol: String,
    pub value: f64,
    pub pct_change: f64,
}

/// Two-endpoint market-data contract plus a candle series for `coin_detail`.
/// Modeled as a trait so the Composer can be exercised against a fake in
/// tests.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn global_aggregates(&self) -> Result<GlobalAggregates>;
    async fn top_coins(&self, n: usize) -> Result<Vec<CoinQuote>>;
    async fn index_quotes(&self) -> Result<Vec<IndexQuote>>;
    async fn candles(&self, symbol: &str, days: u32) -> Result<Vec<Candle>>;
}

/// Minimum spacing between outbound calls to respect the provider's
/// free-tier rate limit.
const MIN_CALL_SPACING: Duration = Duration::from_secs(2);

/// HTTP-backed market data client: one shared `reqwest::Client`, small
/// `async fn`s per endpoint, `serde` response models.
pub struct HttpMarketProvider {
    client: Client,
    base_url: String,
    last_call: Arc<Mutex<Option<Instant>>>,
    dead_volume_floor: f64,
}

impl HttpMarketProvider {
    pub fn new(client: Client, base_url: impl Into<String>, dead_volume_floor: f64) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            last_call: Arc::new(Mutex::new(None)),
            dead_volume_floor,
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_CALL_SPACING {
                tokio::time::sleep(MIN_CALL_SPACING - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Deserialize)]
struct GlobalResponse {
    total_market_cap_usd: f64,
    total_volume_usd: f64,
    fear_greed_index: u8,
}

#[derive(Deserialize)]
struct CoinResponse {
    symbol: String,
    price: f64,
    pct_change_1h: f64,
    pct_change_24h: f64,
    pct_change_7d: f64,
    pct_change_30d: f64,
    volume_24h: f64,
}

#[derive(Deserialize)]
struct IndexResponse {
    symbol: String,
    value: f64,
    pct_change: f64,
}

#[derive(Deserialize)]
struct CandleResponse {
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[async_trait]
impl MarketDataProvider for HttpMarketProvider {
    async fn global_aggregates(&self) -> Result<GlobalAggregates> {
        self.throttle().await;
        let url = format!("{}/global", self.base_url);
        let resp: GlobalResponse = get_json(&self.client, &url).await?;
        Ok(GlobalAggregates {
            total_cap_usd: resp.total_market_cap_usd,
            total_volume_usd: resp.total_volume_usd,
            fear_greed_index: resp.fear_greed_index,
        })
    }

    async fn top_coins(&self, n: usize) -> Result<Vec<CoinQuote>> {
        self.throttle().await;
        let url = format!("{}/coins?limit={n}", self.base_url);
        let resp: Vec<CoinResponse> = get_json(&self.client, &url).await?;
        Ok(resp
            .into_iter()
            .filter(|c| c.volume_24h >= self.dead_volume_floor)
            .map(|c| CoinQuote {
                symbol: c.symbol,
                price: c.price,
                pct_change_1h: c.pct_change_1h,
                pct_change_24h: c.pct_change_24h,
                pct_change_7d: c.pct_change_7d,
                pct_change_30d: c.pct_change_30d,
                volume_24h: c.volume_24h,
            })
            .collect())
    }

    async fn index_quotes(&self) -> Result<Vec<IndexQuote>> {
        self.throttle().await;
        let url = format!("{}/indices", self.base_url);
        let resp: Vec<IndexResponse> = get_json(&self.client, &url).await?;
        Ok(resp
            .into_iter()
            .map(|i| IndexQuote {
                symbol: i.symbol,
                value: i.value,
                pct_change: i.pct_change,
            })
            .collect())
    }

    async fn candles(&self, symbol: &str, days: u32) -> Result<Vec<Candle>> {
        self.throttle().await;
        let url = format!("{}/candles/{symbol}?days={days}", self.base_url);
        let resp: Vec<CandleResponse> = get_json(&self.client, &url).await?;
        Ok(resp
            .into_iter()
            .map(|c| Candle {
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
            })
            .collect())
    }
}

async fn get_json<T: for<'de> Deserialize<'de>>(client: &Client, url: &str) -> Result<T> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| DigestError::UpstreamTransient(format!("market provider: {e}")))?;
    if !resp.status().is_success() {
        return Err(DigestError::UpstreamUnavailable(format!(
            "market provider: HTTP {}",
            resp.status()
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| DigestError::UpstreamUnavailable(format!("market provider: bad payload: {e}")))
}
