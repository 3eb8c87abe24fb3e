pub mod ai;
pub mod indicators;
pub mod market;

pub use ai::AiCommentaryProvider;
pub use indicators::{Candle, Signal, VolumeLevel};
pub use market::MarketDataProvider;

use crate::error::{DigestError, Result};
use crate::model::{IndexQuote as ModelIndexQuote, MarketSnapshot, Mover};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::warn;

const SNAPSHOT_TTL: Duration = Duration::from_secs(3 * 60);
const COMMENTARY_MIN_INTERVAL: Duration = Duration::from_secs(30);
const TOP_N_COINS: usize = 200;
const GAINERS_LOSERS_COUNT: usize = 5;
const SUPPORT_RESISTANCE_LOOKBACK: usize = 20;
const RSI_PERIOD: usize = 14;
const CANDLE_DAYS: u32 = 30;

/// Crypto-market intelligence composer: price snapshots, AI
/// commentary, and the on-demand coin-detail operation.
pub struct CryptoComposer {
    market: Arc<dyn MarketDataProvider>,
    ai: Arc<dyn AiCommentaryProvider>,
    snapshot_cache: RwLock<Option<(Instant, MarketSnapshot)>>,
    commentary_cache: Mutex<Option<(Instant, String)>>,
}

impl CryptoComposer {
    pub fn new(market: Arc<dyn MarketDataProvider>, ai: Arc<dyn AiCommentaryProvider>) -> Self {
        Self {
            market,
            ai,
            snapshot_cache: RwLock::new(None),
            commentary_cache: Mutex::new(None),
        }
    }

    /// Returns a cached snapshot if fresh, else recomputes it. Cached 2-5
    /// minutes; this composer uses 3 minutes as its point within that range.
    pub async fn snapshot(&self) -> Result<MarketSnapshot> {
        {
            let cache = self.snapshot_cache.read().await;
            if let Some((taken, snap)) = cache.as_ref() {
                if taken.elapsed() < SNAPSHOT_TTL {
                    return Ok(snap.clone());
                }
            }
        }

        let snap = self.compute_snapshot().await?;
        let mut cache = self.snapshot_cache.write().await;
        *cache = Some((Instant::now(), snap.clone()));
        Ok(snap)
    }

    async fn compute_snapshot(&self) -> Result<MarketSnapshot> {
        let aggregates = self.market.global_aggregates().await?;
        let mut coins = self.market.top_coins(TOP_N_COINS).await?;
        let indices = self.market.index_quotes().await.unwrap_or_default();

        coins.sort_by(|a, b| b.pct_change_24h.partial_cmp(&a.pct_change_24h).unwrap_or(std::cmp::Ordering::Equal));
        let gainers: Vec<Mover> = coins
            .iter()
            .take(GAINERS_LOSERS_COUNT)
            .map(|c| Mover { symbol: c.symbol.clone(), price: c.price, pct_change_24h: c.pct_change_24h })
            .collect();
        let losers: Vec<Mover> = coins
            .iter()
            .rev()
            .take(GAINERS_LOSERS_COUNT)
            .map(|c| Mover { symbol: c.symbol.clone(), price: c.price, pct_change_24h: c.pct_change_24h })
            .collect();

        Ok(MarketSnapshot {
            taken_at: Utc::now(),
            total_cap_usd: aggregates.total_cap_usd,
            total_volume_usd: aggregates.total_volume_usd,
            fear_greed_index: aggregates.fear_greed_index,
            gainers,
            losers,
            index_quotes: indices
                .into_iter()
                .map(|i| ModelIndexQuote { symbol: i.symbol, value: i.value, pct_change: i.pct_change })
                .collect(),
        })
    }

    /// ≤80-word sentiment + 24h bias from the AI provider, with a
    /// deterministic templated fallback on failure/timeout.
    /// Rate-limited to one call per 30s; concurrent callers within that
    /// window share the cached result.
    pub async fn commentary(&self, snapshot: &MarketSnapshot) -> String {
        {
            let cache = self.commentary_cache.lock().await;
            if let Some((at, text)) = cache.as_ref() {
                if at.elapsed() < COMMENTARY_MIN_INTERVAL {
                    return text.clone();
                }
            }
        }

        let prompt = build_prompt(snapshot);
        let text = match self.ai.commentary(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "AI commentary unavailable, using templated fallback");
                fallback_commentary(snapshot)
            }
        };

        let mut cache = self.commentary_cache.lock().await;
        *cache = Some((Instant::now(), text.clone()));
        text
    }

    /// On-demand coin detail: price, time-window changes, RSI(14),
    /// support/resistance, and a BUY/HOLD/WATCH/SELL signal.
    pub async fn coin_detail(&self, symbol: &str) -> Result<String> {
        let coins = self.market.top_coins(TOP_N_COINS).await?;
        let quote = coins
            .iter()
            .find(|c| c.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| DigestError::UpstreamUnavailable(format!("unknown symbol {symbol}")))?;

        let candles = self.market.candles(symbol, CANDLE_DAYS).await?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let rsi_14 = indicators::rsi(&closes, RSI_PERIOD);
        let sma_30 = indicators::simple_moving_average(&closes);
        let support_resistance = indicators::support_resistance(&candles, SUPPORT_RESISTANCE_LOOKBACK);

        let avg_volume = if coins.is_empty() {
            0.0
        } else {
            coins.iter().map(|c| c.volume_24h).sum::<f64>() / coins.len() as f64
        };
        let volume_level = if quote.volume_24h > avg_volume * 1.5 {
            VolumeLevel::High
        } else if quote.volume_24h < avg_volume * 0.5 {
            VolumeLevel::Low
        } else {
            VolumeLevel::Normal
        };

        let signal = indicators::compute_signal(quote.pct_change_24h, rsi_14, quote.price, sma_30, volume_level);

        Ok(render_coin_detail(quote, rsi_14, support_resistance, signal))
    }
}

fn build_prompt(snapshot: &MarketSnapshot) -> String {
    format!(
        "Market cap ${:.0}B, 24h volume ${:.0}B, Fear & Greed {}. Top gainer {} ({:+.1}%), top loser {} ({:+.1}%). \
         In at most 80 words, give a brief sentiment read and a 24h directional bias.",
        snapshot.total_cap_usd / 1e9,
        snapshot.total_volume_usd / 1e9,
        snapshot.fear_greed_index,
        snapshot.gainers.first().map(|m| m.symbol.as_str()).unwrap_or("n/a"),
        snapshot.gainers.first().map(|m| m.pct_change_24h).unwrap_or(0.0),
        snapshot.losers.first().map(|m| m.symbol.as_str()).unwrap_or("n/a"),
        snapshot.losers.first().map(|m| m.pct_change_24h).unwrap_or(0.0),
    )
}

/// Deterministic fallback derived purely from the snapshot.
fn fallback_commentary(snapshot: &MarketSnapshot) -> String {
    let direction = if snapshot.total_volume_usd > 0.0 && snapshot.gainers.first().map(|g| g.pct_change_24h).unwrap_or(0.0) >= 0.0 {
        "up"
    } else {
        "down"
    };
    let lead = snapshot.gainers.first().map(|m| m.symbol.as_str()).unwrap_or("majors");
    format!(
        "Markets {} today, gainers led by {}. Fear & Greed at {}. No AI read available; treat as a neutral baseline for the next 24h.",
        direction, lead, snapshot.fear_greed_index
    )
}

fn render_coin_detail(
    quote: &market::CoinQuote,
    rsi_14: Option<f64>,
    support_resistance: Option<(f64, f64)>,
    signal: Signal,
) -> String {
    let rsi_text = match rsi_14 {
        Some(r) if r > 70.0 => format!("{r:.1} (overbought)"),
        Some(r) if r < 30.0 => format!("{r:.1} (oversold)"),
        Some(r) => format!("{r:.1} (neutral)"),
        None => "n/a (insufficient history)".to_string(),
    };
    let (support, resistance) = support_resistance.unwrap_or((quote.price, quote.price));

    format!(
        "{sym}: ${price:.4}\n1h {h1:+.2}% · 24h {h24:+.2}% · 7d {d7:+.2}% · 30d {d30:+.2}%\nRSI(14): {rsi_text}\nSupport ${support:.4} / Resistance ${resistance:.4}\nSignal: {signal}",
        sym = quote.symbol,
        price = quote.price,
        h1 = quote.pct_change_1h,
        h24 = quote.pct_change_24h,
        d7 = quote.pct_change_7d,
        d30 = quote.pct_change_30d,
        signal = signal.label(),
    )
}
