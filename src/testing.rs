//! In-memory fakes for the pipeline's external collaborators (transport,
//! weather, holiday, market data, AI commentary), shared between unit tests
//! and the end-to-end scenario tests under `tests/`. Not part of the
//! pipeline's runtime behavior.

use crate::crypto::{AiCommentaryProvider, Candle, MarketDataProvider};
use crate::crypto::market::{CoinQuote, GlobalAggregates, IndexQuote};
use crate::error::{DigestError, Result};
use crate::holiday::HolidayProvider;
use crate::model::WeatherSnapshot;
use crate::transport::{SendOutcome, Transport, TransportErrorKind, Update};
use crate::weather::WeatherProvider;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Replays a scripted sequence of send outcomes; falls back to success once
/// the script runs out.
pub struct FakeTransport {
    scripted: Mutex<Vec<Result<SendOutcome, TransportErrorKind>>>,
    updates: Mutex<Vec<Update>>,
    sent: Mutex<Vec<(i64, String)>>,
    call_count: AtomicUsize,
}

impl FakeTransport {
    pub fn new(scripted: Vec<Result<SendOutcome, TransportErrorKind>>) -> Self {
        Self {
            scripted: Mutex::new(scripted),
            updates: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(vec![])
    }

    pub fn with_updates(updates: Vec<Update>) -> Self {
        Self {
            scripted: Mutex::new(Vec::new()),
            updates: Mutex::new(updates),
            sent: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All message texts sent to `chat_id`, in send order.
    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        _markdown: bool,
    ) -> Result<SendOutcome, TransportErrorKind> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        let mut scripted = self.scripted.lock().unwrap();
        if scripted.is_empty() {
            Ok(SendOutcome { message_id: 0 })
        } else {
            scripted.remove(0)
        }
    }

    async fn get_updates(&self, _offset: i32) -> Result<Vec<Update>, TransportErrorKind> {
        Ok(std::mem::take(&mut self.updates.lock().unwrap()))
    }
}

pub struct FakeWeather(pub WeatherSnapshot);

#[async_trait]
impl WeatherProvider for FakeWeather {
    async fn current(&self, _location: &str) -> Result<WeatherSnapshot> {
        Ok(self.0.clone())
    }
}

pub struct FakeHoliday(pub Vec<String>);

#[async_trait]
impl HolidayProvider for FakeHoliday {
    async fn holidays(&self, _country: &str, _date: NaiveDate) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

pub struct FakeMarket {
    pub coins: Vec<CoinQuote>,
    pub candles: Vec<Candle>,
}

#[async_trait]
impl MarketDataProvider for FakeMarket {
    async fn global_aggregates(&self) -> Result<GlobalAggregates> {
        Ok(GlobalAggregates { total_cap_usd: 1.5e12, total_volume_usd: 6e10, fear_greed_index: 50 })
    }
    async fn top_coins(&self, _n: usize) -> Result<Vec<CoinQuote>> {
        Ok(self.coins.clone())
    }
    async fn index_quotes(&self) -> Result<Vec<IndexQuote>> {
        Ok(vec![])
    }
    async fn candles(&self, _symbol: &str, _days: u32) -> Result<Vec<Candle>> {
        Ok(self.candles.clone())
    }
}

pub struct FakeAi;

#[async_trait]
impl AiCommentaryProvider for FakeAi {
    async fn commentary(&self, _prompt: &str) -> Result<String> {
        Err(DigestError::UpstreamUnavailable("fake AI provider always unavailable".into()))
    }
}
