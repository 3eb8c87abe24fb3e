use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// One of the five digest categories, in fixed display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Local,
    Global,
    Tech,
    Sports,
    FinanceCrypto,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Local,
        Category::Global,
        Category::Tech,
        Category::Sports,
        Category::FinanceCrypto,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Local => "Local",
            Category::Global => "Global",
            Category::Tech => "Tech",
            Category::Sports => "Sports",
            Category::FinanceCrypto => "Finance & Crypto",
        }
    }
}

/// A normalized ingested news entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub source_id: String,
    pub category: Category,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub time_estimated: bool,
    pub fingerprint: String,
}

impl Item {
    /// Builds an item, computing its fingerprint from the normalized title and source.
    pub fn new(
        source_id: impl Into<String>,
        category: Category,
        title: impl Into<String>,
        url: impl Into<String>,
        published_at: DateTime<Utc>,
        fetched_at: DateTime<Utc>,
        time_estimated: bool,
    ) -> Self {
        let source_id = source_id.into();
        let title = title.into();
        let fingerprint = fingerprint_of(&title, &source_id);
        Self {
            source_id,
            category,
            title,
            url: url.into(),
            published_at,
            fetched_at,
            time_estimated,
            fingerprint,
        }
    }

    pub fn age_against(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.published_at
    }
}

/// `fingerprint = hash(normalize(title) || "|" || source_id)`
/// Deliberately source-scoped: the same event from two feeds yields two fingerprints.
pub fn fingerprint_of(title: &str, source_id: &str) -> String {
    let normalized = normalize_title(title);
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(source_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercases and collapses whitespace so trivially-different renderings of the
/// same headline still hash the same.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Static per-category feed registration.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: &'static str,
    pub category: Category,
    pub url: &'static str,
    pub reliability_weight: f64,
    pub enabled: bool,
}

/// One of the four daily delivery slots, in subscriber-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Morning,
    Noon,
    Evening,
    Night,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Morning, Slot::Noon, Slot::Evening, Slot::Night];

    /// (hour, minute) the slot fires at, in local time.
    pub fn local_time(self) -> (u32, u32) {
        match self {
            Slot::Morning => (8, 0),
            Slot::Noon => (13, 0),
            Slot::Evening => (19, 0),
            Slot::Night => (23, 0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::Morning => "Morning",
            Slot::Noon => "Noon",
            Slot::Evening => "Evening",
            Slot::Night => "Night",
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Slot::Morning => "last_slot_sent_morning",
            Slot::Noon => "last_slot_sent_noon",
            Slot::Evening => "last_slot_sent_evening",
            Slot::Night => "last_slot_sent_night",
        }
    }
}

/// A registered recipient of scheduled digests.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub chat_id: i64,
    pub timezone: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_slot_sent: [Option<chrono::NaiveDate>; 4],
}

impl Subscriber {
    pub fn last_sent(&self, slot: Slot) -> Option<chrono::NaiveDate> {
        self.last_slot_sent[slot as usize]
    }
}

/// Top mover or index quote inside a `MarketSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mover {
    pub symbol: String,
    pub price: f64,
    pub pct_change_24h: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexQuote {
    pub symbol: String,
    pub value: f64,
    pub pct_change: f64,
}

/// Point-in-time crypto market summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub taken_at: DateTime<Utc>,
    pub total_cap_usd: f64,
    pub total_volume_usd: f64,
    pub fear_greed_index: u8,
    pub gainers: Vec<Mover>,
    pub losers: Vec<Mover>,
    pub index_quotes: Vec<IndexQuote>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub temp_c_min: f64,
    pub temp_c_max: f64,
    pub condition: String,
    pub aqi: u32,
    pub uv: f64,
}

#[derive(Debug, Clone)]
pub struct UserLogEntry {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub interaction_time: DateTime<Utc>,
    pub message_type: String,
    pub location: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_under_whitespace_changes() {
        let a = fingerprint_of("  Big   News  Today ", "bbc-world");
        let b = fingerprint_of("Big News Today", "bbc-world");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_is_source_scoped() {
        let a = fingerprint_of("Big News Today", "bbc-world");
        let b = fingerprint_of("Big News Today", "cnn-world");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_case_insensitive() {
        let a = fingerprint_of("Big News", "bbc-world");
        let b = fingerprint_of("big news", "bbc-world");
        assert_eq!(a, b);
    }
}
