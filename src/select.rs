use crate::dedup::DedupStore;
use crate::feed::FeedFetcher;
use crate::model::{Category, Item};
use crate::sources;
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

pub const HORIZON_HOURS: i64 = 3;
pub const FALLBACK_HORIZON_HOURS: i64 = 48;
const PER_SOURCE_CAP: usize = 3;
const TARGET_COUNT: usize = 5;

/// One slot in a rendered category block: a real item, or a structured
/// placeholder when the Selection Engine is starved. Placeholders carry no fingerprint and are never
/// passed to `DedupStore::mark_sent`.
#[derive(Debug, Clone)]
pub enum SelectedItem {
    Real(Item),
    Placeholder,
}

fn reliability_weight_of(source_id: &str) -> f64 {
    sources::SOURCES
        .iter()
        .find(|s| s.id == source_id)
        .map(|s| s.reliability_weight)
        .unwrap_or(1.0)
}

fn score(item: &Item, now: DateTime<Utc>, horizon_hours: f64) -> f64 {
    let age_hours = (now - item.published_at).num_seconds() as f64 / 3600.0;
    let recency_score = (1.0 - age_hours / horizon_hours).max(0.0);
    let reliability = reliability_weight_of(&item.source_id);
    let penalty = if item.time_estimated { 1.0 } else { 0.0 };
    recency_score * 0.6 + reliability * 0.3 - penalty * 0.1
}

/// Ranks candidates and greedily fills up to `TARGET_COUNT`
/// slots honoring the per-source cap (step 3).
fn rank_and_pick(mut candidates: Vec<Item>, now: DateTime<Utc>, horizon_hours: i64) -> Vec<Item> {
    candidates.sort_by(|a, b| {
        let sa = score(a, now, horizon_hours as f64);
        let sb = score(b, now, horizon_hours as f64);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.published_at.cmp(&a.published_at))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });

    let mut per_source: HashMap<&str, usize> = HashMap::new();
    let mut picked = Vec::with_capacity(TARGET_COUNT);
    for item in candidates {
        if picked.len() == TARGET_COUNT {
            break;
        }
        let count = per_source.entry(item.source_id.as_str()).or_insert(0);
        if *count >= PER_SOURCE_CAP {
            continue;
        }
        *count += 1;
        picked.push(item);
    }
    picked
}

/// Picks exactly five items for `(chat_id, category)`. Does not
/// itself call `mark_sent` — the Assembler does, only after transport ack.
pub async fn select_five(
    fetcher: &FeedFetcher,
    dedup: &DedupStore,
    chat_id: i64,
    category: Category,
    now: DateTime<Utc>,
) -> Result<Vec<SelectedItem>> {
    let picked = select_candidates(fetcher, dedup, chat_id, category, now, HORIZON_HOURS).await?;

    let picked = if picked.len() < TARGET_COUNT {
        select_candidates(fetcher, dedup, chat_id, category, now, FALLBACK_HORIZON_HOURS).await?
    } else {
        picked
    };

    let mut out: Vec<SelectedItem> = picked.into_iter().map(SelectedItem::Real).collect();
    while out.len() < TARGET_COUNT {
        out.push(SelectedItem::Placeholder);
    }
    Ok(out)
}

async fn select_candidates(
    fetcher: &FeedFetcher,
    dedup: &DedupStore,
    chat_id: i64,
    category: Category,
    now: DateTime<Utc>,
    horizon_hours: i64,
) -> Result<Vec<Item>> {
    let since = now - ChronoDuration::hours(horizon_hours);
    let candidates = fetcher.recent(category, since).await;

    let mut unseen = Vec::with_capacity(candidates.len());
    for item in candidates {
        if !dedup.has_seen(chat_id, &item.fingerprint).await? {
            unseen.push(item);
        }
    }

    Ok(rank_and_pick(unseen, now, horizon_hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupStore;
    use crate::feed::FeedFetcher;

    fn item(source: &str, title: &str, minutes_ago: i64, estimated: bool) -> Item {
        let now = Utc::now();
        Item::new(
            source,
            Category::Local,
            title,
            format!("https://x/{title}"),
            now - ChronoDuration::minutes(minutes_ago),
            now,
            estimated,
        )
    }

    #[test]
    fn per_source_cap_is_enforced() {
        let now = Utc::now();
        let candidates = vec![
            item("a", "1", 1, false),
            item("a", "2", 2, false),
            item("a", "3", 3, false),
            item("a", "4", 4, false),
            item("b", "5", 5, false),
        ];
        let picked = rank_and_pick(candidates, now, HORIZON_HOURS);
        let from_a = picked.iter().filter(|i| i.source_id == "a").count();
        assert!(from_a <= 3);
        assert_eq!(picked.len(), 4); // 3 from a + 1 from b
    }

    #[test]
    fn fresher_items_rank_higher_than_estimated_older_ones() {
        let now = Utc::now();
        let fresh = item("a", "fresh", 5, false);
        let estimated = item("a", "stale-estimated", 170, true);
        let picked = rank_and_pick(vec![estimated, fresh], now, HORIZON_HOURS);
        assert_eq!(picked[0].title, "fresh");
    }

    #[tokio::test]
    async fn fills_placeholders_when_starved() {
        let fetcher = FeedFetcher::new(reqwest::Client::new(), 4, 2);
        let dedup = DedupStore::open_in_memory().unwrap();
        let selected = select_five(&fetcher, &dedup, 1, Category::Local, Utc::now())
            .await
            .unwrap();
        assert_eq!(selected.len(), 5);
        assert!(selected.iter().all(|s| matches!(s, SelectedItem::Placeholder)));
    }

    #[tokio::test]
    async fn excludes_previously_seen_fingerprints() {
        let fetcher = FeedFetcher::new(reqwest::Client::new(), 4, 2);
        let dedup = DedupStore::open_in_memory().unwrap();
        let now = Utc::now();

        let seen_item = item("a", "already-sent", 5, false);
        dedup
            .mark_sent(1, &seen_item.fingerprint, Category::Local, now)
            .await
            .unwrap();

        fetcher
            .test_insert_items(Category::Local, vec![seen_item, item("a", "new-one", 6, false)])
            .await;

        let selected = select_five(&fetcher, &dedup, 1, Category::Local, now).await.unwrap();
        let titles: Vec<String> = selected
            .into_iter()
            .filter_map(|s| match s {
                SelectedItem::Real(i) => Some(i.title),
                SelectedItem::Placeholder => None,
            })
            .collect();
        assert!(titles.contains(&"new-one".to_string()));
        assert!(!titles.contains(&"already-sent".to_string()));
    }
}
