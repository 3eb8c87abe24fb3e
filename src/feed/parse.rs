use crate::model::{Category, Item};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use once_cell::sync::Lazy;
use regex::Regex;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Strips HTML tags and collapses whitespace.
pub fn strip_html(raw: &str) -> String {
    let no_tags = HTML_TAG.replace_all(raw, " ");
    no_tags.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn entry_title(entry: &Entry) -> Option<String> {
    let title = entry.title.as_ref().map(|t| strip_html(&t.content))?;
    (!title.is_empty()).then_some(title)
}

fn entry_link(entry: &Entry) -> Option<String> {
    if let Some(href) = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
        .map(|l| l.href.clone())
    {
        return Some(href);
    }
    entry.links.first().map(|l| l.href.clone())
}

/// Normalizes one feed entry into an `Item`, or `None` if it lacks a
/// resolvable title or URL (discarded).
pub fn entry_to_item(
    entry: &Entry,
    source_id: &str,
    category: Category,
    fetched_at: DateTime<Utc>,
) -> Option<Item> {
    let title = entry_title(entry)?;
    let url = entry_link(entry)?;
    if url.trim().is_empty() {
        return None;
    }

    let (published_at, time_estimated) = match entry.published.or(entry.updated) {
        Some(ts) => (ts.with_timezone(&Utc), false),
        None => (fetched_at, true),
    };

    Some(Item::new(
        source_id,
        category,
        title,
        url,
        published_at,
        fetched_at,
        time_estimated,
    ))
}
