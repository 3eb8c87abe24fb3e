use crate::model::{Category, MarketSnapshot, Slot, WeatherSnapshot};
use crate::select::SelectedItem;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

/// Conservative Markdown transport limit; kept a little under
/// Telegram's actual 4096-char cap to leave headroom for the `(i/N)` marker.
const MESSAGE_SIZE_LIMIT: usize = 3900;

static MD_METACHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\*_\[\]])").unwrap());

/// Escapes the conservative Markdown subset's metacharacters so a title containing them still renders
/// as plain text and doesn't break a surrounding `[title](url)` link.
pub fn escape_markdown(text: &str) -> String {
    MD_METACHARS.replace_all(text, r"\$1").to_string()
}

fn relative_age(published_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now - published_at;
    if delta.num_minutes() < 1 {
        "just now".to_string()
    } else if delta.num_hours() < 1 {
        format!("{}m ago", delta.num_minutes())
    } else if delta.num_hours() < 24 {
        format!("{}h ago", delta.num_hours())
    } else {
        format!("{}d ago", delta.num_days())
    }
}

fn render_category_block(category: Category, items: &[SelectedItem], now: DateTime<Utc>) -> String {
    let mut lines = vec![format!("*{}*", escape_markdown(category.label()))];
    for (idx, item) in items.iter().enumerate() {
        let n = idx + 1;
        match item {
            SelectedItem::Real(item) => {
                lines.push(format!(
                    "{n}. [{title}]({url}) — {source} ({age})",
                    title = escape_markdown(&item.title),
                    url = item.url,
                    source = escape_markdown(&item.source_id),
                    age = relative_age(item.published_at, now),
                ));
            }
            SelectedItem::Placeholder => {
                lines.push(format!("{n}. (no further recent items)"));
            }
        }
    }
    lines.join("\n")
}

fn render_weather_block(weather: Option<&WeatherSnapshot>) -> String {
    match weather {
        Some(w) => format!(
            "{min:.0}–{max:.0}°C, {cond} · AQI {aqi} · UV {uv:.0}",
            min = w.temp_c_min,
            max = w.temp_c_max,
            cond = escape_markdown(&w.condition),
            aqi = w.aqi,
            uv = w.uv,
        ),
        None => "weather data temporarily unavailable".to_string(),
    }
}

fn render_market_block(snapshot: Option<&MarketSnapshot>, commentary: Option<&str>) -> String {
    let Some(snap) = snapshot else {
        return "*Market*\nmarket data temporarily unavailable".to_string();
    };

    let mut lines = vec!["*Market*".to_string()];
    lines.push(format!(
        "Cap ${cap:.1}B · Vol ${vol:.1}B · Fear&Greed {fng}",
        cap = snap.total_cap_usd / 1e9,
        vol = snap.total_volume_usd / 1e9,
        fng = snap.fear_greed_index,
    ));

    lines.push("Gainers:".to_string());
    for m in &snap.gainers {
        lines.push(format!("  {} {:+.2}% (${:.4})", m.symbol, m.pct_change_24h, m.price));
    }
    lines.push("Losers:".to_string());
    for m in &snap.losers {
        lines.push(format!("  {} {:+.2}% (${:.4})", m.symbol, m.pct_change_24h, m.price));
    }
    if !snap.index_quotes.is_empty() {
        lines.push("Indices:".to_string());
        for q in &snap.index_quotes {
            lines.push(format!("  {} {:.2} ({:+.2}%)", q.symbol, q.value, q.pct_change));
        }
    }
    match commentary {
        Some(text) => lines.push(format!("_{}_", escape_markdown(text))),
        None => lines.push("market commentary temporarily unavailable".to_string()),
    }
    lines.join("\n")
}

/// Everything needed to render one digest.
pub struct DigestInput<'a> {
    pub slot: Slot,
    pub now_utc: DateTime<Utc>,
    pub timezone: Tz,
    pub holiday: Option<&'a str>,
    pub weather: Option<&'a WeatherSnapshot>,
    pub categories: Vec<(Category, Vec<SelectedItem>)>,
    pub market: Option<&'a MarketSnapshot>,
    pub commentary: Option<&'a str>,
}

const FOOTER: &str = "— sent by your news digest bot";

/// Composes the full digest text in the a fixed order, splitting
/// after category boundaries and numbering parts `(i/N)` if the rendered
/// text would exceed the transport's size limit.
pub fn compose(input: &DigestInput) -> Vec<String> {
    let local = input.now_utc.with_timezone(&input.timezone);
    let header = format!(
        "*{date}* — {slot} ({offset})",
        date = local.format("%A, %B %d %Y"),
        slot = input.slot.label(),
        offset = local.format("%z"),
    );

    let mut preamble = vec![header];
    if let Some(holiday) = input.holiday {
        preamble.push(format!("🎉 {}", escape_markdown(holiday)));
    }
    preamble.push(render_weather_block(input.weather));
    let preamble = preamble.join("\n");

    let mut blocks: Vec<String> = Vec::new();
    for (category, items) in &input.categories {
        blocks.push(render_category_block(*category, items, input.now_utc));
    }
    blocks.push(render_market_block(input.market, input.commentary));
    blocks.push(FOOTER.to_string());

    let parts = pack_blocks(&preamble, &blocks);
    number_parts(parts)
}

/// Greedily packs the preamble + atomic blocks into parts under the size
/// limit, splitting only at block boundaries.
fn pack_blocks(preamble: &str, blocks: &[String]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = preamble.to_string();
    let mut current_has_block = false;

    for block in blocks {
        let candidate_len = current.len() + 2 + block.len();
        if current_has_block && candidate_len > MESSAGE_SIZE_LIMIT {
            parts.push(std::mem::take(&mut current));
            current = block.clone();
        } else {
            current.push_str("\n\n");
            current.push_str(block);
        }
        current_has_block = true;
    }
    parts.push(current);
    parts
}

fn number_parts(mut parts: Vec<String>) -> Vec<String> {
    let total = parts.len();
    if total <= 1 {
        return parts;
    }
    for (idx, part) in parts.iter_mut().enumerate() {
        part.push_str(&format!("\n\n({}/{})", idx + 1, total));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Item;

    fn sample_item(title: &str) -> SelectedItem {
        let now = Utc::now();
        SelectedItem::Real(Item::new("src", Category::Local, title, "https://x/y", now, now, false))
    }

    #[test]
    fn escapes_conservative_metacharacters() {
        let escaped = escape_markdown("Breaking *big* news [now]");
        assert_eq!(escaped, r"Breaking \*big\* news \[now\]");
        assert!(!escaped.contains("*big*"));
    }

    #[test]
    fn category_block_has_exactly_five_numbered_lines() {
        let items: Vec<SelectedItem> = (0..5).map(|i| sample_item(&format!("title {i}"))).collect();
        let block = render_category_block(Category::Local, &items, Utc::now());
        let numbered = block.lines().filter(|l| l.starts_with(|c: char| c.is_ascii_digit())).count();
        assert_eq!(numbered, 5);
    }

    #[test]
    fn market_block_falls_back_when_snapshot_missing() {
        let block = render_market_block(None, None);
        assert!(block.contains("temporarily unavailable"));
    }

    #[test]
    fn compose_single_part_has_no_part_marker() {
        let categories: Vec<(Category, Vec<SelectedItem>)> = Category::ALL
            .into_iter()
            .map(|c| (c, (0..5).map(|i| sample_item(&format!("{c:?}-{i}"))).collect()))
            .collect();
        let input = DigestInput {
            slot: Slot::Morning,
            now_utc: Utc::now(),
            timezone: chrono_tz::Asia::Dhaka,
            holiday: None,
            weather: None,
            categories,
            market: None,
            commentary: None,
        };
        let parts = compose(&input);
        assert_eq!(parts.len(), 1);
        assert!(!parts[0].contains("(1/1)"));
    }

    #[test]
    fn compose_splits_into_numbered_parts_when_oversized() {
        let huge_title = "x".repeat(1000);
        let categories: Vec<(Category, Vec<SelectedItem>)> = Category::ALL
            .into_iter()
            .map(|c| (c, (0..5).map(|_| sample_item(&huge_title)).collect()))
            .collect();
        let input = DigestInput {
            slot: Slot::Night,
            now_utc: Utc::now(),
            timezone: chrono_tz::UTC,
            holiday: None,
            weather: None,
            categories,
            market: None,
            commentary: None,
        };
        let parts = compose(&input);
        assert!(parts.len() > 1);
        assert!(parts[0].contains(&format!("(1/{})", parts.len())));
    }
}
