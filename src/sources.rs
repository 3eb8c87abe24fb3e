use crate::model::{Category, Source};

/// Static per-category feed registration.
pub const SOURCES: &[Source] = &[
    Source { id: "bbc-world", category: Category::Global, url: "https://feeds.bbci.co.uk/news/world/rss.xml", reliability_weight: 1.4, enabled: true },
    Source { id: "reuters-world", category: Category::Global, url: "https://feeds.reuters.com/Reuters/worldNews", reliability_weight: 1.4, enabled: true },
    Source { id: "aljazeera-world", category: Category::Global, url: "https://www.aljazeera.com/xml/rss/all.xml", reliability_weight: 1.2, enabled: true },
    Source { id: "npr-world", category: Category::Global, url: "https://feeds.npr.org/1004/rss.xml", reliability_weight: 1.2, enabled: true },
    Source { id: "dw-world", category: Category::Global, url: "https://rss.dw.com/rdf/rss-en-world", reliability_weight: 1.1, enabled: true },

    Source { id: "dhaka-tribune", category: Category::Local, url: "https://www.dhakatribune.com/feed", reliability_weight: 1.0, enabled: true },
    Source { id: "daily-star-bd", category: Category::Local, url: "https://www.thedailystar.net/rss.xml", reliability_weight: 1.1, enabled: true },
    Source { id: "prothomalo-en", category: Category::Local, url: "https://en.prothomalo.com/feed", reliability_weight: 1.0, enabled: true },
    Source { id: "bss-news", category: Category::Local, url: "http://www.bssnews.net/rss.xml", reliability_weight: 0.9, enabled: true },
    Source { id: "tbs-news", category: Category::Local, url: "https://www.tbsnews.net/rss.xml", reliability_weight: 1.0, enabled: true },

    Source { id: "techcrunch", category: Category::Tech, url: "https://techcrunch.com/feed/", reliability_weight: 1.3, enabled: true },
    Source { id: "ars-technica", category: Category::Tech, url: "https://feeds.arstechnica.com/arstechnica/index", reliability_weight: 1.3, enabled: true },
    Source { id: "theverge", category: Category::Tech, url: "https://www.theverge.com/rss/index.xml", reliability_weight: 1.2, enabled: true },
    Source { id: "wired", category: Category::Tech, url: "https://www.wired.com/feed/rss", reliability_weight: 1.2, enabled: true },
    Source { id: "hn-frontpage", category: Category::Tech, url: "https://hnrss.org/frontpage", reliability_weight: 1.0, enabled: true },

    Source { id: "espn-top", category: Category::Sports, url: "https://www.espn.com/espn/rss/news", reliability_weight: 1.2, enabled: true },
    Source { id: "bbc-sport", category: Category::Sports, url: "https://feeds.bbci.co.uk/sport/rss.xml", reliability_weight: 1.3, enabled: true },
    Source { id: "skysports", category: Category::Sports, url: "https://www.skysports.com/rss/12040", reliability_weight: 1.1, enabled: true },
    Source { id: "cricbuzz", category: Category::Sports, url: "https://www.cricbuzz.com/rss-feed", reliability_weight: 1.0, enabled: true },
    Source { id: "goal-com", category: Category::Sports, url: "https://www.goal.com/feeds/en/news", reliability_weight: 0.9, enabled: true },

    Source { id: "coindesk", category: Category::FinanceCrypto, url: "https://www.coindesk.com/arc/outboundfeeds/rss/", reliability_weight: 1.3, enabled: true },
    Source { id: "cointelegraph", category: Category::FinanceCrypto, url: "https://cointelegraph.com/rss", reliability_weight: 1.2, enabled: true },
    Source { id: "decrypt", category: Category::FinanceCrypto, url: "https://decrypt.co/feed", reliability_weight: 1.1, enabled: true },
    Source { id: "theblock", category: Category::FinanceCrypto, url: "https://www.theblock.co/rss.xml", reliability_weight: 1.2, enabled: true },
    Source { id: "bloomberg-markets", category: Category::FinanceCrypto, url: "https://feeds.bloomberg.com/markets/news.rss", reliability_weight: 1.3, enabled: true },
];

pub fn enabled_for(category: Category) -> impl Iterator<Item = &'static Source> {
    SOURCES
        .iter()
        .filter(move |s| s.category == category && s.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_sources() {
        for category in Category::ALL {
            assert!(
                enabled_for(category).count() >= 1,
                "{category:?} has no registered sources"
            );
        }
    }

    #[test]
    fn reliability_weights_in_range() {
        for s in SOURCES {
            assert!(s.reliability_weight >= 0.5 && s.reliability_weight <= 1.5);
        }
    }
}
