use crate::backend::StreamItem;
use crate::translator::Translate;
use crate::types::ItemContent;
use rand::Rng;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Result of enriching one feed's batch: the items that survived, and the
/// watermark candidate derived from the batch's newest crawl time. The
/// candidate is present whenever the batch carried any parseable crawl
/// time, even if every item was later skipped.
#[derive(Debug, Default)]
pub struct FeedUpdate {
    pub items: Vec<ItemContent>,
    pub next_token: Option<String>,
}

fn discussion_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://news\.ycombinator\.com/item\?id=\d+").expect("valid discussion pattern")
    })
}

/// Turns raw stream items into persistable content: translates titles,
/// resolves links, and derives the feed's next watermark candidate.
pub struct Enricher {
    translator: Arc<dyn Translate>,
    content_link_feeds: HashSet<String>,
    max_pause_secs: u64,
}

impl Enricher {
    pub fn new(
        translator: Arc<dyn Translate>,
        content_link_feeds: HashSet<String>,
        max_pause_secs: u64,
    ) -> Self {
        Self {
            translator,
            content_link_feeds,
            max_pause_secs,
        }
    }

    pub async fn enrich_batch(&self, feed_id: &str, items: &[StreamItem]) -> FeedUpdate {
        let next_token = batch_watermark(items);
        let rewrite_links = self.content_link_feeds.contains(feed_id);
        let mut enriched = Vec::new();

        for item in items {
            let title = match item.title.as_deref().filter(|t| !t.is_empty()) {
                Some(title) => title,
                None => {
                    warn!("Skipping item without title in {}", feed_id);
                    continue;
                }
            };

            let canonical = item
                .canonical
                .first()
                .and_then(|l| l.href.as_deref())
                .filter(|href| !href.is_empty());
            let canonical = match canonical {
                Some(href) => href,
                None => {
                    warn!("Skipping item without canonical link in {}", feed_id);
                    continue;
                }
            };
            if Url::parse(canonical).is_err() {
                warn!("Skipping item with unparseable canonical link in {}", feed_id);
                continue;
            }

            let link = if rewrite_links {
                rewrite_link(canonical, item.summary.as_ref().map_or("", |s| s.content.as_str()))
            } else {
                canonical.to_string()
            };

            let cn_title = self.translator.translate(title).await;

            enriched.push(ItemContent {
                cn_title,
                title: title.to_string(),
                link,
            });

            self.pause().await;
        }

        debug!(
            "Enriched {}/{} items for {} (next token {:?})",
            enriched.len(),
            items.len(),
            feed_id,
            next_token
        );

        FeedUpdate {
            items: enriched,
            next_token,
        }
    }

    /// Courtesy throttle between items, so the translation endpoint never
    /// sees a burst. Zeroed out in tests.
    async fn pause(&self) {
        if self.max_pause_secs == 0 {
            return;
        }
        let secs = rand::rng().random_range(0..self.max_pause_secs);
        if secs > 0 {
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
    }
}

/// Watermark candidate for a batch: the largest crawl timestamp in the
/// batch, floored to seconds, plus one. The backend does not guarantee that
/// item 0 is newest, so the whole batch is scanned.
pub fn batch_watermark(items: &[StreamItem]) -> Option<String> {
    items
        .iter()
        .filter_map(|item| item.crawl_time_msec.as_deref())
        .filter_map(|raw| raw.parse::<i64>().ok())
        .max()
        .map(|millis| (millis / 1000 + 1).to_string())
}

/// For discussion-flagged feeds: first discussion URL found in the summary
/// HTML wins, otherwise the canonical link stands.
fn rewrite_link(canonical: &str, summary_html: &str) -> String {
    match discussion_pattern().find(summary_html) {
        Some(m) => m.as_str().to_string(),
        None => canonical.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CanonicalLink, Summary};
    use async_trait::async_trait;

    struct EchoTranslator;

    #[async_trait]
    impl Translate for EchoTranslator {
        async fn translate(&self, text: &str) -> String {
            format!("[{}]", text)
        }
    }

    struct SilentTranslator;

    #[async_trait]
    impl Translate for SilentTranslator {
        async fn translate(&self, _text: &str) -> String {
            String::new()
        }
    }

    fn item(title: Option<&str>, crawl: Option<&str>, href: Option<&str>) -> StreamItem {
        StreamItem {
            title: title.map(str::to_string),
            crawl_time_msec: crawl.map(str::to_string),
            canonical: href
                .map(|h| {
                    vec![CanonicalLink {
                        href: Some(h.to_string()),
                    }]
                })
                .unwrap_or_default(),
            summary: None,
        }
    }

    fn enricher(translator: Arc<dyn Translate>, content_feeds: &[&str]) -> Enricher {
        Enricher::new(
            translator,
            content_feeds.iter().map(|s| s.to_string()).collect(),
            0,
        )
    }

    #[test]
    fn watermark_is_floor_seconds_plus_one() {
        let items = vec![item(None, Some("1700000000000"), None)];
        assert_eq!(batch_watermark(&items).as_deref(), Some("1700000001"));
    }

    #[test]
    fn watermark_takes_batch_maximum_not_index_zero() {
        let items = vec![
            item(None, Some("1700000000000"), None),
            item(None, Some("1700000500000"), None),
            item(None, Some("1700000200000"), None),
        ];
        assert_eq!(batch_watermark(&items).as_deref(), Some("1700000501"));
    }

    #[test]
    fn watermark_ignores_unparseable_crawl_times() {
        let items = vec![
            item(None, Some("not-a-number"), None),
            item(None, Some("1700000000000"), None),
        ];
        assert_eq!(batch_watermark(&items).as_deref(), Some("1700000001"));
        assert_eq!(batch_watermark(&[item(None, None, None)]), None);
    }

    #[test]
    fn rewrite_prefers_discussion_url_match() {
        let summary = r#"<p>Comments: <a href="https://news.ycombinator.com/item?id=424242">here</a></p>"#;
        assert_eq!(
            rewrite_link("http://x/1", summary),
            "https://news.ycombinator.com/item?id=424242"
        );
        assert_eq!(rewrite_link("http://x/1", "<p>no comments</p>"), "http://x/1");
    }

    #[tokio::test]
    async fn malformed_items_are_skipped_but_watermark_advances() {
        let items = vec![
            item(None, Some("1700000900000"), Some("http://x/0")),
            item(Some("Kept"), Some("1700000000000"), Some("http://x/1")),
            item(Some("No link"), Some("1700000100000"), None),
        ];
        let update = enricher(Arc::new(EchoTranslator), &[]).enrich_batch("feed/1", &items).await;
        assert_eq!(update.items.len(), 1);
        assert_eq!(update.items[0].title, "Kept");
        assert_eq!(update.next_token.as_deref(), Some("1700000901"));
    }

    #[tokio::test]
    async fn invalid_canonical_link_is_skipped_but_watermark_advances() {
        let items = vec![
            item(Some("Bad link"), Some("1700000300000"), Some("not a url")),
            item(Some("Kept"), Some("1700000000000"), Some("http://x/1")),
        ];
        let update = enricher(Arc::new(EchoTranslator), &[]).enrich_batch("feed/1", &items).await;
        assert_eq!(update.items.len(), 1);
        assert_eq!(update.items[0].title, "Kept");
        assert_eq!(update.next_token.as_deref(), Some("1700000301"));
    }

    #[tokio::test]
    async fn translation_failure_keeps_the_item() {
        let items = vec![item(Some("Hello"), Some("1700000000000"), Some("http://x/1"))];
        let update = enricher(Arc::new(SilentTranslator), &[]).enrich_batch("feed/1", &items).await;
        assert_eq!(update.items.len(), 1);
        assert_eq!(update.items[0].cn_title, "");
        assert_eq!(update.items[0].title, "Hello");
    }

    #[tokio::test]
    async fn discussion_rewrite_applies_only_to_flagged_feeds() {
        let mut hn_item = item(Some("Story"), Some("1700000000000"), Some("http://x/1"));
        hn_item.summary = Some(Summary {
            content: "https://news.ycombinator.com/item?id=7".to_string(),
        });

        let flagged = enricher(Arc::new(EchoTranslator), &["feed/hn"])
            .enrich_batch("feed/hn", std::slice::from_ref(&hn_item))
            .await;
        assert_eq!(flagged.items[0].link, "https://news.ycombinator.com/item?id=7");

        let unflagged = enricher(Arc::new(EchoTranslator), &["feed/hn"])
            .enrich_batch("feed/other", std::slice::from_ref(&hn_item))
            .await;
        assert_eq!(unflagged.items[0].link, "http://x/1");
    }
}
