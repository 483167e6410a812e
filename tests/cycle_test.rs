use async_trait::async_trait;
use freshrelay::backend::{CanonicalLink, StreamItem, Summary};
use freshrelay::types::Category;
use freshrelay::{
    Cycle, Delivery, Enricher, FeedBackend, ItemContent, Poller, RelayError, Result, Storage,
    Subscription, Translate, WatermarkStore,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeBackend {
    subscriptions: Vec<Subscription>,
    // Per-feed queue of batches, one popped per fetch.
    batches: Mutex<HashMap<String, Vec<Vec<StreamItem>>>>,
    requested_tokens: Mutex<Vec<(String, String)>>,
}

impl FakeBackend {
    fn new(subscriptions: Vec<Subscription>) -> Self {
        Self {
            subscriptions,
            batches: Mutex::new(HashMap::new()),
            requested_tokens: Mutex::new(Vec::new()),
        }
    }

    fn queue_batch(&self, feed_id: &str, batch: Vec<StreamItem>) {
        self.batches
            .lock()
            .unwrap()
            .entry(feed_id.to_string())
            .or_default()
            .push(batch);
    }

    fn tokens_requested_for(&self, feed_id: &str) -> Vec<String> {
        self.requested_tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == feed_id)
            .map(|(_, token)| token.clone())
            .collect()
    }
}

#[async_trait]
impl FeedBackend for FakeBackend {
    async fn authenticate(&self) -> String {
        "session-token".to_string()
    }

    async fn list_subscriptions(&self, _token: &str) -> Vec<Subscription> {
        self.subscriptions.clone()
    }

    async fn fetch_stream(&self, feed_id: &str, _token: &str, since: &str) -> Vec<StreamItem> {
        self.requested_tokens
            .lock()
            .unwrap()
            .push((feed_id.to_string(), since.to_string()));

        let mut batches = self.batches.lock().unwrap();
        match batches.get_mut(feed_id) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => Vec::new(),
        }
    }
}

struct FixedTranslator(&'static str);

#[async_trait]
impl Translate for FixedTranslator {
    async fn translate(&self, _text: &str) -> String {
        self.0.to_string()
    }
}

#[derive(Default)]
struct CollectingDelivery {
    cycles: Mutex<Vec<Cycle>>,
}

#[async_trait]
impl Delivery for CollectingDelivery {
    async fn deliver(&self, cycle: &Cycle) -> Result<()> {
        self.cycles.lock().unwrap().push(cycle.clone());
        Ok(())
    }
}

struct FailingDelivery;

#[async_trait]
impl Delivery for FailingDelivery {
    async fn deliver(&self, _cycle: &Cycle) -> Result<()> {
        Err(RelayError::Delivery("downstream unavailable".to_string()))
    }
}

fn tech_subscription() -> Subscription {
    Subscription {
        id: "f1".to_string(),
        title: "Tech".to_string(),
        categories: vec![Category {
            label: "News".to_string(),
        }],
    }
}

fn hello_item() -> StreamItem {
    StreamItem {
        title: Some("Hello".to_string()),
        crawl_time_msec: Some("1700000000000".to_string()),
        canonical: vec![CanonicalLink {
            href: Some("http://x/1".to_string()),
        }],
        summary: Some(Summary {
            content: "<p>plain summary</p>".to_string(),
        }),
    }
}

async fn build_poller(
    backend: Arc<FakeBackend>,
    delivery: Arc<dyn Delivery>,
    default_token: &str,
) -> (Poller, Storage) {
    let storage = Storage::in_memory().await.expect("in-memory db");
    let enricher = Enricher::new(Arc::new(FixedTranslator("你好")), Default::default(), 0);
    let poller = Poller::new(
        backend,
        enricher,
        storage.clone(),
        vec![delivery],
        WatermarkStore::new(default_token.to_string()),
        Duration::from_secs(1),
        chrono_tz::Asia::Shanghai,
    );
    (poller, storage)
}

#[tokio::test]
async fn first_fetch_uses_default_token_and_cycle_persists_enriched_item() -> Result<()> {
    let backend = Arc::new(FakeBackend::new(vec![tech_subscription()]));
    backend.queue_batch("f1", vec![hello_item()]);

    let delivery = Arc::new(CollectingDelivery::default());
    let (mut poller, storage) = build_poller(backend.clone(), delivery.clone(), "1699990000").await;

    let count = poller.run_cycle("session-token").await?;
    assert_eq!(count, 1);

    assert_eq!(backend.tokens_requested_for("f1"), vec!["1699990000"]);

    // Watermark advanced to floor(crawlTimeMsec/1000)+1 after the successful cycle.
    assert_eq!(poller.watermark_for("f1"), "1700000001");

    // The persisted content round-trips byte-for-byte equivalent.
    let posts = storage.recent_posts(10).await?;
    assert_eq!(posts.len(), 1);
    assert!(posts[0].title.starts_with("RSS "));

    let items = storage.items_for_post(&posts[0].id).await?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].feed_title, "Tech");
    assert_eq!(items[0].memo_id, "");
    let content: ItemContent = serde_json::from_str(&items[0].content)?;
    assert_eq!(
        content,
        ItemContent {
            cn_title: "你好".to_string(),
            title: "Hello".to_string(),
            link: "http://x/1".to_string(),
        }
    );

    // Delivery saw exactly one cycle with one item.
    let cycles = delivery.cycles.lock().unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].items.len(), 1);

    Ok(())
}

#[tokio::test]
async fn promoted_watermark_is_used_on_the_next_cycle() -> Result<()> {
    let backend = Arc::new(FakeBackend::new(vec![tech_subscription()]));
    backend.queue_batch("f1", vec![hello_item()]);

    let delivery = Arc::new(CollectingDelivery::default());
    let (mut poller, _storage) = build_poller(backend.clone(), delivery, "1699990000").await;

    poller.run_cycle("session-token").await?;
    poller.run_cycle("session-token").await?;

    assert_eq!(
        backend.tokens_requested_for("f1"),
        vec!["1699990000", "1700000001"]
    );
    Ok(())
}

#[tokio::test]
async fn empty_feed_leaves_watermark_unchanged_and_skips_persistence() -> Result<()> {
    let backend = Arc::new(FakeBackend::new(vec![tech_subscription()]));
    // No batch queued: the feed yields zero items.

    let delivery = Arc::new(CollectingDelivery::default());
    let (mut poller, storage) = build_poller(backend.clone(), delivery.clone(), "1699990000").await;

    let count = poller.run_cycle("session-token").await?;
    assert_eq!(count, 0);
    assert_eq!(poller.watermark_for("f1"), "1699990000");
    assert!(storage.recent_posts(10).await?.is_empty());
    assert!(delivery.cycles.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_subscription_list_completes_as_a_noop() -> Result<()> {
    let backend = Arc::new(FakeBackend::new(Vec::new()));
    let delivery = Arc::new(CollectingDelivery::default());
    let (mut poller, storage) = build_poller(backend, delivery, "1699990000").await;

    let count = poller.run_cycle("session-token").await?;
    assert_eq!(count, 0);
    assert!(storage.recent_posts(10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn delivery_failure_keeps_pre_cycle_watermarks_for_idempotent_retry() -> Result<()> {
    let backend = Arc::new(FakeBackend::new(vec![tech_subscription()]));
    backend.queue_batch("f1", vec![hello_item()]);
    backend.queue_batch("f1", vec![hello_item()]);

    let (mut poller, _storage) = build_poller(backend.clone(), Arc::new(FailingDelivery), "1699990000").await;

    let result = poller.run_cycle("session-token").await;
    assert!(result.is_err());

    // Watermark must not advance after a failed delivery.
    assert_eq!(poller.watermark_for("f1"), "1699990000");

    // The next cycle re-fetches the same window.
    let _ = poller.run_cycle("session-token").await;
    assert_eq!(
        backend.tokens_requested_for("f1"),
        vec!["1699990000", "1699990000"]
    );
    Ok(())
}

#[tokio::test]
async fn one_feeds_emptiness_does_not_block_others() -> Result<()> {
    let quiet = Subscription {
        id: "f0".to_string(),
        title: "Quiet".to_string(),
        categories: vec![Category {
            label: "News".to_string(),
        }],
    };
    let backend = Arc::new(FakeBackend::new(vec![quiet, tech_subscription()]));
    backend.queue_batch("f1", vec![hello_item()]);

    let delivery = Arc::new(CollectingDelivery::default());
    let (mut poller, _storage) = build_poller(backend.clone(), delivery, "1699990000").await;

    let count = poller.run_cycle("session-token").await?;
    assert_eq!(count, 1);
    assert_eq!(poller.watermark_for("f0"), "1699990000");
    assert_eq!(poller.watermark_for("f1"), "1700000001");
    Ok(())
}
