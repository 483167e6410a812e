use crate::backend::FeedBackend;
use crate::delivery::Delivery;
use crate::enrich::Enricher;
use crate::storage::Storage;
use crate::types::{time_id, Cycle, PostItem, Result};
use crate::watermark::WatermarkStore;
use chrono::Utc;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// The cycle orchestrator. Authenticates once, then loops forever:
/// list subscriptions, fetch and enrich each feed, persist and deliver,
/// and promote the watermark candidates only when everything after the
/// fetch succeeded. A failed cycle is logged and retried after the normal
/// interval; the re-fetch of the same window is safe because item IDs are
/// unique and persistence is transactional.
pub struct Poller {
    backend: Arc<dyn FeedBackend>,
    enricher: Enricher,
    storage: Storage,
    deliveries: Vec<Arc<dyn Delivery>>,
    watermarks: WatermarkStore,
    poll_interval: Duration,
    timezone: Tz,
}

impl Poller {
    pub fn new(
        backend: Arc<dyn FeedBackend>,
        enricher: Enricher,
        storage: Storage,
        deliveries: Vec<Arc<dyn Delivery>>,
        watermarks: WatermarkStore,
        poll_interval: Duration,
        timezone: Tz,
    ) -> Self {
        Self {
            backend,
            enricher,
            storage,
            deliveries,
            watermarks,
            poll_interval,
            timezone,
        }
    }

    /// Run forever. The session token is obtained once for the process
    /// lifetime; an empty token means unauthenticated calls, which the
    /// backend will most likely reject feed by feed.
    pub async fn run(mut self) {
        info!("Starting poll loop, interval {:?}", self.poll_interval);

        let token = self.backend.authenticate().await;
        if token.is_empty() {
            error!("Authentication yielded no session token; polling unauthenticated");
        }

        loop {
            match self.run_cycle(&token).await {
                Ok(0) => info!("No updates."),
                Ok(count) => info!("Cycle stored and delivered {} items", count),
                Err(e) => error!("Cycle failed, watermarks kept: {}", e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One fetch-translate-persist cycle. Returns the number of items the
    /// cycle produced; watermark candidates become active only on Ok.
    pub async fn run_cycle(&mut self, token: &str) -> Result<usize> {
        let subscriptions = self.backend.list_subscriptions(token).await;
        info!("Polling {} subscriptions", subscriptions.len());

        let cycle_id = time_id();
        let mut candidate: HashMap<String, String> = HashMap::new();
        let mut items: Vec<PostItem> = Vec::new();

        for sub in &subscriptions {
            let since = self.watermarks.since_for(&sub.id).to_string();
            let batch = self.backend.fetch_stream(&sub.id, token, &since).await;
            if batch.is_empty() {
                info!("No updates from {} ({})", sub.id, sub.title);
                continue;
            }

            let update = self.enricher.enrich_batch(&sub.id, &batch).await;
            if let Some(next) = update.next_token {
                candidate.insert(sub.id.clone(), next);
            }

            for content in update.items {
                items.push(PostItem {
                    id: time_id(),
                    post_id: cycle_id.clone(),
                    feed_title: sub.title.clone(),
                    content: serde_json::to_string(&content)?,
                    memo_id: String::new(),
                });
            }
        }

        if items.is_empty() {
            return Ok(0);
        }

        let subject = format!(
            "RSS {}",
            Utc::now()
                .with_timezone(&self.timezone)
                .format("%Y-%m-%d %H:%M:%S")
        );
        let cycle = Cycle {
            id: cycle_id,
            subject,
            items,
        };

        self.storage.insert_post(&cycle.id, &cycle.subject).await?;
        self.storage.insert_post_items(&cycle.items).await?;

        for delivery in &self.deliveries {
            delivery.deliver(&cycle).await?;
        }

        self.watermarks.promote(candidate);
        Ok(cycle.items.len())
    }

    /// Active watermark for one feed, falling back to the default token.
    /// Observation seam only: production code never reads watermarks from
    /// outside the cycle; tests use this to assert promotion behavior.
    pub fn watermark_for(&self, feed_id: &str) -> &str {
        self.watermarks.since_for(feed_id)
    }
}
