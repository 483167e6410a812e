use std::collections::HashMap;
use tracing::info;

/// Per-feed "since" cursors. Owned exclusively by the poller: reads happen
/// when requests are built, writes only through `promote` at the end of a
/// successful cycle. The candidate map lives on the poller's stack during a
/// cycle, so a failed cycle leaves this store untouched.
#[derive(Debug)]
pub struct WatermarkStore {
    active: HashMap<String, String>,
    default_token: String,
}

impl WatermarkStore {
    pub fn new(default_token: String) -> Self {
        Self {
            active: HashMap::new(),
            default_token,
        }
    }

    /// Seed the active map, e.g. from a persisted snapshot.
    pub fn with_seed(mut self, seed: HashMap<String, String>) -> Self {
        self.active = seed;
        self
    }

    /// Token to use when requesting items for a feed. Feeds never seen
    /// before fall back to the process-wide default.
    pub fn since_for(&self, feed_id: &str) -> &str {
        self.active
            .get(feed_id)
            .map(String::as_str)
            .unwrap_or(&self.default_token)
    }

    /// Apply a cycle's candidate map. Feeds absent from the candidate map
    /// had no new items this cycle and keep their existing watermark.
    pub fn promote(&mut self, candidate: HashMap<String, String>) {
        if candidate.is_empty() {
            return;
        }
        info!("Promoting watermarks for {} feeds", candidate.len());
        self.active.extend(candidate);
    }
}
