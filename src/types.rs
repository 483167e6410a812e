use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// One subscribed feed, as reported by the backend's subscription list.
/// Fetched fresh every cycle and never persisted locally.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub label: String,
}

/// The enriched payload persisted per item. Serialized into
/// `post_item.content` with these exact keys, so readers of the stored
/// rows can round-trip it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemContent {
    pub cn_title: String,
    pub title: String,
    pub link: String,
}

/// One stored row of the `post_item` table. `memo_id` stays empty until a
/// downstream note delivery reports back an opaque reference.
#[derive(Debug, Clone)]
pub struct PostItem {
    pub id: String,
    pub post_id: String,
    pub feed_title: String,
    pub content: String,
    pub memo_id: String,
}

/// One stored row of the `post` table.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub read_at: Option<String>,
}

/// The unit of persistence and delivery: everything one poll iteration
/// produced, with items ordered feed by feed.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub id: String,
    pub subject: String,
    pub items: Vec<PostItem>,
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Time-derived identifier, unique within the process even when callers
/// ask for several in the same nanosecond.
pub fn time_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut prev = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_ID.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(observed) => prev = observed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
