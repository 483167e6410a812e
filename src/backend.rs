use crate::types::Subscription;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// The feed backend as the poller sees it: a Google-Reader-compatible API
/// (FreshRSS). Every method degrades to an empty result instead of failing;
/// the poller treats emptiness and failure identically per feed.
#[async_trait]
pub trait FeedBackend: Send + Sync {
    /// Obtain a session token. Empty string means "proceed unauthenticated";
    /// downstream calls will likely be rejected but the process keeps going.
    async fn authenticate(&self) -> String;

    /// Current subscription set, already filtered by the configured label.
    /// Backend response order is preserved.
    async fn list_subscriptions(&self, token: &str) -> Vec<Subscription>;

    /// Items newer than `since` for one feed. Empty on any failure.
    async fn fetch_stream(&self, feed_id: &str, token: &str, since: &str) -> Vec<StreamItem>;
}

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    subscriptions: Vec<Subscription>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamContents {
    #[serde(default)]
    items: Vec<StreamItem>,
}

/// One raw item from the backend's stream-contents endpoint. Every field is
/// optional: a missing field makes the enricher skip the item, never abort
/// the batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamItem {
    pub title: Option<String>,
    #[serde(rename = "crawlTimeMsec")]
    pub crawl_time_msec: Option<String>,
    #[serde(default)]
    pub canonical: Vec<CanonicalLink>,
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CanonicalLink {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub content: String,
}

fn sid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"SID=([^\n]+)").expect("valid SID pattern"))
}

/// HTTP client for the FreshRSS endpoints. Holds the shared reqwest client;
/// transport settings (timeouts, TLS policy) are decided once at startup and
/// injected here, never set process-wide.
pub struct GReaderClient {
    client: Client,
    auth_url: String,
    list_subscription_url: String,
    content_url_prefix: String,
    filtered_label: String,
}

impl GReaderClient {
    pub fn new(
        client: Client,
        auth_url: String,
        list_subscription_url: String,
        content_url_prefix: String,
        filtered_label: String,
    ) -> Self {
        Self {
            client,
            auth_url,
            list_subscription_url,
            content_url_prefix,
            filtered_label,
        }
    }
}

#[async_trait]
impl FeedBackend for GReaderClient {
    async fn authenticate(&self) -> String {
        let response = match self.client.get(&self.auth_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Auth request failed: {}", e);
                return String::new();
            }
        };

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read auth response body: {}", e);
                return String::new();
            }
        };

        match extract_sid(&body) {
            Some(sid) => sid,
            None => {
                warn!("SID not found in auth response");
                String::new()
            }
        }
    }

    async fn list_subscriptions(&self, token: &str) -> Vec<Subscription> {
        let response = match self
            .client
            .get(&self.list_subscription_url)
            .header("Authorization", format!("GoogleLogin auth={}", token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Subscription list request failed: {}", e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!("Subscription list returned HTTP {}", response.status());
            return Vec::new();
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read subscription list body: {}", e);
                return Vec::new();
            }
        };

        decode_subscriptions(&body, &self.filtered_label)
    }

    async fn fetch_stream(&self, feed_id: &str, token: &str, since: &str) -> Vec<StreamItem> {
        let url = format!("{}{}?ot={}", self.content_url_prefix, feed_id, since);
        debug!("Fetching stream: {}", url);

        let response = match self
            .client
            .get(&url)
            .header("Authorization", format!("GoogleLogin auth={}", token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch feed {}: {}", feed_id, e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!("Feed {} returned HTTP {}", feed_id, response.status());
            return Vec::new();
        }

        match response.json::<StreamContents>().await {
            Ok(contents) => contents.items,
            Err(e) => {
                warn!("Malformed stream payload for {}: {}", feed_id, e);
                Vec::new()
            }
        }
    }
}

/// Decode a subscription-list payload and apply the label filter. A
/// malformed payload is logged and yields an empty sequence, never an
/// error.
fn decode_subscriptions(body: &str, filter: &str) -> Vec<Subscription> {
    let listing: SubscriptionList = match serde_json::from_str(body) {
        Ok(listing) => listing,
        Err(e) => {
            warn!("Malformed subscription payload: {}", e);
            return Vec::new();
        }
    };

    listing
        .subscriptions
        .into_iter()
        .filter(|sub| label_matches(sub, filter))
        .collect()
}

fn extract_sid(body: &str) -> Option<String> {
    sid_pattern()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// A subscription passes when one of its category labels equals the filter,
/// or when the filter is empty and the subscription has at least one
/// category.
fn label_matches(sub: &Subscription, filter: &str) -> bool {
    if filter.is_empty() {
        !sub.categories.is_empty()
    } else {
        sub.categories.iter().any(|c| c.label == filter)
    }
}
