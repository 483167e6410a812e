use crate::config::{MailConfig, MemoConfig};
use crate::storage::Storage;
use crate::types::{Cycle, ItemContent, RelayError, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Downstream hand-off for a persisted cycle. Watermarks are promoted only
/// after every configured delivery returns Ok.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, cycle: &Cycle) -> Result<()>;
}

/// One digest mail per cycle over SMTP with STARTTLS and PLAIN auth.
pub struct MailDelivery {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
    receiver: String,
}

impl MailDelivery {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map_err(|e| RelayError::Mail(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.auth_token.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            sender: config.sender.clone(),
            receiver: config.receiver.clone(),
        })
    }
}

#[async_trait]
impl Delivery for MailDelivery {
    async fn deliver(&self, cycle: &Cycle) -> Result<()> {
        let message = Message::builder()
            .from(
                self.sender
                    .parse()
                    .map_err(|e| RelayError::Mail(format!("bad sender address: {}", e)))?,
            )
            .to(self
                .receiver
                .parse()
                .map_err(|e| RelayError::Mail(format!("bad receiver address: {}", e)))?)
            .subject(&cycle.subject)
            .header(ContentType::TEXT_HTML)
            .body(build_digest_html(cycle))
            .map_err(|e| RelayError::Mail(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| RelayError::Mail(e.to_string()))?;

        info!("Sent digest mail: {}", cycle.subject);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MemoRequest {
    content: String,
    visibility: &'static str,
}

#[derive(Debug, Deserialize)]
struct MemoResponse {
    uid: String,
}

/// Posts each item to a Memos-style note service and records the returned
/// `uid` as the item's delivery reference. A single item's failure is
/// logged; the cycle's delivery still counts as done since the batch is
/// already persisted.
pub struct MemoDelivery {
    client: Client,
    create_api: String,
    api_token: String,
    storage: Storage,
}

impl MemoDelivery {
    pub fn new(client: Client, config: &MemoConfig, storage: Storage) -> Self {
        Self {
            client,
            create_api: config.create_api.clone(),
            api_token: config.api_token.clone(),
            storage,
        }
    }

    async fn post_memo(&self, content: String) -> Result<String> {
        let response = self
            .client
            .post(&self.create_api)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(&MemoRequest {
                content,
                visibility: "PRIVATE",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RelayError::Delivery(format!(
                "note service returned HTTP {}",
                response.status()
            )));
        }

        let memo: MemoResponse = response.json().await?;
        Ok(memo.uid)
    }
}

#[async_trait]
impl Delivery for MemoDelivery {
    async fn deliver(&self, cycle: &Cycle) -> Result<()> {
        let mut delivered = 0usize;

        for item in &cycle.items {
            let text = match serde_json::from_str::<ItemContent>(&item.content) {
                Ok(content) => {
                    format!("{}\n{}\n{}", content.cn_title, content.title, content.link)
                }
                Err(e) => {
                    warn!("Undeliverable item {}: {}", item.id, e);
                    continue;
                }
            };

            match self.post_memo(text).await {
                Ok(uid) => {
                    self.storage.update_delivery_ref(&item.id, &uid).await?;
                    delivered += 1;
                }
                Err(e) => warn!("Note delivery failed for item {}: {}", item.id, e),
            }
        }

        info!("Delivered {}/{} items as notes", delivered, cycle.items.len());
        Ok(())
    }
}

/// Fallback when no downstream is configured.
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn deliver(&self, cycle: &Cycle) -> Result<()> {
        info!(
            "Cycle {} ({}) produced {} items; no downstream configured",
            cycle.id,
            cycle.subject,
            cycle.items.len()
        );
        Ok(())
    }
}

/// Digest body: a `<h1>` per feed followed by one `<li>` per item, in cycle
/// order. Items arrive already grouped by feed.
pub fn build_digest_html(cycle: &Cycle) -> String {
    let mut body = String::new();
    let mut current_feed: Option<&str> = None;

    for item in &cycle.items {
        if current_feed != Some(item.feed_title.as_str()) {
            body.push_str(&format!("<h1>{}</h1>\n", item.feed_title));
            current_feed = Some(item.feed_title.as_str());
        }

        match serde_json::from_str::<ItemContent>(&item.content) {
            Ok(content) => {
                body.push_str(&format!(
                    "<li>{} <a href={}>{}</a></li>\n",
                    content.cn_title, content.link, content.title
                ));
            }
            Err(e) => warn!("Skipping unrenderable item {} in digest: {}", item.id, e),
        }
    }

    body
}
