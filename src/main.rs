use freshrelay::{
    Config, Delivery, Enricher, GReaderClient, GoogleTranslator, LogDelivery, MailDelivery,
    MemoDelivery, Poller, Storage, WatermarkStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        "Starting freshrelay (poll interval {}s)",
        config.poll_interval_secs
    );

    if config.accept_invalid_certs {
        warn!("TLS certificate validation is disabled by configuration");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(5))
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()?;

    let storage = Storage::connect(&config.db_path).await?;

    let backend = Arc::new(GReaderClient::new(
        client.clone(),
        config.auth_url.clone(),
        config.list_subscription_url.clone(),
        config.content_url_prefix.clone(),
        config.filtered_label.clone(),
    ));

    let translator = Arc::new(GoogleTranslator::new(
        client.clone(),
        config.translate_base_url.clone(),
        config.target_lang.clone(),
    ));

    let enricher = Enricher::new(
        translator,
        config.with_content_feeds.clone(),
        config.max_item_pause_secs,
    );

    let mut deliveries: Vec<Arc<dyn Delivery>> = Vec::new();
    if let Some(mail) = &config.mail {
        info!("Mail digest delivery enabled ({})", mail.smtp_server);
        deliveries.push(Arc::new(MailDelivery::new(mail)?));
    }
    if let Some(memos) = &config.memos {
        info!("Note delivery enabled ({})", memos.create_api);
        deliveries.push(Arc::new(MemoDelivery::new(
            client.clone(),
            memos,
            storage.clone(),
        )));
    }
    if deliveries.is_empty() {
        info!("No downstream configured, logging cycles only");
        deliveries.push(Arc::new(LogDelivery));
    }

    let watermarks =
        WatermarkStore::new(config.default_token()).with_seed(config.ot_map_seed.clone());

    let poller = Poller::new(
        backend,
        enricher,
        storage,
        deliveries,
        watermarks,
        Duration::from_secs(config.poll_interval_secs),
        config.timezone,
    );

    poller.run().await;
    Ok(())
}
