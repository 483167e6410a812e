use chrono::{Duration, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::env;
use tracing::warn;

/// Everything the poller reads from the environment. Loaded once at startup;
/// there is no CLI surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub poll_interval_secs: u64,
    pub default_ot: Option<String>,
    pub default_ot_age_hours: i64,
    pub ot_map_seed: HashMap<String, String>,
    pub auth_url: String,
    pub list_subscription_url: String,
    pub content_url_prefix: String,
    pub filtered_label: String,
    pub with_content_feeds: HashSet<String>,
    pub translate_base_url: String,
    pub target_lang: String,
    pub timezone: Tz,
    pub db_path: String,
    pub accept_invalid_certs: bool,
    pub max_item_pause_secs: u64,
    pub mail: Option<MailConfig>,
    pub memos: Option<MemoConfig>,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: String,
    pub auth_token: String,
    pub receiver: String,
}

#[derive(Debug, Clone)]
pub struct MemoConfig {
    pub create_api: String,
    pub api_token: String,
}

impl Config {
    pub fn from_env() -> Self {
        let timezone = env_or("TIMEZONE", "Asia/Shanghai")
            .parse()
            .unwrap_or_else(|_| {
                warn!("Unrecognized TIMEZONE, falling back to Asia/Shanghai");
                chrono_tz::Asia::Shanghai
            });

        let ot_map_seed = env::var("OT_MAP_JSON")
            .ok()
            .and_then(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| warn!("Ignoring malformed OT_MAP_JSON: {}", e))
                    .ok()
            })
            .unwrap_or_default();

        Self {
            poll_interval_secs: env_parse("POLL_INTERVAL_SECONDS", 600),
            default_ot: env::var("DEFAULT_OT").ok().filter(|v| !v.is_empty()),
            default_ot_age_hours: env_parse("DEFAULT_OT_AGE_HOURS", 6),
            ot_map_seed,
            auth_url: env_or("FRESHRSS_AUTH_URL", ""),
            list_subscription_url: env_or("FRESHRSS_LIST_SUBSCRIPTION_URL", ""),
            content_url_prefix: env_or("FRESHRSS_CONTENT_URL_PREFIX", ""),
            filtered_label: env_or("FRESHRSS_FILTERED_LABEL", ""),
            with_content_feeds: split_ids(&env_or("WITH_CONTENT_FEEDS", "")),
            translate_base_url: env_or(
                "TRANSLATE_BASE_URL",
                "https://translate.googleapis.com/translate_a/single",
            ),
            target_lang: env_or("TARGET_LANG", "zh"),
            timezone,
            db_path: env_or("DB_PATH", "data/freshrelay.db"),
            accept_invalid_certs: env_parse("ACCEPT_INVALID_CERTS", false),
            max_item_pause_secs: env_parse("MAX_ITEM_PAUSE_SECONDS", 10),
            mail: MailConfig::from_env(),
            memos: MemoConfig::from_env(),
        }
    }

    /// Watermark used for feeds never seen before: the configured token, or
    /// a unix-seconds timestamp `default_ot_age_hours` in the past.
    pub fn default_token(&self) -> String {
        match &self.default_ot {
            Some(token) => token.clone(),
            None => {
                let cutoff = Utc::now() - Duration::hours(self.default_ot_age_hours);
                cutoff.timestamp().to_string()
            }
        }
    }
}

impl MailConfig {
    fn from_env() -> Option<Self> {
        let smtp_server = env::var("SMTP_SERVER").ok().filter(|v| !v.is_empty())?;
        let sender = env::var("SENDER_EMAIL").ok().filter(|v| !v.is_empty())?;
        let receiver = env::var("RECEIVER_EMAIL").ok().filter(|v| !v.is_empty())?;
        Some(Self {
            smtp_server,
            smtp_port: env_parse("SMTP_PORT", 587),
            sender,
            auth_token: env_or("SENDER_AUTH_TOKEN", ""),
            receiver,
        })
    }
}

impl MemoConfig {
    fn from_env() -> Option<Self> {
        let create_api = env::var("MEMOS_CREATE_API").ok().filter(|v| !v.is_empty())?;
        Some(Self {
            create_api,
            api_token: env_or("MEMO_API_TOKEN", ""),
        })
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn split_ids(raw: &str) -> HashSet<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
