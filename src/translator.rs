use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// Best-effort title translation. Implementations never fail: any transport
/// or shape problem degrades to an empty string and the caller keeps the
/// original title.
#[async_trait]
pub trait Translate: Send + Sync {
    async fn translate(&self, text: &str) -> String;
}

/// Translation via the public Google endpoint. The response is a nested
/// array `[[["translated", ...], ...], ...]`; only the first segment of the
/// first entry is used.
pub struct GoogleTranslator {
    client: Client,
    base_url: String,
    target_lang: String,
}

impl GoogleTranslator {
    pub fn new(client: Client, base_url: String, target_lang: String) -> Self {
        Self {
            client,
            base_url,
            target_lang,
        }
    }
}

#[async_trait]
impl Translate for GoogleTranslator {
    async fn translate(&self, text: &str) -> String {
        let url = format!(
            "{}?client=gtx&sl=auto&tl={}&dt=t&q={}",
            self.base_url,
            self.target_lang,
            urlencoding::encode(text)
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Translation request failed: {}", e);
                return String::new();
            }
        };

        if !response.status().is_success() {
            warn!("Translation returned HTTP {}", response.status());
            return String::new();
        }

        let value: Value = match response.json().await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse translation response: {}", e);
                return String::new();
            }
        };

        match extract_translation(&value) {
            Some(translated) => {
                debug!("Translated {:?} -> {:?}", text, translated);
                translated
            }
            None => {
                warn!("Unexpected translation response shape");
                String::new()
            }
        }
    }
}

fn extract_translation(value: &Value) -> Option<String> {
    value
        .get(0)?
        .get(0)?
        .get(0)?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_first_segment() {
        let value = json!([[["你好", "Hello", null], ["世界", "World", null]]]);
        assert_eq!(extract_translation(&value).as_deref(), Some("你好"));
    }

    #[test]
    fn shape_mismatch_yields_none() {
        assert_eq!(extract_translation(&json!({"error": "nope"})), None);
        assert_eq!(extract_translation(&json!([])), None);
        assert_eq!(extract_translation(&json!([[42]])), None);
    }
}
