pub mod error;

pub use error::{PagefetchError, Result};

use std::time::Duration;

use tracing::debug;

pub struct PagefetchClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl PagefetchClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    /// Fetch fully-rendered HTML for a URL. Waits for network idle so that
    /// script-injected structured data is present in the returned document.
    pub async fn content(&self, url: &str) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2" },
        });

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PagefetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let html = resp.text().await?;
        debug!(url, bytes = html.len(), "Fetched rendered page");
        Ok(html)
    }
}
