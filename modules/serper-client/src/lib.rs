pub mod error;

pub use error::{Result, SerperError};

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

const SEARCH_URL: &str = "https://google.serper.dev/search";

pub struct SerperClient {
    client: reqwest::Client,
    api_key: String,
}

/// One organic hit. Price/currency are present only when the search engine
/// surfaces rich product data for the result.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

impl SerperClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_key: api_key.to_string(),
        }
    }

    /// Run one search. `region` is a Google `gl` country code ("gb").
    ///
    /// Quota exhaustion is distinguished from other API failures so callers
    /// can fail over to a secondary credential.
    pub async fn search(
        &self,
        query: &str,
        region: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        info!(query, region, max_results, "Serper search");

        let body = serde_json::json!({
            "q": query,
            "gl": region,
            "num": max_results,
        });

        let resp = self
            .client
            .post(SEARCH_URL)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if is_credits_exhausted(status.as_u16(), &message) {
                return Err(SerperError::CreditsExhausted);
            }
            return Err(SerperError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data: SearchResponse = resp.json().await?;

        info!(query, count = data.organic.len(), "Serper search complete");
        Ok(data.organic)
    }
}

/// Serper reports an empty balance as a 4xx whose body mentions credits;
/// hard rate limiting shows up as 429.
fn is_credits_exhausted(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    if !(400..500).contains(&status) {
        return false;
    }
    let body = body.to_lowercase();
    body.contains("credit") || body.contains("quota")
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- credits detection tests ---

    #[test]
    fn not_enough_credits_is_exhaustion() {
        assert!(is_credits_exhausted(400, "Not enough credits"));
        assert!(is_credits_exhausted(403, r#"{"message":"Quota exceeded"}"#));
        assert!(is_credits_exhausted(429, ""));
    }

    #[test]
    fn other_client_errors_are_not_exhaustion() {
        assert!(!is_credits_exhausted(400, "Invalid request"));
        assert!(!is_credits_exhausted(401, "Unauthorized"));
    }

    #[test]
    fn server_errors_are_not_exhaustion() {
        assert!(!is_credits_exhausted(500, "credit system down"));
    }

    // --- response shape tests ---

    #[test]
    fn parses_organic_hits_with_optional_price() {
        let raw = r#"{
            "organic": [
                {"title": "HP Brown Sauce 450g", "link": "https://www.tesco.com/p/1", "snippet": "Classic", "price": 1.8, "currency": "GBP"},
                {"title": "Brown Sauce", "link": "https://www.asda.com/p/2"}
            ]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.organic.len(), 2);
        assert_eq!(parsed.organic[0].price, Some(1.8));
        assert_eq!(parsed.organic[0].currency.as_deref(), Some("GBP"));
        assert!(parsed.organic[1].price.is_none());
    }

    #[test]
    fn parses_empty_response() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.organic.is_empty());
    }
}
