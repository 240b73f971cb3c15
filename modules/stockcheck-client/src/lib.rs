pub mod error;

pub use error::{Result, StockcheckError};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

pub struct StockcheckClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// One product page to check. The service navigates the URL in a real
/// browser and extracts price/stock via per-vendor heuristics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckItem {
    pub url: String,
    pub product_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckBatchRequest {
    items: Vec<CheckItem>,
    concurrency: usize,
}

/// Per-URL outcome. `price` is the raw scraped text ("£1.80", "1.80", ...);
/// callers normalize it. `availability` and `extraction_method` are the
/// service's own vocabulary, kept as strings at this layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub extraction_method: Option<String>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
}

#[derive(Debug, Deserialize)]
pub struct CheckBatchResponse {
    #[serde(default)]
    pub results: Vec<CheckResult>,
    #[serde(default)]
    pub summary: Option<CheckSummary>,
}

impl StockcheckClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        // Browser automation is slow; callers apply their own batch deadline
        // below this ceiling.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    /// Check a batch of product pages in one call. `concurrency` is a hint
    /// for how many browser sessions the service may run at once.
    pub async fn check_batch(
        &self,
        items: Vec<CheckItem>,
        concurrency: usize,
    ) -> Result<CheckBatchResponse> {
        let endpoint = format!("{}/check-batch", self.base_url);
        info!(count = items.len(), concurrency, "Stockcheck batch");

        let body = CheckBatchRequest { items, concurrency };

        let mut req = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StockcheckError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: CheckBatchResponse = resp.json().await?;
        info!(results = parsed.results.len(), "Stockcheck batch complete");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- wire shape tests ---

    #[test]
    fn request_serializes_camel_case() {
        let body = CheckBatchRequest {
            items: vec![CheckItem {
                url: "https://www.tesco.com/p/1".to_string(),
                product_name: "HP Brown Sauce 450g".to_string(),
            }],
            concurrency: 5,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["items"][0]["productName"], "HP Brown Sauce 450g");
        assert_eq!(json["concurrency"], 5);
    }

    #[test]
    fn response_parses_partial_results() {
        let raw = r#"{
            "results": [
                {"url": "https://www.tesco.com/p/1", "availability": "in_stock", "price": "£1.80", "extractionMethod": "css", "success": true},
                {"url": "https://www.asda.com/p/2", "success": false}
            ],
            "summary": {"total": 2, "succeeded": 1, "failed": 1}
        }"#;
        let parsed: CheckBatchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].extraction_method.as_deref(), Some("css"));
        assert!(!parsed.results[1].success);
        assert_eq!(parsed.summary.unwrap().succeeded, 1);
    }

    #[test]
    fn response_tolerates_missing_summary() {
        let parsed: CheckBatchResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(parsed.results.is_empty());
        assert!(parsed.summary.is_none());
    }
}
