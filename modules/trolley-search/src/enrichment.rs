//! Live availability and price for verified products, in three tiers by
//! cost: recently scraped rows from the shared product table, then a batch
//! call to the stock-check service, then a direct structured-data scrape.
//! Enrichment never drops a product; whatever cannot be enriched keeps its
//! verification-time fields.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, warn};

use stockcheck_client::{CheckItem, CheckResult};
use trolley_common::{sanitize_url, Availability, ExtractionMethod, VerifiedProduct};

use crate::traits::{AvailabilityChecker, FreshnessReader, PageFetcher};
use crate::vendors::is_priority_vendor_name;

/// Concurrent page fetches when scraping structured data.
pub(crate) const SCRAPE_CONCURRENCY: usize = 5;
/// Concurrency hint passed to the stock-check service.
const CHECK_CONCURRENCY: usize = 5;
/// The stock-check service renders pages in real browsers; cap the wait.
const CHECK_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Default, Clone, Copy)]
pub struct EnrichmentStats {
    pub from_cache: u32,
    pub from_checker: u32,
    pub from_scrape: u32,
}

pub struct Enricher {
    freshness: Arc<dyn FreshnessReader>,
    checker: Arc<dyn AvailabilityChecker>,
    fetcher: Arc<dyn PageFetcher>,
}

impl Enricher {
    pub fn new(
        freshness: Arc<dyn FreshnessReader>,
        checker: Arc<dyn AvailabilityChecker>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            freshness,
            checker,
            fetcher,
        }
    }

    /// Enrich every product in place, cheapest tier first. Each tier handles
    /// only what the previous tiers missed.
    pub async fn enrich(
        &self,
        mut products: Vec<VerifiedProduct>,
    ) -> (Vec<VerifiedProduct>, EnrichmentStats) {
        let mut stats = EnrichmentStats::default();
        if products.is_empty() {
            return (products, stats);
        }

        let pending: Vec<usize> = (0..products.len()).collect();
        let pending = self.apply_fresh(&mut products, pending, &mut stats).await;
        let pending = self.apply_checked(&mut products, pending, &mut stats).await;
        self.apply_scraped(&mut products, pending, &mut stats).await;

        debug!(
            from_cache = stats.from_cache,
            from_checker = stats.from_checker,
            from_scrape = stats.from_scrape,
            "Enrichment complete"
        );
        (products, stats)
    }

    async fn apply_fresh(
        &self,
        products: &mut [VerifiedProduct],
        pending: Vec<usize>,
        stats: &mut EnrichmentStats,
    ) -> Vec<usize> {
        let urls: Vec<String> = pending
            .iter()
            .map(|&i| sanitize_url(&products[i].source_url))
            .collect();
        let rows = match self.freshness.fresh_by_urls(&urls).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Freshness lookup failed");
                return pending;
            }
        };
        let by_url: HashMap<String, &trolley_store::FreshProduct> = rows
            .iter()
            .map(|row| (sanitize_url(&row.url), row))
            .collect();

        let mut still = Vec::new();
        for i in pending {
            match by_url.get(&sanitize_url(&products[i].source_url)) {
                Some(row) => {
                    if let Some(ref status) = row.stock_status {
                        products[i].availability = parse_stock_status(status);
                    }
                    apply_price(&mut products[i], row.price);
                    products[i].extraction_method = Some(ExtractionMethod::Cached);
                    stats.from_cache += 1;
                }
                None => still.push(i),
            }
        }
        still
    }

    async fn apply_checked(
        &self,
        products: &mut [VerifiedProduct],
        pending: Vec<usize>,
        stats: &mut EnrichmentStats,
    ) -> Vec<usize> {
        if pending.is_empty() {
            return pending;
        }
        let items: Vec<CheckItem> = pending
            .iter()
            .map(|&i| CheckItem {
                url: sanitize_url(&products[i].source_url),
                product_name: products[i].product_name.clone(),
            })
            .collect();

        let outcome = tokio::time::timeout(
            Duration::from_secs(CHECK_TIMEOUT_SECS),
            self.checker.check_batch(items, CHECK_CONCURRENCY),
        )
        .await;
        let results = match outcome {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!(error = %e, "Availability check failed");
                return pending;
            }
            Err(_) => {
                warn!("Availability check timed out after {CHECK_TIMEOUT_SECS}s");
                return pending;
            }
        };
        let by_url: HashMap<&str, &CheckResult> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| (r.url.as_str(), r))
            .collect();

        let mut still = Vec::new();
        for i in pending {
            let key = sanitize_url(&products[i].source_url);
            match by_url.get(key.as_str()) {
                Some(result) => {
                    if let Some(ref availability) = result.availability {
                        products[i].availability = parse_stock_status(availability);
                    }
                    apply_price(
                        &mut products[i],
                        result.price.as_deref().and_then(parse_price_text),
                    );
                    if let Some(ref method) = result.extraction_method {
                        products[i].extraction_method = parse_extraction_method(method);
                    }
                    stats.from_checker += 1;
                }
                None => still.push(i),
            }
        }
        still
    }

    async fn apply_scraped(
        &self,
        products: &mut [VerifiedProduct],
        pending: Vec<usize>,
        stats: &mut EnrichmentStats,
    ) {
        if pending.is_empty() {
            return;
        }
        let targets: Vec<(usize, String)> = pending
            .iter()
            .map(|&i| (i, sanitize_url(&products[i].source_url)))
            .collect();

        let fetcher = &self.fetcher;
        let scraped: Vec<_> = stream::iter(targets)
            .map(|(i, url)| async move {
                match fetcher.content(&url).await {
                    Ok(html) => (i, parse_structured_product(&html)),
                    Err(e) => {
                        debug!(url = %url, error = %e, "Enrichment scrape failed");
                        (i, None)
                    }
                }
            })
            .buffer_unordered(SCRAPE_CONCURRENCY)
            .collect()
            .await;

        for (i, found) in scraped {
            let Some(found) = found else { continue };
            if let Some(availability) = found.availability {
                products[i].availability = availability;
            }
            apply_price(&mut products[i], found.price);
            stats.from_scrape += 1;
        }
    }
}

/// Enrichment price overwrites apply to priority vendors only; everyone
/// else keeps the price verification settled on.
fn apply_price(product: &mut VerifiedProduct, price: Option<f64>) {
    if !is_priority_vendor_name(&product.vendor) {
        return;
    }
    if let Some(price) = price.filter(|p| *p > 0.0) {
        product.price = price;
    }
}

/// Availability strings arrive as schema.org URLs from scrapes and as plain
/// words from the checker and the product table.
pub(crate) fn parse_stock_status(status: &str) -> Availability {
    match Availability::from_schema_org(status) {
        Availability::Unsure => match status.trim().to_lowercase().as_str() {
            "in_stock" | "instock" | "in stock" | "available" => Availability::InStock,
            "out_of_stock" | "outofstock" | "out of stock" | "sold_out" | "sold out"
            | "unavailable" => Availability::OutOfStock,
            _ => Availability::Unsure,
        },
        known => known,
    }
}

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("price regex must compile"));

/// First number in a checker price string ("£1.80", "1.80", "GBP 1.80").
pub(crate) fn parse_price_text(text: &str) -> Option<f64> {
    let caps = PRICE_RE.captures(text)?;
    caps[1].parse::<f64>().ok().filter(|p| *p > 0.0)
}

fn parse_extraction_method(method: &str) -> Option<ExtractionMethod> {
    match method.trim().to_lowercase().as_str() {
        "css" => Some(ExtractionMethod::Css),
        "ai" => Some(ExtractionMethod::Ai),
        "cached" => Some(ExtractionMethod::Cached),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// schema.org structured data
// ---------------------------------------------------------------------------

/// What a page's ld+json Product block yielded.
pub(crate) struct StructuredProduct {
    pub price: Option<f64>,
    pub availability: Option<Availability>,
    pub raw: serde_json::Value,
}

static LDJSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("ld+json regex must compile")
});

/// Find the first schema.org Product in a page's ld+json blocks and read its
/// offer. Returns None when no block parses to a Product.
pub(crate) fn parse_structured_product(html: &str) -> Option<StructuredProduct> {
    for block in LDJSON_RE.captures_iter(html) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(block[1].trim()) else {
            continue;
        };
        if let Some(product) = find_product(&value) {
            let offer = first_offer(product);
            let price = offer.and_then(offer_price);
            let availability = offer
                .and_then(|o| o.get("availability"))
                .and_then(|a| a.as_str())
                .map(Availability::from_schema_org);
            return Some(StructuredProduct {
                price,
                availability,
                raw: product.clone(),
            });
        }
    }
    None
}

/// Locate a `"@type": "Product"` object, looking through arrays and
/// `@graph` wrappers.
fn find_product(value: &serde_json::Value) -> Option<&serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(type_field) = map.get("@type") {
                let is_product = match type_field {
                    serde_json::Value::String(s) => s == "Product",
                    serde_json::Value::Array(types) => {
                        types.iter().any(|t| t.as_str() == Some("Product"))
                    }
                    _ => false,
                };
                if is_product {
                    return Some(value);
                }
            }
            map.get("@graph").and_then(find_product)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_product),
        _ => None,
    }
}

/// `offers` is an object, or an array whose first entry is the main offer.
fn first_offer(product: &serde_json::Value) -> Option<&serde_json::Value> {
    match product.get("offers")? {
        offer @ serde_json::Value::Object(_) => Some(offer),
        serde_json::Value::Array(offers) => offers.first(),
        _ => None,
    }
}

fn offer_price(offer: &serde_json::Value) -> Option<f64> {
    let raw = offer.get("price").or_else(|| offer.get("lowPrice"))?;
    json_number(raw).filter(|p| *p > 0.0)
}

/// schema.org prices appear both as JSON numbers and as strings.
fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
