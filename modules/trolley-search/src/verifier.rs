//! AI verification: is this search hit a listing for exactly the queried
//! product? A deterministic size guard runs first so the model never sees a
//! candidate whose measurable size already disagrees with the query.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use trolley_common::{Availability, ProductQuery, SearchCandidate, VerifiedProduct};

use crate::traits::MatchModel;

/// The model's verdict on one candidate.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MatchDecision {
    /// True only when the listing is the queried product itself.
    pub is_match: bool,
    /// Canonical product name, cleaned of marketing suffixes.
    pub product_name: Option<String>,
    /// Price visible in the listing, if any.
    pub price: Option<f64>,
    /// 0-1 certainty in the verdict.
    pub confidence: f64,
    /// One sentence of reasoning.
    pub reason: String,
}

pub(crate) const MATCH_SYSTEM_PROMPT: &str = r#"You verify product listings for a UK price comparison service. Given a shopper's query and one search hit, decide whether the hit is a listing for exactly that product.

Rules:
- Reject category, search and listing pages. Only a single-product page can match.
- Sizes must match after unit conversion (1l equals 1000ml, 1kg equals 1000g). A different size, or a multipack when the query names a single item, is not a match.
- Accept variant titles when every key term of the query appears. Marketing suffixes, SKU codes, site names and truncated titles do not disqualify a hit.
- When brand and product type both match and nothing contradicts the query, accept with confidence 0.8.
- Report the price shown in the listing if one is visible in the title or snippet."#;

pub(crate) fn match_user_prompt(query: &ProductQuery, candidate: &SearchCandidate) -> String {
    let mut prompt = format!("Query: {}\n", query.text);
    if let Some(ref description) = query.description {
        prompt.push_str(&format!("Shopper's notes: {description}\n"));
    }
    prompt.push_str(&format!(
        "\nCandidate from {}:\nTitle: {}\nURL: {}\n",
        candidate.vendor, candidate.title, candidate.url
    ));
    if let Some(price) = candidate.price {
        prompt.push_str(&format!("Listed price: £{price:.2}\n"));
    } else if let Some(price) = candidate.scraped_price {
        prompt.push_str(&format!("Price from page structured data: £{price:.2}\n"));
    }
    if let Some(ref snippet) = candidate.snippet {
        prompt.push_str(&format!("Snippet: {snippet}\n"));
    }
    prompt
}

pub struct Verifier {
    model: Arc<dyn MatchModel>,
}

impl Verifier {
    pub fn new(model: Arc<dyn MatchModel>) -> Self {
        Self { model }
    }

    /// Decide whether one candidate really is the queried product. `None`
    /// means dropped: a size conflict, a model rejection, or a model call
    /// that failed or returned garbage.
    pub async fn verify(
        &self,
        query: &ProductQuery,
        candidate: &SearchCandidate,
    ) -> Option<VerifiedProduct> {
        if let Some(conflict) = size_conflict(&query.text, &candidate.title) {
            info!(url = %candidate.url, conflict = %conflict, "Size mismatch, rejecting");
            return None;
        }

        let decision = match self.model.decide_match(query, candidate).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Match decision failed, dropping candidate");
                return None;
            }
        };

        if !decision.is_match {
            debug!(url = %candidate.url, reason = %decision.reason, "Rejected by model");
            return None;
        }

        let price = decision
            .price
            .filter(|p| *p > 0.0)
            .or(candidate.price)
            .or(candidate.scraped_price)
            .unwrap_or(0.0);

        Some(VerifiedProduct {
            product_name: decision
                .product_name
                .unwrap_or_else(|| candidate.title.clone()),
            price,
            currency: candidate
                .currency
                .clone()
                .unwrap_or_else(|| "GBP".to_string()),
            source_url: candidate.url.clone(),
            vendor: candidate.vendor.clone(),
            confidence: decision.confidence.clamp(0.0, 1.0),
            availability: Availability::Unsure,
            extraction_method: None,
            match_reason: decision.reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Size guard
// ---------------------------------------------------------------------------

/// First quantity in a text, with an optional multipack prefix ("4 x 475g").
static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(\d+)\s*[x×]\s*)?(\d+(?:\.\d+)?)\s*(kg|mg|g|ml|cl|l)\b")
        .expect("quantity regex must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Mass,
    Volume,
}

/// A measured size, normalized to mg or ml.
#[derive(Debug, Clone)]
struct PackSize {
    pack: u32,
    amount: f64,
    kind: UnitKind,
    text: String,
}

fn unit_base(unit: &str) -> Option<(f64, UnitKind)> {
    match unit.to_lowercase().as_str() {
        "mg" => Some((1.0, UnitKind::Mass)),
        "g" => Some((1_000.0, UnitKind::Mass)),
        "kg" => Some((1_000_000.0, UnitKind::Mass)),
        "ml" => Some((1.0, UnitKind::Volume)),
        "cl" => Some((10.0, UnitKind::Volume)),
        "l" => Some((1_000.0, UnitKind::Volume)),
        _ => None,
    }
}

fn parse_pack_size(text: &str) -> Option<PackSize> {
    let caps = QUANTITY_RE.captures(text)?;
    let pack = caps
        .get(1)
        .map_or(1, |m| m.as_str().parse().unwrap_or(1));
    let amount: f64 = caps[2].parse().ok()?;
    let (scale, kind) = unit_base(&caps[3])?;
    Some(PackSize {
        pack,
        amount: amount * scale,
        kind,
        text: caps[0].trim().to_string(),
    })
}

/// Compare the first measurable quantity in the query against the first one
/// in the candidate title. A disagreement is a hard reject before any model
/// call; a missing quantity on either side, or quantities in different
/// dimensions, leaves the decision to the model.
fn size_conflict(query: &str, title: &str) -> Option<String> {
    let wanted = parse_pack_size(query)?;
    let found = parse_pack_size(title)?;
    if wanted.kind != found.kind {
        return None;
    }
    if wanted.pack != found.pack || (wanted.amount - found.amount).abs() > 0.5 {
        return Some(format!("'{}' vs '{}'", wanted.text, found.text));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, decision, MockMatchModel};

    // --- size guard tests ---

    #[test]
    fn different_gram_sizes_conflict() {
        assert!(size_conflict("HP Brown Sauce 450g", "HP Brown Sauce 475g").is_some());
    }

    #[test]
    fn equal_sizes_across_units_do_not_conflict() {
        assert!(size_conflict("Milk 1l", "Milk 1000ml").is_none());
        assert!(size_conflict("Flour 1kg", "Flour 1000g").is_none());
        assert!(size_conflict("Whisky 70cl", "Whisky 700ml").is_none());
    }

    #[test]
    fn different_volumes_conflict() {
        assert!(size_conflict("Milk 1l", "Milk 2l").is_some());
    }

    #[test]
    fn multipack_against_single_conflicts() {
        assert!(size_conflict("HP Brown Sauce 450g", "HP Brown Sauce 4 x 475g").is_some());
        assert!(size_conflict("Cola 330ml", "Cola 6x330ml").is_some());
    }

    #[test]
    fn matching_multipacks_do_not_conflict() {
        assert!(size_conflict("Cola 6x330ml", "Cola 6 x 330ml Cans").is_none());
    }

    #[test]
    fn no_quantity_on_either_side_never_conflicts() {
        assert!(size_conflict("Palette Shade 01", "Palette Shade 01 - Buy Now | StoreName").is_none());
        assert!(size_conflict("HP Brown Sauce 450g", "HP Brown Sauce").is_none());
    }

    #[test]
    fn mass_versus_volume_is_left_to_the_model() {
        assert!(size_conflict("Sauce 450g", "Sauce 450ml").is_none());
    }

    #[test]
    fn prices_are_not_mistaken_for_quantities() {
        // "£1.80" must not parse as a size.
        assert!(size_conflict("Sauce 450g", "Sauce 450g now £1.80").is_none());
        assert!(parse_pack_size("only £2.50 today").is_none());
    }

    // --- verify tests ---

    #[tokio::test]
    async fn size_conflict_skips_the_model_entirely() {
        let model = Arc::new(MockMatchModel::new());
        let verifier = Verifier::new(model.clone());
        let query = ProductQuery::new("HP Brown Sauce 450g");
        let result = verifier
            .verify(&query, &candidate("ASDA", "https://www.asda.com/product/9", "HP Brown Sauce 4 x 475g", Some(6.0)))
            .await;
        assert!(result.is_none());
        assert_eq!(model.decide_calls(), 0);
    }

    #[tokio::test]
    async fn model_rejection_drops_the_candidate() {
        let model = Arc::new(
            MockMatchModel::new()
                .on_url("https://www.tesco.com/groceries/en-GB/products/1", decision(false, 0.9)),
        );
        let verifier = Verifier::new(model);
        let query = ProductQuery::new("HP Brown Sauce 450g");
        let result = verifier
            .verify(
                &query,
                &candidate("Tesco", "https://www.tesco.com/groceries/en-GB/products/1", "Daddies Brown Sauce 450g", Some(1.5)),
            )
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn model_failure_is_a_non_match_not_an_error() {
        // Nothing registered: the mock errors, the verifier absorbs it.
        let model = Arc::new(MockMatchModel::new());
        let verifier = Verifier::new(model);
        let query = ProductQuery::new("HP Brown Sauce");
        let result = verifier
            .verify(
                &query,
                &candidate("Tesco", "https://www.tesco.com/groceries/en-GB/products/1", "HP Brown Sauce", Some(1.8)),
            )
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn accepted_candidate_carries_decision_fields() {
        let verdict = MatchDecision {
            is_match: true,
            product_name: Some("HP Brown Sauce 450g".to_string()),
            price: Some(1.75),
            confidence: 0.95,
            reason: "exact size and brand".to_string(),
        };
        let model = Arc::new(
            MockMatchModel::new().on_url("https://www.tesco.com/groceries/en-GB/products/1", verdict),
        );
        let verifier = Verifier::new(model);
        let query = ProductQuery::new("HP Brown Sauce 450g");
        let product = verifier
            .verify(
                &query,
                &candidate("Tesco", "https://www.tesco.com/groceries/en-GB/products/1", "HP Brown Sauce 450g Squeezy", Some(1.8)),
            )
            .await
            .unwrap();
        // The model's price reading beats the search hit's.
        assert_eq!(product.price, 1.75);
        assert_eq!(product.product_name, "HP Brown Sauce 450g");
        assert_eq!(product.availability, Availability::Unsure);
        assert_eq!(product.confidence, 0.95);
    }

    #[tokio::test]
    async fn scraped_price_backfills_when_nothing_else_has_one() {
        let model = Arc::new(
            MockMatchModel::new().on_url("https://newshop.co.uk/p/77", decision(true, 0.8)),
        );
        let verifier = Verifier::new(model);
        let query = ProductQuery::new("Vitamin D 1000iu tablets");
        let mut c = candidate("newshop", "https://newshop.co.uk/p/77", "Vitamin D Tablets", None);
        c.scraped_price = Some(4.5);
        let product = verifier.verify(&query, &c).await.unwrap();
        assert_eq!(product.price, 4.5);
    }
}
