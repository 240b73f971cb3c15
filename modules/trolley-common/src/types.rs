use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default number of products returned when the caller does not ask for more.
pub const DEFAULT_RESULT_LIMIT: usize = 5;

/// Upper bound on the per-request result limit.
pub const MAX_RESULT_LIMIT: usize = 20;

// --- Query Types ---

/// One product search request. Immutable for the lifetime of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuery {
    pub text: String,
    pub description: Option<String>,
    pub limit: usize,
    pub bypass_cache: bool,
}

impl ProductQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            description: None,
            limit: DEFAULT_RESULT_LIMIT,
            bypass_cache: false,
        }
    }

    /// Cache key material: lowercased, whitespace-collapsed search text.
    pub fn normalized(&self) -> String {
        normalize_query(&self.text)
    }
}

/// Lowercase and collapse runs of whitespace to single spaces.
pub fn normalize_query(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// --- Vendor Types ---

/// A priority retailer. The curated list lives in trolley-search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vendor {
    pub name: &'static str,
    pub domain: &'static str,
}

// --- Search Types ---

/// Raw hit from a search-engine call, before classification or verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub title: String,
    pub url: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub vendor: String,
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_structured_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_price: Option<f64>,
}

// --- Verification Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Unsure,
}

impl Availability {
    /// Map a schema.org offer availability string (with or without the
    /// `https://schema.org/` prefix) onto our three-state model.
    pub fn from_schema_org(value: &str) -> Self {
        let tail = value.rsplit('/').next().unwrap_or(value);
        match tail {
            "InStock" | "InStoreOnly" | "OnlineOnly" => Availability::InStock,
            "OutOfStock" | "SoldOut" | "Discontinued" => Availability::OutOfStock,
            "PreOrder" | "PreSale" | "BackOrder" | "LimitedAvailability" => Availability::InStock,
            _ => Availability::Unsure,
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::InStock => write!(f, "in stock"),
            Availability::OutOfStock => write!(f, "out of stock"),
            Availability::Unsure => write!(f, "unsure"),
        }
    }
}

/// How a product's price/availability was last obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Css,
    Ai,
    Cached,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionMethod::Css => write!(f, "css"),
            ExtractionMethod::Ai => write!(f, "ai"),
            ExtractionMethod::Cached => write!(f, "cached"),
        }
    }
}

/// A search candidate that passed AI matching. Enrichment mutates price and
/// availability in place; everything else is fixed at verification time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedProduct {
    pub product_name: String,
    pub price: f64,
    pub currency: String,
    pub source_url: String,
    pub vendor: String,
    pub confidence: f64,
    pub availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    pub match_reason: String,
}

// --- Pattern Learning Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LearningStatus {
    Pending,
    Learned,
    Failed,
}

impl LearningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStatus::Pending => "pending",
            LearningStatus::Learned => "learned",
            LearningStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LearningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// URL classification rules for one domain, learned by the research flow.
/// At most one record per domain; patterns are only trusted once the status
/// reaches `learned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorPatterns {
    pub domain: String,
    pub vendor_name: String,
    pub product_patterns: Vec<String>,
    pub category_patterns: Vec<String>,
    pub status: LearningStatus,
    pub confidence: f64,
    pub sample_size: i32,
    pub example_urls: Vec<String>,
    pub research_notes: Option<String>,
}
