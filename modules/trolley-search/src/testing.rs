// Test mocks for the search pipeline.
//
// Seven mocks matching the seven trait boundaries:
// - MockSearchApi (SearchApi) — fragment-matched query→hits, call log
// - MockMatchModel (MatchModel) — URL→decision and domain→research maps
// - MockChecker (AvailabilityChecker) — URL→CheckResult, batch log
// - MockPageFetcher (PageFetcher) — URL→HTML
// - MockPatternStore (PatternStorage) — in-memory pattern table
// - MockCache (CacheStorage) — in-memory cache table with counters
// - MockFreshness (FreshnessReader) — URL→fresh row
//
// Plus constructors for the common fixture shapes: hits, candidates,
// decisions, verified products, pattern records, sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use serper_client::{SearchHit, SerperError};
use stockcheck_client::{CheckItem, CheckResult};
use trolley_common::{
    Availability, LearningStatus, ProductQuery, SearchCandidate, VendorPatterns, VerifiedProduct,
};
use trolley_store::CachedSearch;

use crate::learner::{PatternResearch, UrlSample};
use crate::search::SearchSession;
use crate::traits::{
    AvailabilityChecker, CacheStorage, FreshnessReader, MatchModel, PageFetcher, PatternStorage,
    SearchApi,
};
use crate::vendors::fallback_vendor_name;
use crate::verifier::MatchDecision;

// ---------------------------------------------------------------------------
// MockSearchApi
// ---------------------------------------------------------------------------

enum SearchMode {
    Normal,
    Exhausted,
    Failing,
}

/// Fragment-matched search engine. A query serves the first registered
/// fragment it contains; unregistered queries return no hits. Every query
/// is logged for assertions.
pub struct MockSearchApi {
    responses: Vec<(String, Vec<SearchHit>)>,
    mode: SearchMode,
    calls: Mutex<Vec<String>>,
}

impl MockSearchApi {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            mode: SearchMode::Normal,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every search reports exhausted credits.
    pub fn exhausted() -> Self {
        Self {
            mode: SearchMode::Exhausted,
            ..Self::new()
        }
    }

    /// Every search fails with a network error.
    pub fn failing() -> Self {
        Self {
            mode: SearchMode::Failing,
            ..Self::new()
        }
    }

    pub fn on_query(mut self, fragment: &str, hits: Vec<SearchHit>) -> Self {
        self.responses.push((fragment.to_string(), hits));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchApi for MockSearchApi {
    async fn search(
        &self,
        query: &str,
        _max_results: usize,
    ) -> serper_client::Result<Vec<SearchHit>> {
        self.calls.lock().unwrap().push(query.to_string());
        match self.mode {
            SearchMode::Exhausted => return Err(SerperError::CreditsExhausted),
            SearchMode::Failing => return Err(SerperError::Network("connection reset".into())),
            SearchMode::Normal => {}
        }
        for (fragment, hits) in &self.responses {
            if query.contains(fragment.as_str()) {
                return Ok(hits.clone());
            }
        }
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// MockMatchModel
// ---------------------------------------------------------------------------

/// Scripted model. Match decisions are keyed by candidate URL, research by
/// domain; anything unscripted is an error unless `approving` set a default
/// verdict. Calls are counted/logged for assertions.
pub struct MockMatchModel {
    decisions: HashMap<String, MatchDecision>,
    default_decision: Option<MatchDecision>,
    research: HashMap<String, PatternResearch>,
    decide_calls: Mutex<u32>,
    research_calls: Mutex<Vec<(String, Vec<UrlSample>)>>,
}

impl MockMatchModel {
    pub fn new() -> Self {
        Self {
            decisions: HashMap::new(),
            default_decision: None,
            research: HashMap::new(),
            decide_calls: Mutex::new(0),
            research_calls: Mutex::new(Vec::new()),
        }
    }

    /// Approve every unscripted candidate at the given confidence.
    pub fn approving(confidence: f64) -> Self {
        Self {
            default_decision: Some(decision(true, confidence)),
            ..Self::new()
        }
    }

    pub fn on_url(mut self, url: &str, verdict: MatchDecision) -> Self {
        self.decisions.insert(url.to_string(), verdict);
        self
    }

    pub fn on_domain(mut self, domain: &str, findings: PatternResearch) -> Self {
        self.research.insert(domain.to_string(), findings);
        self
    }

    pub fn decide_calls(&self) -> u32 {
        *self.decide_calls.lock().unwrap()
    }

    pub fn research_calls(&self) -> Vec<(String, Vec<UrlSample>)> {
        self.research_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MatchModel for MockMatchModel {
    async fn decide_match(
        &self,
        _query: &ProductQuery,
        candidate: &SearchCandidate,
    ) -> Result<MatchDecision> {
        *self.decide_calls.lock().unwrap() += 1;
        self.decisions
            .get(&candidate.url)
            .or(self.default_decision.as_ref())
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!("MockMatchModel: no decision registered for {}", candidate.url)
            })
    }

    async fn research_patterns(
        &self,
        domain: &str,
        samples: &[UrlSample],
    ) -> Result<PatternResearch> {
        self.research_calls
            .lock()
            .unwrap()
            .push((domain.to_string(), samples.to_vec()));
        self.research
            .get(domain)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("MockMatchModel: no research registered for {domain}"))
    }
}

// ---------------------------------------------------------------------------
// MockChecker
// ---------------------------------------------------------------------------

/// URL-keyed stock checker. Items without a registered result are simply
/// absent from the response, like the real service's partial batches.
pub struct MockChecker {
    results: HashMap<String, CheckResult>,
    fail: bool,
    batches: Mutex<Vec<Vec<CheckItem>>>,
}

impl MockChecker {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            fail: false,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn on_url(mut self, url: &str, result: CheckResult) -> Self {
        self.results.insert(url.to_string(), result);
        self
    }

    pub fn batches(&self) -> Vec<Vec<CheckItem>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AvailabilityChecker for MockChecker {
    async fn check_batch(
        &self,
        items: Vec<CheckItem>,
        _concurrency: usize,
    ) -> Result<Vec<CheckResult>> {
        self.batches.lock().unwrap().push(items.clone());
        if self.fail {
            anyhow::bail!("MockChecker: batch failed");
        }
        Ok(items
            .iter()
            .filter_map(|item| self.results.get(&item.url).cloned())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockPageFetcher
// ---------------------------------------------------------------------------

/// HashMap-based page fetcher. Returns `Err` for unregistered URLs.
pub struct MockPageFetcher {
    pages: HashMap<String, String>,
    fetches: Mutex<Vec<String>>,
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn on_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for MockPageFetcher {
    async fn content(&self, url: &str) -> Result<String> {
        self.fetches.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("MockPageFetcher: no page registered for {url}"))
    }
}

// ---------------------------------------------------------------------------
// MockPatternStore
// ---------------------------------------------------------------------------

/// In-memory pattern table.
pub struct MockPatternStore {
    records: Mutex<HashMap<String, VendorPatterns>>,
}

impl MockPatternStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_learned(records: Vec<VendorPatterns>) -> Self {
        let store = Self::new();
        for record in records {
            store.record(record);
        }
        store
    }

    /// Insert a record directly, bypassing the learning flow.
    pub fn record(&self, record: VendorPatterns) {
        self.records
            .lock()
            .unwrap()
            .insert(record.domain.clone(), record);
    }

    pub fn status_of(&self, domain: &str) -> Option<LearningStatus> {
        self.records
            .lock()
            .unwrap()
            .get(domain)
            .map(|r| r.status)
    }
}

#[async_trait]
impl PatternStorage for MockPatternStore {
    async fn all_learned(&self) -> Result<HashMap<String, VendorPatterns>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.status == LearningStatus::Learned)
            .map(|(domain, r)| (domain.clone(), r.clone()))
            .collect())
    }

    async fn get(&self, domain: &str) -> Result<Option<VendorPatterns>> {
        Ok(self.records.lock().unwrap().get(domain).cloned())
    }

    async fn upsert_pending(&self, domain: &str, vendor_name: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        records
            .entry(domain.to_string())
            .and_modify(|r| {
                r.status = LearningStatus::Pending;
                r.vendor_name = vendor_name.to_string();
            })
            .or_insert_with(|| VendorPatterns {
                domain: domain.to_string(),
                vendor_name: vendor_name.to_string(),
                product_patterns: Vec::new(),
                category_patterns: Vec::new(),
                status: LearningStatus::Pending,
                confidence: 0.0,
                sample_size: 0,
                example_urls: Vec::new(),
                research_notes: None,
            });
        Ok(())
    }

    async fn mark_learned(&self, patterns: &VendorPatterns) -> Result<()> {
        self.record(patterns.clone());
        Ok(())
    }

    async fn mark_failed(&self, domain: &str, vendor_name: &str, reason: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        records
            .entry(domain.to_string())
            .and_modify(|r| {
                r.status = LearningStatus::Failed;
                r.research_notes = Some(reason.to_string());
            })
            .or_insert_with(|| VendorPatterns {
                domain: domain.to_string(),
                vendor_name: vendor_name.to_string(),
                product_patterns: Vec::new(),
                category_patterns: Vec::new(),
                status: LearningStatus::Failed,
                confidence: 0.0,
                sample_size: 0,
                example_urls: Vec::new(),
                research_notes: Some(reason.to_string()),
            });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockCache
// ---------------------------------------------------------------------------

/// In-memory result cache keyed by (normalized query, limit), with call
/// counters for idempotence assertions.
pub struct MockCache {
    entries: Mutex<HashMap<(String, usize), CachedSearch>>,
    fail_lookup: bool,
    lookup_calls: Mutex<u32>,
    store_calls: Mutex<u32>,
}

impl MockCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail_lookup: false,
            lookup_calls: Mutex::new(0),
            store_calls: Mutex::new(0),
        }
    }

    /// Every lookup errors; the pipeline must treat that as a miss.
    pub fn failing_lookup() -> Self {
        Self {
            fail_lookup: true,
            ..Self::new()
        }
    }

    pub fn seeded(query: &str, limit: usize, results: Vec<VerifiedProduct>) -> Self {
        let cache = Self::new();
        cache.entries.lock().unwrap().insert(
            (query.to_string(), limit),
            CachedSearch {
                results,
                metadata: serde_json::json!({"strategy": "priority"}),
                created_at: Utc::now(),
                hit_count: 0,
            },
        );
        cache
    }

    pub fn lookup_calls(&self) -> u32 {
        *self.lookup_calls.lock().unwrap()
    }

    pub fn store_calls(&self) -> u32 {
        *self.store_calls.lock().unwrap()
    }

    /// The stored entry for a key, if a write has landed.
    pub fn stored(&self, query: &str, limit: usize) -> Option<Vec<VerifiedProduct>> {
        self.entries
            .lock()
            .unwrap()
            .get(&(query.to_string(), limit))
            .map(|entry| entry.results.clone())
    }
}

#[async_trait]
impl CacheStorage for MockCache {
    async fn lookup(&self, normalized_query: &str, limit: usize) -> Result<Option<CachedSearch>> {
        *self.lookup_calls.lock().unwrap() += 1;
        if self.fail_lookup {
            anyhow::bail!("MockCache: lookup failed");
        }
        let mut entries = self.entries.lock().unwrap();
        Ok(entries
            .get_mut(&(normalized_query.to_string(), limit))
            .map(|entry| {
                let served = entry.clone();
                entry.hit_count += 1;
                served
            }))
    }

    async fn store(
        &self,
        normalized_query: &str,
        limit: usize,
        results: &[VerifiedProduct],
        metadata: &serde_json::Value,
    ) -> Result<()> {
        *self.store_calls.lock().unwrap() += 1;
        self.entries.lock().unwrap().insert(
            (normalized_query.to_string(), limit),
            CachedSearch {
                results: results.to_vec(),
                metadata: metadata.clone(),
                created_at: Utc::now(),
                hit_count: 0,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockFreshness
// ---------------------------------------------------------------------------

/// URL-keyed fresh rows from the shared product table.
pub struct MockFreshness {
    rows: HashMap<String, (Option<f64>, Option<String>)>,
    fail: bool,
}

impl MockFreshness {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn on_url(mut self, url: &str, price: Option<f64>, stock_status: Option<&str>) -> Self {
        self.rows
            .insert(url.to_string(), (price, stock_status.map(String::from)));
        self
    }
}

#[async_trait]
impl FreshnessReader for MockFreshness {
    async fn fresh_by_urls(&self, urls: &[String]) -> Result<Vec<trolley_store::FreshProduct>> {
        if self.fail {
            anyhow::bail!("MockFreshness: query failed");
        }
        Ok(urls
            .iter()
            .filter_map(|url| {
                self.rows.get(url).map(|(price, stock_status)| {
                    trolley_store::FreshProduct {
                        url: url.clone(),
                        price: *price,
                        stock_status: stock_status.clone(),
                        updated_at: Utc::now(),
                    }
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Fixture constructors
// ---------------------------------------------------------------------------

/// A search hit; priced hits carry GBP like real shopping results.
pub fn hit(title: &str, link: &str, price: Option<f64>) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        link: link.to_string(),
        snippet: None,
        price,
        currency: price.map(|_| "GBP".to_string()),
    }
}

pub fn candidate(vendor: &str, url: &str, title: &str, price: Option<f64>) -> SearchCandidate {
    SearchCandidate {
        title: title.to_string(),
        url: url.to_string(),
        price,
        currency: Some("GBP".to_string()),
        vendor: vendor.to_string(),
        snippet: None,
        raw_structured_data: None,
        scraped_price: None,
    }
}

pub fn decision(is_match: bool, confidence: f64) -> MatchDecision {
    MatchDecision {
        is_match,
        product_name: None,
        price: None,
        confidence,
        reason: "scripted verdict".to_string(),
    }
}

pub fn research(product: Vec<&str>, category: Vec<&str>, confidence: f64) -> PatternResearch {
    PatternResearch {
        product_patterns: product.into_iter().map(String::from).collect(),
        category_patterns: category.into_iter().map(String::from).collect(),
        confidence,
        example_product_urls: Vec::new(),
        notes: None,
    }
}

pub fn verified(
    vendor: &str,
    url: &str,
    name: &str,
    price: f64,
    confidence: f64,
) -> VerifiedProduct {
    VerifiedProduct {
        product_name: name.to_string(),
        price,
        currency: "GBP".to_string(),
        source_url: url.to_string(),
        vendor: vendor.to_string(),
        confidence,
        availability: Availability::Unsure,
        extraction_method: None,
        match_reason: "scripted match".to_string(),
    }
}

pub fn learned_patterns(domain: &str, product: Vec<&str>, category: Vec<&str>) -> VendorPatterns {
    VendorPatterns {
        domain: domain.to_string(),
        vendor_name: fallback_vendor_name(domain),
        product_patterns: product.into_iter().map(String::from).collect(),
        category_patterns: category.into_iter().map(String::from).collect(),
        status: LearningStatus::Learned,
        confidence: 0.9,
        sample_size: 10,
        example_urls: Vec::new(),
        research_notes: None,
    }
}

/// A session with no fallback credential.
pub fn mock_session(api: Arc<MockSearchApi>) -> Arc<SearchSession> {
    Arc::new(SearchSession::new(api, None))
}

/// A session with primary and fallback credentials.
pub fn mock_failover_session(
    primary: Arc<MockSearchApi>,
    fallback: Arc<MockSearchApi>,
) -> Arc<SearchSession> {
    Arc::new(SearchSession::new(
        primary,
        Some(fallback as Arc<dyn SearchApi>),
    ))
}
