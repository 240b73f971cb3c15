// Trait abstractions for the pipeline's external dependencies.
//
// SearchApi — one raw web search call (Serper). Kept at the serper error
//   type so credit exhaustion stays distinguishable for failover.
// MatchModel — the two model calls: verify one candidate, research one
//   domain's URL patterns. Prompts live with the stages; the Claude impl
//   here only wires them to ai-client's structured extraction.
// AvailabilityChecker / PageFetcher — the two scraping services.
// PatternStorage / CacheStorage / FreshnessReader — the three Postgres
//   surfaces the pipeline touches.
//
// These enable deterministic testing with the mocks in testing.rs: no
// network, no database, no API keys.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use ai_client::Claude;
use pagefetch_client::PagefetchClient;
use serper_client::{SearchHit, SerperClient};
use stockcheck_client::{CheckItem, CheckResult, StockcheckClient};
use trolley_common::{ProductQuery, SearchCandidate, VendorPatterns, VerifiedProduct};
use trolley_store::{CachedSearch, FreshProduct, PatternStore, ProductReader, SearchCache};

use crate::learner::{self, PatternResearch, UrlSample};
use crate::vendors::REGION;
use crate::verifier::{self, MatchDecision};

// ---------------------------------------------------------------------------
// SearchApi — one credential's view of the search engine
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Run one web search and return the organic hits.
    async fn search(&self, query: &str, max_results: usize)
        -> serper_client::Result<Vec<SearchHit>>;
}

#[async_trait]
impl SearchApi for SerperClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> serper_client::Result<Vec<SearchHit>> {
        self.search(query, REGION, max_results).await
    }
}

// ---------------------------------------------------------------------------
// MatchModel — structured model calls
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MatchModel: Send + Sync {
    /// Is this candidate a listing for exactly the queried product?
    async fn decide_match(
        &self,
        query: &ProductQuery,
        candidate: &SearchCandidate,
    ) -> Result<MatchDecision>;

    /// Derive URL classification patterns for one domain from sample URLs.
    async fn research_patterns(
        &self,
        domain: &str,
        samples: &[UrlSample],
    ) -> Result<PatternResearch>;
}

#[async_trait]
impl MatchModel for Claude {
    async fn decide_match(
        &self,
        query: &ProductQuery,
        candidate: &SearchCandidate,
    ) -> Result<MatchDecision> {
        self.extract(
            verifier::MATCH_SYSTEM_PROMPT,
            verifier::match_user_prompt(query, candidate),
        )
        .await
    }

    async fn research_patterns(
        &self,
        domain: &str,
        samples: &[UrlSample],
    ) -> Result<PatternResearch> {
        self.extract(
            learner::RESEARCH_SYSTEM_PROMPT,
            learner::research_user_prompt(domain, samples),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// AvailabilityChecker — the stock-check service
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    /// Check a batch of product pages; `concurrency` is a hint for the
    /// service's browser pool.
    async fn check_batch(
        &self,
        items: Vec<CheckItem>,
        concurrency: usize,
    ) -> Result<Vec<CheckResult>>;
}

#[async_trait]
impl AvailabilityChecker for StockcheckClient {
    async fn check_batch(
        &self,
        items: Vec<CheckItem>,
        concurrency: usize,
    ) -> Result<Vec<CheckResult>> {
        Ok(self.check_batch(items, concurrency).await?.results)
    }
}

// ---------------------------------------------------------------------------
// PageFetcher — rendered HTML for structured-data scraping
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch fully-rendered HTML for a URL.
    async fn content(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl PageFetcher for PagefetchClient {
    async fn content(&self, url: &str) -> Result<String> {
        Ok(self.content(url).await?)
    }
}

// ---------------------------------------------------------------------------
// PatternStorage — the vendor_url_patterns table
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PatternStorage: Send + Sync {
    /// All trusted patterns, keyed by domain. Loaded once per request.
    async fn all_learned(&self) -> Result<HashMap<String, VendorPatterns>>;

    /// The record for one domain, any status.
    async fn get(&self, domain: &str) -> Result<Option<VendorPatterns>>;

    /// Claim a domain for research.
    async fn upsert_pending(&self, domain: &str, vendor_name: &str) -> Result<()>;

    /// Persist a successful research run.
    async fn mark_learned(&self, patterns: &VendorPatterns) -> Result<()>;

    /// Persist a failed research run with the reason.
    async fn mark_failed(&self, domain: &str, vendor_name: &str, reason: &str) -> Result<()>;
}

#[async_trait]
impl PatternStorage for PatternStore {
    async fn all_learned(&self) -> Result<HashMap<String, VendorPatterns>> {
        Ok(self.all_learned().await?)
    }

    async fn get(&self, domain: &str) -> Result<Option<VendorPatterns>> {
        Ok(self.get(domain).await?)
    }

    async fn upsert_pending(&self, domain: &str, vendor_name: &str) -> Result<()> {
        Ok(self.upsert_pending(domain, vendor_name).await?)
    }

    async fn mark_learned(&self, patterns: &VendorPatterns) -> Result<()> {
        Ok(self.mark_learned(patterns).await?)
    }

    async fn mark_failed(&self, domain: &str, vendor_name: &str, reason: &str) -> Result<()> {
        Ok(self.mark_failed(domain, vendor_name, reason).await?)
    }
}

// ---------------------------------------------------------------------------
// CacheStorage — the search_cache table
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// A servable previous response, if one exists and has not expired.
    async fn lookup(&self, normalized_query: &str, limit: usize) -> Result<Option<CachedSearch>>;

    /// Upsert a response. Only called with at least one result.
    async fn store(
        &self,
        normalized_query: &str,
        limit: usize,
        results: &[VerifiedProduct],
        metadata: &serde_json::Value,
    ) -> Result<()>;
}

#[async_trait]
impl CacheStorage for SearchCache {
    async fn lookup(&self, normalized_query: &str, limit: usize) -> Result<Option<CachedSearch>> {
        Ok(self.lookup(normalized_query, limit).await?)
    }

    async fn store(
        &self,
        normalized_query: &str,
        limit: usize,
        results: &[VerifiedProduct],
        metadata: &serde_json::Value,
    ) -> Result<()> {
        Ok(self.store(normalized_query, limit, results, metadata).await?)
    }
}

// ---------------------------------------------------------------------------
// FreshnessReader — the shared scraped_products table
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FreshnessReader: Send + Sync {
    /// Recently scraped rows for any of `urls`.
    async fn fresh_by_urls(&self, urls: &[String]) -> Result<Vec<FreshProduct>>;
}

#[async_trait]
impl FreshnessReader for ProductReader {
    async fn fresh_by_urls(&self, urls: &[String]) -> Result<Vec<FreshProduct>> {
        Ok(self.fresh_by_urls(urls).await?)
    }
}
