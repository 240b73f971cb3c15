//! The product search pipeline: cache, priority vendor fan-out, AI
//! verification, broader fallback with pattern learning, enrichment,
//! ranking, and the fire-and-forget cache write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, warn};

use ai_client::Claude;
use pagefetch_client::PagefetchClient;
use serper_client::SerperClient;
use stockcheck_client::StockcheckClient;
use trolley_common::{
    registrable_host, Config, ProductQuery, SearchCandidate, TrolleyError, VerifiedProduct,
};
use trolley_store::{PatternStore, ProductReader, SearchCache};

use crate::classifier::RuleSet;
use crate::enrichment::Enricher;
use crate::learner::PatternLearner;
use crate::search::{search_broader, search_vendor, BroaderSearch, SearchSession};
use crate::traits::{
    AvailabilityChecker, CacheStorage, FreshnessReader, MatchModel, PageFetcher, PatternStorage,
    SearchApi,
};
use crate::vendors::{is_blocked, priority_rank, PRIORITY_VENDORS};
use crate::verifier::Verifier;

/// Verified products below this confidence are discarded.
pub const MIN_CONFIDENCE: f64 = 0.7;
/// Priority vendors searched at once.
const SEARCH_CONCURRENCY: usize = 6;
/// Candidates verified at once.
const VERIFY_CONCURRENCY: usize = 5;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Stage counts for one pipeline run. Serializes into the API's debug block;
/// the skipped fields surface through `metadata` instead.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineStats {
    pub priority_candidates: u32,
    pub after_dedup: u32,
    pub after_blocklist: u32,
    pub verified: u32,
    pub fallback_used: bool,
    pub fallback_candidates: u32,
    pub fallback_verified: u32,
    pub enriched_from_cache: u32,
    pub enriched_from_checker: u32,
    pub enriched_from_scrape: u32,
    pub domains_learned: u32,
    #[serde(skip)]
    pub cache_hit: bool,
    #[serde(skip)]
    pub used_fallback_key: bool,
    #[serde(skip)]
    pub execution_ms: u64,
}

impl PipelineStats {
    pub fn strategy(&self) -> &'static str {
        if self.cache_hit {
            "cache"
        } else if self.fallback_used {
            "priority+fallback"
        } else {
            "priority"
        }
    }
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Product Search Complete ===")?;
        writeln!(f, "Strategy:            {}", self.strategy())?;
        writeln!(f, "Priority candidates: {}", self.priority_candidates)?;
        writeln!(f, "After dedup:         {}", self.after_dedup)?;
        writeln!(f, "After blocklist:     {}", self.after_blocklist)?;
        writeln!(f, "Verified:            {}", self.verified)?;
        if self.fallback_used {
            writeln!(f, "Fallback candidates: {}", self.fallback_candidates)?;
            writeln!(f, "Fallback verified:   {}", self.fallback_verified)?;
            writeln!(f, "Domains learned:     {}", self.domains_learned)?;
        }
        writeln!(
            f,
            "Enriched:            {} cache / {} checker / {} scrape",
            self.enriched_from_cache, self.enriched_from_checker, self.enriched_from_scrape
        )?;
        write!(f, "Took:                {}ms", self.execution_ms)
    }
}

/// What one run produced: ranked priced results, unpriced leftovers, counts.
#[derive(Debug)]
pub struct SearchOutcome {
    pub products: Vec<VerifiedProduct>,
    pub products_without_price: Vec<VerifiedProduct>,
    pub stats: PipelineStats,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct SearchPipeline {
    session: Arc<SearchSession>,
    model: Arc<dyn MatchModel>,
    patterns: Arc<dyn PatternStorage>,
    cache: Arc<dyn CacheStorage>,
    freshness: Arc<dyn FreshnessReader>,
    checker: Arc<dyn AvailabilityChecker>,
    fetcher: Arc<dyn PageFetcher>,
}

impl SearchPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<SearchSession>,
        model: Arc<dyn MatchModel>,
        patterns: Arc<dyn PatternStorage>,
        cache: Arc<dyn CacheStorage>,
        freshness: Arc<dyn FreshnessReader>,
        checker: Arc<dyn AvailabilityChecker>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            session,
            model,
            patterns,
            cache,
            freshness,
            checker,
            fetcher,
        }
    }

    /// Wire the live clients and stores from configuration.
    pub fn from_config(config: &Config, pool: PgPool) -> Self {
        let primary: Arc<dyn SearchApi> = Arc::new(SerperClient::new(&config.serper_api_key));
        let fallback: Option<Arc<dyn SearchApi>> = config
            .serper_fallback_api_key
            .as_deref()
            .map(|key| Arc::new(SerperClient::new(key)) as Arc<dyn SearchApi>);
        Self::new(
            Arc::new(SearchSession::new(primary, fallback)),
            Arc::new(Claude::new(
                config.anthropic_api_key.clone(),
                ai_client::DEFAULT_MODEL,
            )),
            Arc::new(PatternStore::new(pool.clone())),
            Arc::new(SearchCache::new(pool.clone())),
            Arc::new(ProductReader::new(pool)),
            Arc::new(StockcheckClient::new(
                &config.stockcheck_url,
                config.stockcheck_token.as_deref(),
            )),
            Arc::new(PagefetchClient::new(
                &config.pagefetch_url,
                config.pagefetch_token.as_deref(),
            )),
        )
    }

    /// Run the whole pipeline for one query.
    pub async fn run(&self, query: &ProductQuery) -> Result<SearchOutcome, TrolleyError> {
        let started = Instant::now();
        info!(
            query = %query.text,
            limit = query.limit,
            bypass_cache = query.bypass_cache,
            "Product search"
        );

        if !query.bypass_cache {
            if let Some(outcome) = self.try_cached(query, started).await {
                return Ok(outcome);
            }
        }

        let mut stats = PipelineStats::default();

        // The rule set lives and dies with this request; learned patterns
        // picked up mid-run extend it through RuleSet::absorb.
        let learned = match self.patterns.all_learned().await {
            Ok(learned) => learned,
            Err(e) => {
                warn!(error = %e, "Could not load learned patterns, using static rules only");
                HashMap::new()
            }
        };
        let mut rules = RuleSet::with_learned(&learned);

        let candidates = self.priority_stage(query, &rules).await?;
        stats.priority_candidates = candidates.len() as u32;

        let candidates = dedup_by_vendor(candidates);
        stats.after_dedup = candidates.len() as u32;

        let candidates = drop_blocked(candidates);
        stats.after_blocklist = candidates.len() as u32;

        let mut verified = self.verify_stage(query, candidates).await;
        stats.verified = verified.len() as u32;

        if verified.len() < query.limit {
            stats.fallback_used = true;
            let learner = PatternLearner::new(
                self.session.clone(),
                self.model.clone(),
                self.patterns.clone(),
            );
            let broader = self.fallback_stage(query, &learner, &mut rules).await?;
            stats.fallback_candidates = broader.candidates.len() as u32;
            stats.domains_learned = broader.domains_learned;

            // Verify only vendors the priority stage did not already place.
            let existing: HashSet<String> = verified
                .iter()
                .map(|p| normalize_vendor(&p.vendor))
                .collect();
            let fresh: Vec<SearchCandidate> = dedup_by_vendor(broader.candidates)
                .into_iter()
                .filter(|c| !existing.contains(&normalize_vendor(&c.vendor)))
                .collect();

            let fallback_verified = self.verify_stage(query, fresh).await;
            stats.fallback_verified = fallback_verified.len() as u32;
            verified.extend(fallback_verified);
        }

        let enricher = Enricher::new(
            self.freshness.clone(),
            self.checker.clone(),
            self.fetcher.clone(),
        );
        let (enriched, enrichment) = enricher.enrich(verified).await;
        stats.enriched_from_cache = enrichment.from_cache;
        stats.enriched_from_checker = enrichment.from_checker;
        stats.enriched_from_scrape = enrichment.from_scrape;

        let (mut priced, mut unpriced) = split_by_price(enriched);
        rank(&mut priced);

        // The cache keeps everything; the response is truncated.
        let full: Vec<VerifiedProduct> = priced.iter().chain(unpriced.iter()).cloned().collect();
        priced.truncate(query.limit);
        unpriced.truncate(query.limit);

        stats.used_fallback_key = self.session.used_fallback();
        stats.execution_ms = started.elapsed().as_millis() as u64;
        info!("{stats}");

        if !full.is_empty() {
            self.spawn_cache_write(query, &stats, full);
        }

        Ok(SearchOutcome {
            products: priced,
            products_without_price: unpriced,
            stats,
        })
    }

    // --- stages ---

    async fn priority_stage(
        &self,
        query: &ProductQuery,
        rules: &RuleSet,
    ) -> Result<Vec<SearchCandidate>, TrolleyError> {
        match self.priority_fan_out(query, rules).await {
            Err(TrolleyError::CreditsExhausted) if self.session.fail_over() => {
                self.priority_fan_out(query, rules).await
            }
            other => other,
        }
    }

    /// All priority vendors, a few at a time, joined in list order so the
    /// later vendor dedup is deterministic.
    async fn priority_fan_out(
        &self,
        query: &ProductQuery,
        rules: &RuleSet,
    ) -> Result<Vec<SearchCandidate>, TrolleyError> {
        let session = &self.session;
        let searches: Vec<_> = PRIORITY_VENDORS
            .iter()
            .map(|vendor| search_vendor(session, query, vendor, rules))
            .collect();
        let grouped: Vec<Vec<SearchCandidate>> = stream::iter(searches)
            .buffered(SEARCH_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(grouped.into_iter().flatten().collect())
    }

    async fn fallback_stage(
        &self,
        query: &ProductQuery,
        learner: &PatternLearner,
        rules: &mut RuleSet,
    ) -> Result<BroaderSearch, TrolleyError> {
        match search_broader(&self.session, learner, &self.fetcher, query, rules).await {
            Err(TrolleyError::CreditsExhausted) if self.session.fail_over() => {
                search_broader(&self.session, learner, &self.fetcher, query, rules).await
            }
            other => other,
        }
    }

    /// Verify candidates a few at a time and keep confident matches, in
    /// candidate order.
    async fn verify_stage(
        &self,
        query: &ProductQuery,
        candidates: Vec<SearchCandidate>,
    ) -> Vec<VerifiedProduct> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let verifier = Verifier::new(self.model.clone());
        let verifier = &verifier;
        let checks: Vec<_> = candidates
            .iter()
            .map(|candidate| verifier.verify(query, candidate))
            .collect();
        let decisions: Vec<Option<VerifiedProduct>> = stream::iter(checks)
            .buffered(VERIFY_CONCURRENCY)
            .collect()
            .await;

        decisions
            .into_iter()
            .flatten()
            .filter(|p| {
                if p.confidence >= MIN_CONFIDENCE {
                    return true;
                }
                info!(
                    product = %p.product_name,
                    vendor = %p.vendor,
                    confidence = p.confidence,
                    "Dropping low-confidence match"
                );
                false
            })
            .collect()
    }

    // --- cache ---

    async fn try_cached(&self, query: &ProductQuery, started: Instant) -> Option<SearchOutcome> {
        let cached = match self.cache.lookup(&query.normalized(), query.limit).await {
            Ok(cached) => cached?,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                return None;
            }
        };

        let age_mins = (chrono::Utc::now() - cached.created_at).num_minutes();
        info!(
            query = %query.text,
            age_mins,
            hits = cached.hit_count,
            "Serving cached results"
        );

        let (mut priced, mut unpriced) = split_by_price(cached.results);
        priced.truncate(query.limit);
        unpriced.truncate(query.limit);

        let stats = PipelineStats {
            cache_hit: true,
            execution_ms: started.elapsed().as_millis() as u64,
            ..PipelineStats::default()
        };
        Some(SearchOutcome {
            products: priced,
            products_without_price: unpriced,
            stats,
        })
    }

    fn spawn_cache_write(
        &self,
        query: &ProductQuery,
        stats: &PipelineStats,
        results: Vec<VerifiedProduct>,
    ) {
        let cache = self.cache.clone();
        let key = query.normalized();
        let limit = query.limit;
        let metadata = serde_json::json!({
            "strategy": stats.strategy(),
            "stats": stats,
            "cached_at": chrono::Utc::now().to_rfc3339(),
        });
        tokio::spawn(async move {
            if let Err(e) = cache.store(&key, limit, &results, &metadata).await {
                error!(query = %key, error = %e, "Cache write failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn normalize_vendor(vendor: &str) -> String {
    vendor.trim().to_lowercase()
}

/// First candidate per vendor wins. The fan-out joins in priority order, so
/// this keeps each vendor's top hit.
fn dedup_by_vendor(candidates: Vec<SearchCandidate>) -> Vec<SearchCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(normalize_vendor(&c.vendor)))
        .collect()
}

fn drop_blocked(candidates: Vec<SearchCandidate>) -> Vec<SearchCandidate> {
    candidates
        .into_iter()
        .filter(|c| match registrable_host(&c.url) {
            Some(host) => !is_blocked(&host),
            None => false,
        })
        .collect()
}

fn split_by_price(products: Vec<VerifiedProduct>) -> (Vec<VerifiedProduct>, Vec<VerifiedProduct>) {
    products.into_iter().partition(|p| p.price > 0.0)
}

/// Priority vendors first, then everyone else; ascending price within each
/// group, priority-list position then vendor name as tiebreaks.
fn rank(products: &mut [VerifiedProduct]) {
    products.sort_by(|a, b| {
        let a_rank = priority_rank(&a.vendor);
        let b_rank = priority_rank(&b.vendor);
        match (a_rank.is_some(), b_rank.is_some()) {
            (true, false) => return std::cmp::Ordering::Less,
            (false, true) => return std::cmp::Ordering::Greater,
            _ => {}
        }
        a.price
            .partial_cmp(&b.price)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a_rank.unwrap_or(usize::MAX).cmp(&b_rank.unwrap_or(usize::MAX)))
            .then_with(|| a.vendor.cmp(&b.vendor))
    });
}
