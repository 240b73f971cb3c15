//! Pattern learning: when the broader search surfaces a domain nobody has
//! classified before, sample its URLs through site-restricted searches and
//! have the model derive product/category regexes for it. Results persist in
//! Postgres so each domain is researched at most once.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use trolley_common::{
    host_matches_domain, registrable_host, LearningStatus, TrolleyError, VendorPatterns,
};

use crate::search::SearchSession;
use crate::traits::{MatchModel, PatternStorage};
use crate::vendors::fallback_vendor_name;

/// Stop sampling once this many URLs are in hand.
const TARGET_SAMPLE_URLS: usize = 10;
/// Below this, the domain is not worth showing to the model.
const MIN_SAMPLE_URLS: usize = 3;
/// Results requested per sampling search.
const SAMPLE_SEARCH_RESULTS: usize = 20;
/// Example URLs kept on the learned record.
const MAX_EXAMPLE_URLS: usize = 5;
/// Domains researched at once during a broader search.
const LEARN_CONCURRENCY: usize = 5;

/// One sampled URL from a site-restricted search.
#[derive(Debug, Clone)]
pub struct UrlSample {
    pub url: String,
    pub title: String,
    pub price: Option<f64>,
}

/// The model's URL-scheme research for one domain.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PatternResearch {
    /// Regexes matching product-page paths. Empty when no safe pattern exists.
    pub product_patterns: Vec<String>,
    /// Regexes matching category or listing paths.
    pub category_patterns: Vec<String>,
    /// 0-1 confidence that the patterns generalize beyond the samples.
    pub confidence: f64,
    /// Sample URLs judged to be product pages.
    pub example_product_urls: Vec<String>,
    /// Observations about the site's URL scheme.
    pub notes: Option<String>,
}

pub(crate) const RESEARCH_SYSTEM_PROMPT: &str = r#"You study one retailer's website URLs and derive regular expressions that tell individual product pages apart from category, search and listing pages.

You are given sample URLs from the site; lines starting with a £ price came from shopping results and are very likely product pages. Work out the site's URL scheme from them.

Rules:
- Patterns are matched against the URL path plus query string, never the host.
- Use standard regex syntax with no inline flags. Escape literal dots.
- A product pattern must anchor on something unique to a single item: a /product/ or /p/ segment, an item id, a numeric SKU suffix.
- Be conservative. A pattern that also matches category, search, pagination or filter URLs is worse than no pattern. Watch for plural index segments and page=, sort= or filter parameters.
- Category patterns are optional; supply them when the site has a recognizable category scheme.
- List up to five of the sample URLs you judged to be product pages, and your confidence that the patterns generalize."#;

pub(crate) fn research_user_prompt(domain: &str, samples: &[UrlSample]) -> String {
    let mut prompt = format!("Sample URLs from {domain}:\n\n");
    for sample in samples {
        match sample.price {
            Some(price) => {
                prompt.push_str(&format!("£{price:.2} {} | {}\n", sample.url, sample.title))
            }
            None => prompt.push_str(&format!("{} | {}\n", sample.url, sample.title)),
        }
    }
    prompt
}

/// Four sampling searches, most specific first. The user's own terms find
/// priced shopping results; the rest trawl for anything product-shaped.
fn sample_queries(domain: &str, query_text: &str) -> [String; 4] {
    [
        format!("{query_text} site:{domain}"),
        format!("\"add to bag\" OR \"add to cart\" site:{domain}"),
        format!("buy price £ site:{domain} -category -collections"),
        format!("product site:{domain}"),
    ]
}

pub struct PatternLearner {
    session: Arc<SearchSession>,
    model: Arc<dyn MatchModel>,
    patterns: Arc<dyn PatternStorage>,
}

impl PatternLearner {
    pub fn new(
        session: Arc<SearchSession>,
        model: Arc<dyn MatchModel>,
        patterns: Arc<dyn PatternStorage>,
    ) -> Self {
        Self {
            session,
            model,
            patterns,
        }
    }

    /// Learn `domain` unless a previous run already settled it. Learned and
    /// failed records are terminal; a leftover pending claim is taken over.
    pub async fn learn(
        &self,
        domain: &str,
        query_text: &str,
    ) -> Result<VendorPatterns, TrolleyError> {
        if let Some(existing) = self.patterns.get(domain).await? {
            match existing.status {
                LearningStatus::Learned | LearningStatus::Failed => return Ok(existing),
                LearningStatus::Pending => {}
            }
        }
        self.research(domain, query_text).await
    }

    /// Research `domain` again regardless of its stored status.
    pub async fn relearn(
        &self,
        domain: &str,
        query_text: &str,
    ) -> Result<VendorPatterns, TrolleyError> {
        self.research(domain, query_text).await
    }

    /// Learn several domains concurrently. A domain that cannot be learned
    /// is skipped with a warning; the Vec holds every settled record, failed
    /// ones included.
    pub async fn learn_all(&self, domains: &[String], query_text: &str) -> Vec<VendorPatterns> {
        let researches: Vec<_> = domains
            .iter()
            .map(|domain| async move { (domain, self.learn(domain, query_text).await) })
            .collect();
        let outcomes: Vec<_> = stream::iter(researches)
            .buffer_unordered(LEARN_CONCURRENCY)
            .collect()
            .await;

        let mut settled = Vec::new();
        for (domain, outcome) in outcomes {
            match outcome {
                Ok(record) => settled.push(record),
                Err(e) => warn!(domain = %domain, error = %e, "Skipping unlearnable domain"),
            }
        }
        settled
    }

    async fn research(
        &self,
        domain: &str,
        query_text: &str,
    ) -> Result<VendorPatterns, TrolleyError> {
        let vendor_name = fallback_vendor_name(domain);
        self.patterns.upsert_pending(domain, &vendor_name).await?;

        match self.research_inner(domain, &vendor_name, query_text).await {
            Ok(record) => {
                info!(
                    domain = %domain,
                    product_patterns = record.product_patterns.len(),
                    category_patterns = record.category_patterns.len(),
                    confidence = record.confidence,
                    "Learned URL patterns"
                );
                self.patterns.mark_learned(&record).await?;
                Ok(record)
            }
            // Exhausted credits are transient; leave the claim pending for a
            // later run instead of poisoning the domain.
            Err(TrolleyError::CreditsExhausted) => Err(TrolleyError::CreditsExhausted),
            Err(e) => {
                let reason = e.to_string();
                warn!(domain = %domain, reason = %reason, "Pattern research failed");
                self.patterns.mark_failed(domain, &vendor_name, &reason).await?;
                Ok(failed_record(domain, &vendor_name, &reason))
            }
        }
    }

    async fn research_inner(
        &self,
        domain: &str,
        vendor_name: &str,
        query_text: &str,
    ) -> Result<VendorPatterns, TrolleyError> {
        let samples = self.collect_samples(domain, query_text).await?;
        if samples.len() < MIN_SAMPLE_URLS {
            return Err(TrolleyError::Search(format!(
                "only {} sample URLs found, need {MIN_SAMPLE_URLS}",
                samples.len()
            )));
        }

        let research = self
            .model
            .research_patterns(domain, &samples)
            .await
            .map_err(|e| TrolleyError::Verification(e.to_string()))?;

        let product_patterns = compiling_patterns(domain, "product", research.product_patterns);
        let category_patterns = compiling_patterns(domain, "category", research.category_patterns);
        if product_patterns.is_empty() {
            return Err(TrolleyError::Verification(
                "research produced no usable product pattern".to_string(),
            ));
        }

        let mut example_urls = research.example_product_urls;
        example_urls.truncate(MAX_EXAMPLE_URLS);

        Ok(VendorPatterns {
            domain: domain.to_string(),
            vendor_name: vendor_name.to_string(),
            product_patterns,
            category_patterns,
            status: LearningStatus::Learned,
            confidence: research.confidence.clamp(0.0, 1.0),
            sample_size: samples.len() as i32,
            example_urls,
            research_notes: research.notes,
        })
    }

    /// Walk the sampling strategies until enough distinct on-domain URLs are
    /// collected. Priced samples sort first so the model sees the strongest
    /// product-page evidence at the top of the prompt.
    async fn collect_samples(
        &self,
        domain: &str,
        query_text: &str,
    ) -> Result<Vec<UrlSample>, TrolleyError> {
        let mut seen = HashSet::new();
        let mut samples = Vec::new();

        for query in sample_queries(domain, query_text) {
            if samples.len() >= TARGET_SAMPLE_URLS {
                break;
            }
            let hits = match self.site_search(&query).await {
                Ok(hits) => hits,
                Err(TrolleyError::CreditsExhausted) => return Err(TrolleyError::CreditsExhausted),
                Err(e) => {
                    warn!(query = %query, error = %e, "Sampling search failed");
                    continue;
                }
            };
            for hit in hits {
                let Some(host) = registrable_host(&hit.link) else {
                    continue;
                };
                if !host_matches_domain(&host, domain) || !seen.insert(hit.link.clone()) {
                    continue;
                }
                samples.push(UrlSample {
                    url: hit.link,
                    title: hit.title,
                    price: hit.price,
                });
            }
        }

        samples.sort_by_key(|s| s.price.is_none());
        Ok(samples)
    }

    async fn site_search(
        &self,
        query: &str,
    ) -> Result<Vec<serper_client::SearchHit>, TrolleyError> {
        match self.session.search(query, SAMPLE_SEARCH_RESULTS).await {
            Err(TrolleyError::CreditsExhausted) if self.session.fail_over() => {
                self.session.search(query, SAMPLE_SEARCH_RESULTS).await
            }
            other => other,
        }
    }
}

fn compiling_patterns(domain: &str, kind: &str, raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .filter(|pattern| match Regex::new(pattern) {
            Ok(_) => true,
            Err(e) => {
                warn!(domain = %domain, kind, pattern = %pattern, error = %e, "Discarding pattern that does not compile");
                false
            }
        })
        .collect()
}

fn failed_record(domain: &str, vendor_name: &str, reason: &str) -> VendorPatterns {
    VendorPatterns {
        domain: domain.to_string(),
        vendor_name: vendor_name.to_string(),
        product_patterns: Vec::new(),
        category_patterns: Vec::new(),
        status: LearningStatus::Failed,
        confidence: 0.0,
        sample_size: 0,
        example_urls: Vec::new(),
        research_notes: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        hit, learned_patterns, mock_failover_session, mock_session, research, MockMatchModel,
        MockPatternStore, MockSearchApi,
    };

    fn sample_hits(n: usize) -> Vec<serper_client::SearchHit> {
        (0..n)
            .map(|i| {
                hit(
                    &format!("Thing {i}"),
                    &format!("https://newshop.co.uk/p/{i}"),
                    if i % 2 == 0 { Some(3.0 + i as f64) } else { None },
                )
            })
            .collect()
    }

    fn learner(
        search: Arc<MockSearchApi>,
        model: Arc<MockMatchModel>,
        store: Arc<MockPatternStore>,
    ) -> PatternLearner {
        PatternLearner::new(mock_session(search), model, store)
    }

    #[tokio::test]
    async fn learned_domains_are_terminal() {
        let search = Arc::new(MockSearchApi::new());
        let model = Arc::new(MockMatchModel::new());
        let store = Arc::new(MockPatternStore::with_learned(vec![learned_patterns(
            "newshop.co.uk",
            vec![r"/p/\d+"],
            vec![],
        )]));
        let record = learner(search.clone(), model.clone(), store)
            .learn("newshop.co.uk", "beans")
            .await
            .unwrap();
        assert_eq!(record.status, LearningStatus::Learned);
        assert!(search.calls().is_empty());
        assert!(model.research_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_domains_are_not_retried() {
        let search = Arc::new(MockSearchApi::new());
        let model = Arc::new(MockMatchModel::new());
        let store = Arc::new(MockPatternStore::new());
        store.record(failed_record("newshop.co.uk", "newshop", "no samples"));
        let record = learner(search.clone(), model, store)
            .learn("newshop.co.uk", "beans")
            .await
            .unwrap();
        assert_eq!(record.status, LearningStatus::Failed);
        assert!(search.calls().is_empty());
    }

    #[tokio::test]
    async fn relearn_reresearches_a_learned_domain() {
        let search =
            Arc::new(MockSearchApi::new().on_query("site:newshop.co.uk", sample_hits(10)));
        let model = Arc::new(MockMatchModel::new().on_domain(
            "newshop.co.uk",
            research(vec![r"^/products/"], vec![], 0.8),
        ));
        let store = Arc::new(MockPatternStore::with_learned(vec![learned_patterns(
            "newshop.co.uk",
            vec![r"/p/\d+"],
            vec![],
        )]));
        let record = learner(search, model.clone(), store)
            .relearn("newshop.co.uk", "beans")
            .await
            .unwrap();
        assert_eq!(record.product_patterns, vec![r"^/products/".to_string()]);
        assert_eq!(model.research_calls().len(), 1);
    }

    #[tokio::test]
    async fn research_learns_and_persists_patterns() {
        let search =
            Arc::new(MockSearchApi::new().on_query("site:newshop.co.uk", sample_hits(12)));
        let model = Arc::new(MockMatchModel::new().on_domain(
            "newshop.co.uk",
            research(vec![r"^/p/\d+$"], vec![r"^/range/"], 0.9),
        ));
        let store = Arc::new(MockPatternStore::new());
        let record = learner(search.clone(), model.clone(), store.clone())
            .learn("newshop.co.uk", "hp brown sauce 450g")
            .await
            .unwrap();

        assert_eq!(record.status, LearningStatus::Learned);
        assert_eq!(record.product_patterns, vec![r"^/p/\d+$".to_string()]);
        assert_eq!(record.vendor_name, "newshop");
        assert_eq!(record.sample_size, 12);
        assert_eq!(store.status_of("newshop.co.uk"), Some(LearningStatus::Learned));

        // One strategy produced enough URLs; no further searches ran.
        assert_eq!(search.calls().len(), 1);
        assert_eq!(search.calls()[0], "hp brown sauce 450g site:newshop.co.uk");

        // Priced samples lead the research prompt.
        let (_, samples) = model.research_calls().pop().unwrap();
        assert!(samples[..6].iter().all(|s| s.price.is_some()));
        assert!(samples[6..].iter().all(|s| s.price.is_none()));
    }

    #[tokio::test]
    async fn sampling_walks_every_strategy_when_short() {
        let search = Arc::new(
            MockSearchApi::new()
                .on_query("add to bag", vec![hit("B", "https://newshop.co.uk/p/b", None)])
                .on_query("buy price", vec![hit("C", "https://newshop.co.uk/p/c", Some(2.0))])
                .on_query("product site:", vec![hit("D", "https://newshop.co.uk/p/d", None)])
                .on_query(
                    "site:",
                    vec![
                        hit("A", "https://newshop.co.uk/p/a", Some(1.0)),
                        // off-domain and duplicate hits are dropped
                        hit("X", "https://elsewhere.com/p/x", Some(9.0)),
                        hit("A again", "https://newshop.co.uk/p/a", None),
                    ],
                ),
        );
        let model = Arc::new(
            MockMatchModel::new()
                .on_domain("newshop.co.uk", research(vec![r"^/p/[a-z]+$"], vec![], 0.7)),
        );
        let store = Arc::new(MockPatternStore::new());
        let record = learner(search.clone(), model.clone(), store)
            .learn("newshop.co.uk", "beans")
            .await
            .unwrap();

        assert_eq!(record.status, LearningStatus::Learned);
        assert_eq!(search.calls().len(), 4);
        assert!(search.calls()[1].contains(r#""add to bag" OR "add to cart""#));
        assert!(search.calls()[2].contains("-category -collections"));

        let (_, samples) = model.research_calls().pop().unwrap();
        let urls: Vec<_> = samples.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls.len(), 4);
        assert!(!urls.contains(&"https://elsewhere.com/p/x"));
    }

    #[tokio::test]
    async fn too_few_samples_mark_the_domain_failed() {
        let search = Arc::new(
            MockSearchApi::new().on_query("site:", sample_hits(2)),
        );
        let model = Arc::new(MockMatchModel::new());
        let store = Arc::new(MockPatternStore::new());
        let record = learner(search, model.clone(), store.clone())
            .learn("newshop.co.uk", "beans")
            .await
            .unwrap();

        assert_eq!(record.status, LearningStatus::Failed);
        assert!(record.research_notes.unwrap().contains("sample URLs"));
        assert_eq!(store.status_of("newshop.co.uk"), Some(LearningStatus::Failed));
        assert!(model.research_calls().is_empty());
    }

    #[tokio::test]
    async fn uncompilable_patterns_are_dropped() {
        let search =
            Arc::new(MockSearchApi::new().on_query("site:newshop.co.uk", sample_hits(10)));
        let model = Arc::new(MockMatchModel::new().on_domain(
            "newshop.co.uk",
            research(vec![r"^/p/\d+$", "(["], vec!["(also broken"], 0.8),
        ));
        let store = Arc::new(MockPatternStore::new());
        let record = learner(search, model, store)
            .learn("newshop.co.uk", "beans")
            .await
            .unwrap();

        assert_eq!(record.status, LearningStatus::Learned);
        assert_eq!(record.product_patterns, vec![r"^/p/\d+$".to_string()]);
        assert!(record.category_patterns.is_empty());
    }

    #[tokio::test]
    async fn no_usable_product_pattern_fails_the_domain() {
        let search =
            Arc::new(MockSearchApi::new().on_query("site:newshop.co.uk", sample_hits(10)));
        let model = Arc::new(
            MockMatchModel::new().on_domain("newshop.co.uk", research(vec!["(["], vec![], 0.8)),
        );
        let store = Arc::new(MockPatternStore::new());
        let record = learner(search, model, store.clone())
            .learn("newshop.co.uk", "beans")
            .await
            .unwrap();
        assert_eq!(record.status, LearningStatus::Failed);
        assert_eq!(store.status_of("newshop.co.uk"), Some(LearningStatus::Failed));
    }

    #[tokio::test]
    async fn sampling_fails_over_to_the_fallback_credential() {
        let primary = Arc::new(MockSearchApi::exhausted());
        let fallback =
            Arc::new(MockSearchApi::new().on_query("site:newshop.co.uk", sample_hits(10)));
        let session = mock_failover_session(primary, fallback);
        let model = Arc::new(MockMatchModel::new().on_domain(
            "newshop.co.uk",
            research(vec![r"^/p/\d+$"], vec![], 0.9),
        ));
        let store = Arc::new(MockPatternStore::new());
        let record = PatternLearner::new(session.clone(), model, store)
            .learn("newshop.co.uk", "beans")
            .await
            .unwrap();

        assert_eq!(record.status, LearningStatus::Learned);
        assert!(session.used_fallback());
    }

    #[tokio::test]
    async fn learn_all_skips_domains_when_credits_are_gone() {
        let search = Arc::new(MockSearchApi::exhausted());
        let model = Arc::new(MockMatchModel::new());
        let store = Arc::new(MockPatternStore::new());
        let settled = learner(search, model, store.clone())
            .learn_all(
                &["a.example".to_string(), "b.example".to_string()],
                "beans",
            )
            .await;
        assert!(settled.is_empty());
        // Claims stay pending rather than burning the domains as failed.
        assert_eq!(store.status_of("a.example"), Some(LearningStatus::Pending));
    }
}
