//! Search execution: the credential session with failover, per-vendor
//! priority searches, and the broader fallback search that discovers and
//! learns new shops.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use serper_client::{SearchHit, SerperError};
use trolley_common::{
    host_matches_domain, registrable_host, sanitize_url, LearningStatus, ProductQuery,
    SearchCandidate, TrolleyError, Vendor,
};

use crate::classifier::{classify, RuleSet};
use crate::enrichment::{parse_structured_product, SCRAPE_CONCURRENCY};
use crate::learner::PatternLearner;
use crate::traits::{PageFetcher, SearchApi};
use crate::vendors::{fallback_vendor_name, is_blocked, priority_vendor_for_host};

/// Results requested per priority-vendor search.
const VENDOR_SEARCH_RESULTS: usize = 10;
/// Results requested by the broader fallback search.
const BROADER_SEARCH_RESULTS: usize = 20;

// ---------------------------------------------------------------------------
// SearchSession — one request's view of the search credentials
// ---------------------------------------------------------------------------

/// Routes searches to the primary credential until someone observes credit
/// exhaustion and fails over. The switch is request-scoped and one-way;
/// exhaustion on the fallback is terminal.
pub struct SearchSession {
    primary: Arc<dyn SearchApi>,
    fallback: Option<Arc<dyn SearchApi>>,
    on_fallback: AtomicBool,
}

impl SearchSession {
    pub fn new(primary: Arc<dyn SearchApi>, fallback: Option<Arc<dyn SearchApi>>) -> Self {
        Self {
            primary,
            fallback,
            on_fallback: AtomicBool::new(false),
        }
    }

    /// Run one search on whichever credential is active.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, TrolleyError> {
        let api = match (&self.fallback, self.on_fallback.load(Ordering::Acquire)) {
            (Some(fallback), true) => fallback,
            _ => &self.primary,
        };
        api.search(query, max_results).await.map_err(|e| match e {
            SerperError::CreditsExhausted => TrolleyError::CreditsExhausted,
            other => TrolleyError::Search(other.to_string()),
        })
    }

    /// Switch to the fallback credential. Returns true only for the caller
    /// that performed the switch; callers seeing false must treat the
    /// exhaustion as final.
    pub fn fail_over(&self) -> bool {
        if self.fallback.is_none() {
            return false;
        }
        let switched = !self.on_fallback.swap(true, Ordering::AcqRel);
        if switched {
            warn!("Search credits exhausted, switching to fallback credential");
        }
        switched
    }

    pub fn used_fallback(&self) -> bool {
        self.on_fallback.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Priority vendor search
// ---------------------------------------------------------------------------

/// Search one priority vendor's site for the product. Hits off the vendor's
/// domain, in a foreign currency, or on pages the classifier does not accept
/// as product pages are dropped. Failures other than credit exhaustion cost
/// this vendor its candidates, never the request.
pub(crate) async fn search_vendor(
    session: &SearchSession,
    query: &ProductQuery,
    vendor: &Vendor,
    rules: &RuleSet,
) -> Result<Vec<SearchCandidate>, TrolleyError> {
    let q = format!("{} {} product page", query.text, vendor.name);
    let hits = match session.search(&q, VENDOR_SEARCH_RESULTS).await {
        Ok(hits) => hits,
        Err(TrolleyError::CreditsExhausted) => return Err(TrolleyError::CreditsExhausted),
        Err(e) => {
            warn!(vendor = vendor.name, error = %e, "Vendor search failed");
            return Ok(Vec::new());
        }
    };

    let mut candidates = Vec::new();
    for hit in hits {
        let Some(host) = registrable_host(&hit.link) else {
            continue;
        };
        if !host_matches_domain(&host, vendor.domain) {
            continue;
        }
        match hit.currency.as_deref() {
            Some("GBP") | None => {}
            Some(_) => continue,
        }
        if !classify(&hit.link, rules).is_product {
            continue;
        }
        candidates.push(SearchCandidate {
            title: hit.title,
            url: hit.link,
            price: hit.price.filter(|p| *p > 0.0),
            currency: Some(hit.currency.unwrap_or_else(|| "GBP".to_string())),
            vendor: vendor.name.to_string(),
            snippet: hit.snippet,
            raw_structured_data: None,
            scraped_price: None,
        });
    }
    debug!(vendor = vendor.name, count = candidates.len(), "Vendor search candidates");
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Broader fallback search
// ---------------------------------------------------------------------------

pub(crate) struct BroaderSearch {
    pub candidates: Vec<SearchCandidate>,
    /// Domains whose URL patterns were learned during this search.
    pub domains_learned: u32,
}

/// One open web search beyond the priority vendors. Unknown domains get
/// their URL patterns learned before classification, and priceless
/// candidates from non-priority shops get a structured-data scrape, since
/// enrichment will not price them later.
pub(crate) async fn search_broader(
    session: &SearchSession,
    learner: &PatternLearner,
    fetcher: &Arc<dyn PageFetcher>,
    query: &ProductQuery,
    rules: &mut RuleSet,
) -> Result<BroaderSearch, TrolleyError> {
    let q = format!("{} product page", query.text);
    let hits = match session.search(&q, BROADER_SEARCH_RESULTS).await {
        Ok(hits) => hits,
        Err(TrolleyError::CreditsExhausted) => return Err(TrolleyError::CreditsExhausted),
        Err(e) => {
            warn!(error = %e, "Broader search failed");
            return Ok(BroaderSearch {
                candidates: Vec::new(),
                domains_learned: 0,
            });
        }
    };

    let mut keep: Vec<(SearchHit, String)> = Vec::new();
    for hit in hits {
        let Some(host) = registrable_host(&hit.link) else {
            continue;
        };
        if is_blocked(&host) {
            continue;
        }
        match hit.currency.as_deref() {
            Some("GBP") | None => {}
            Some(_) => continue,
        }
        keep.push((hit, host));
    }

    let unknown: Vec<String> = {
        let mut seen = HashSet::new();
        keep.iter()
            .filter(|(_, host)| !rules.knows_host(host) && seen.insert(host.clone()))
            .map(|(_, host)| host.clone())
            .collect()
    };

    let mut domains_learned = 0u32;
    if !unknown.is_empty() {
        debug!(domains = ?unknown, "Learning unknown domains");
        for record in learner.learn_all(&unknown, &query.text).await {
            if record.status == LearningStatus::Learned {
                domains_learned += 1;
            }
            rules.absorb(&record);
        }
    }

    let mut candidates = Vec::new();
    for (hit, host) in keep {
        if !classify(&hit.link, rules).is_product {
            continue;
        }
        let vendor = priority_vendor_for_host(&host)
            .map(|v| v.name.to_string())
            .unwrap_or_else(|| fallback_vendor_name(&host));
        candidates.push(SearchCandidate {
            title: hit.title,
            url: hit.link,
            price: hit.price.filter(|p| *p > 0.0),
            currency: Some(hit.currency.unwrap_or_else(|| "GBP".to_string())),
            vendor,
            snippet: hit.snippet,
            raw_structured_data: None,
            scraped_price: None,
        });
    }

    recover_prices(fetcher, &mut candidates).await;
    debug!(
        count = candidates.len(),
        domains_learned, "Broader search candidates"
    );
    Ok(BroaderSearch {
        candidates,
        domains_learned,
    })
}

/// Non-priority shops rarely surface prices through search, and enrichment
/// only rewrites priority vendors' prices. Pull each priceless fallback
/// candidate's page and read its schema.org offer instead.
async fn recover_prices(fetcher: &Arc<dyn PageFetcher>, candidates: &mut [SearchCandidate]) {
    let targets: Vec<(usize, String)> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            c.price.is_none() && !crate::vendors::is_priority_vendor_name(&c.vendor)
        })
        .map(|(i, c)| (i, sanitize_url(&c.url)))
        .collect();
    if targets.is_empty() {
        return;
    }

    let scraped: Vec<_> = stream::iter(targets)
        .map(|(i, url)| async move {
            match fetcher.content(&url).await {
                Ok(html) => (i, parse_structured_product(&html)),
                Err(e) => {
                    debug!(url = %url, error = %e, "Price recovery fetch failed");
                    (i, None)
                }
            }
        })
        .buffer_unordered(SCRAPE_CONCURRENCY)
        .collect()
        .await;

    for (i, product) in scraped {
        let Some(product) = product else { continue };
        if let Some(price) = product.price.filter(|p| *p > 0.0) {
            candidates[i].scraped_price = Some(price);
        }
        candidates[i].raw_structured_data = Some(product.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        hit, mock_failover_session, mock_session, research, MockMatchModel, MockPageFetcher,
        MockPatternStore, MockSearchApi,
    };
    use crate::vendors::PRIORITY_VENDORS;

    fn tesco() -> &'static Vendor {
        PRIORITY_VENDORS
            .iter()
            .find(|v| v.domain == "tesco.com")
            .unwrap()
    }

    // --- session tests ---

    #[tokio::test]
    async fn session_fails_over_exactly_once() {
        let session = mock_failover_session(
            Arc::new(MockSearchApi::exhausted()),
            Arc::new(MockSearchApi::new()),
        );
        assert!(!session.used_fallback());
        assert!(session.fail_over());
        assert!(session.used_fallback());
        assert!(!session.fail_over());
    }

    #[tokio::test]
    async fn session_without_fallback_cannot_fail_over() {
        let session = mock_session(Arc::new(MockSearchApi::exhausted()));
        assert!(!session.fail_over());
        assert!(!session.used_fallback());
    }

    #[tokio::test]
    async fn session_routes_to_fallback_after_switch() {
        let primary = Arc::new(MockSearchApi::exhausted());
        let fallback = Arc::new(
            MockSearchApi::new().on_query("beans", vec![hit("Beans", "https://x.example/p/1", None)]),
        );
        let session = mock_failover_session(primary, fallback.clone());

        assert!(matches!(
            session.search("beans", 10).await,
            Err(TrolleyError::CreditsExhausted)
        ));
        session.fail_over();
        assert_eq!(session.search("beans", 10).await.unwrap().len(), 1);
        assert_eq!(fallback.calls().len(), 1);
    }

    // --- vendor search tests ---

    #[tokio::test]
    async fn vendor_search_keeps_only_on_domain_product_pages() {
        let search = Arc::new(MockSearchApi::new().on_query(
            "Tesco product page",
            vec![
                hit(
                    "HP Brown Sauce 450g",
                    "https://www.tesco.com/groceries/en-GB/products/254881357",
                    Some(1.8),
                ),
                // category page
                hit(
                    "Table Sauces",
                    "https://www.tesco.com/groceries/en-GB/shop/food/table-sauces",
                    None,
                ),
                // wrong domain
                hit("HP Sauce", "https://www.asda.com/product/9912", Some(1.75)),
                // foreign currency
                SearchHit {
                    title: "HP Sauce".to_string(),
                    link: "https://www.tesco.com/groceries/en-GB/products/254881999".to_string(),
                    snippet: None,
                    price: Some(2.1),
                    currency: Some("EUR".to_string()),
                },
                // no price, still a candidate
                hit(
                    "HP Brown Sauce 450g Squeezy",
                    "https://www.tesco.com/groceries/en-GB/products/254882000",
                    None,
                ),
            ],
        ));
        let session = mock_session(search);
        let query = ProductQuery::new("hp brown sauce 450g");
        let rules = RuleSet::static_only();

        let candidates = search_vendor(&session, &query, tesco(), &rules)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].price, Some(1.8));
        assert_eq!(candidates[0].vendor, "Tesco");
        assert_eq!(candidates[1].price, None);
        assert_eq!(candidates[1].currency.as_deref(), Some("GBP"));
    }

    #[tokio::test]
    async fn vendor_search_failure_is_empty_not_fatal() {
        let session = mock_session(Arc::new(MockSearchApi::failing()));
        let query = ProductQuery::new("beans");
        let candidates = search_vendor(&session, &query, tesco(), &RuleSet::static_only())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn vendor_search_propagates_exhaustion() {
        let session = mock_session(Arc::new(MockSearchApi::exhausted()));
        let query = ProductQuery::new("beans");
        let result = search_vendor(&session, &query, tesco(), &RuleSet::static_only()).await;
        assert!(matches!(result, Err(TrolleyError::CreditsExhausted)));
    }

    // --- broader search tests ---

    const NEWSHOP_PAGE: &str = r#"<html><head>
        <script type="application/ld+json">
        {"@type":"Product","name":"HP Brown Sauce 450g",
         "offers":{"price":"1.65","priceCurrency":"GBP","availability":"https://schema.org/InStock"}}
        </script></head><body></body></html>"#;

    fn broader_mocks() -> (Arc<MockSearchApi>, Arc<MockMatchModel>, Arc<MockPatternStore>) {
        let search = Arc::new(
            MockSearchApi::new()
                .on_query(
                    "product page",
                    vec![
                        hit(
                            "HP Brown Sauce 450g",
                            "https://www.tesco.com/groceries/en-GB/products/254881357",
                            Some(1.8),
                        ),
                        hit(
                            "HP Sauce | Amazon",
                            "https://www.amazon.co.uk/HP-Sauce/dp/B0001",
                            Some(1.5),
                        ),
                        hit("HP Sauce 450g", "https://newshop.co.uk/p/991", None),
                        hit("About us", "https://newshop.co.uk/about", None),
                        hit("HP Sauce", "https://dodgy.example/item/5", Some(2.5)),
                    ],
                )
                .on_query(
                    "site:newshop.co.uk",
                    vec![
                        hit("A", "https://newshop.co.uk/p/1", Some(1.0)),
                        hit("B", "https://newshop.co.uk/p/2", Some(2.0)),
                        hit("C", "https://newshop.co.uk/p/3", None),
                    ],
                ),
        );
        let model = Arc::new(MockMatchModel::new().on_domain(
            "newshop.co.uk",
            research(vec![r"^/p/\d+$"], vec![], 0.9),
        ));
        let store = Arc::new(MockPatternStore::new());
        (search, model, store)
    }

    #[tokio::test]
    async fn broader_search_learns_blocks_and_names() {
        let (search, model, store) = broader_mocks();
        let session = mock_session(search);
        let learner = PatternLearner::new(session.clone(), model, store.clone());
        let fetcher: Arc<dyn PageFetcher> = Arc::new(
            MockPageFetcher::new().on_page("https://newshop.co.uk/p/991", NEWSHOP_PAGE),
        );
        let query = ProductQuery::new("hp brown sauce 450g");
        let mut rules = RuleSet::static_only();

        let outcome = search_broader(&session, &learner, &fetcher, &query, &mut rules)
            .await
            .unwrap();

        let vendors: Vec<_> = outcome.candidates.iter().map(|c| c.vendor.as_str()).collect();
        // Amazon is blocked; /about fails the learned pattern.
        assert_eq!(vendors, vec!["Tesco", "newshop", "dodgy"]);
        assert_eq!(outcome.domains_learned, 1);

        // Learned rules landed in the request's rule set and in storage.
        assert!(rules.knows_host("newshop.co.uk"));
        assert_eq!(
            store.status_of("newshop.co.uk"),
            Some(LearningStatus::Learned)
        );
        // dodgy.example found no sample URLs; heuristics still accepted /item/5.
        assert_eq!(store.status_of("dodgy.example"), Some(LearningStatus::Failed));

        // Blocked domains are never researched.
        assert_eq!(store.status_of("amazon.co.uk"), None);
    }

    #[tokio::test]
    async fn broader_search_scrapes_prices_for_priceless_fallback_shops() {
        let (search, model, store) = broader_mocks();
        let session = mock_session(search);
        let learner = PatternLearner::new(session.clone(), model, store);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(
            MockPageFetcher::new().on_page("https://newshop.co.uk/p/991", NEWSHOP_PAGE),
        );
        let query = ProductQuery::new("hp brown sauce 450g");
        let mut rules = RuleSet::static_only();

        let outcome = search_broader(&session, &learner, &fetcher, &query, &mut rules)
            .await
            .unwrap();

        let newshop = outcome
            .candidates
            .iter()
            .find(|c| c.vendor == "newshop")
            .unwrap();
        assert_eq!(newshop.scraped_price, Some(1.65));
        assert!(newshop.raw_structured_data.is_some());
        assert_eq!(newshop.price, None);

        // Priced candidates are not scraped.
        let dodgy = outcome
            .candidates
            .iter()
            .find(|c| c.vendor == "dodgy")
            .unwrap();
        assert_eq!(dodgy.scraped_price, None);
    }

    #[tokio::test]
    async fn broader_search_propagates_exhaustion() {
        let session = mock_session(Arc::new(MockSearchApi::exhausted()));
        let model = Arc::new(MockMatchModel::new());
        let store = Arc::new(MockPatternStore::new());
        let learner = PatternLearner::new(session.clone(), model, store);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(MockPageFetcher::new());
        let query = ProductQuery::new("beans");
        let mut rules = RuleSet::static_only();

        let result = search_broader(&session, &learner, &fetcher, &query, &mut rules).await;
        assert!(matches!(result, Err(TrolleyError::CreditsExhausted)));
    }
}
