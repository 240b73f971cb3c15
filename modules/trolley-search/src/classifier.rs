//! URL page classification: single-product page, category/listing page, or
//! neither. Rules are regexes over the path-and-query of a URL; the static
//! table in vendors.rs covers the priority vendors and a learned overlay
//! covers everything the pattern learner has researched.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::Url;

use trolley_common::{host_matches_domain, registrable_host, LearningStatus, VendorPatterns};

use crate::vendors::STATIC_RULES;

/// Compiled patterns for one domain.
#[derive(Debug, Clone)]
struct DomainMatchers {
    product: Vec<Regex>,
    category: Vec<Regex>,
}

/// Static rules compiled once per process. A broken entry here is a
/// programming error, caught by the vendors.rs pattern test.
static STATIC_MATCHERS: LazyLock<HashMap<String, DomainMatchers>> = LazyLock::new(|| {
    STATIC_RULES
        .iter()
        .map(|rules| {
            let matchers = DomainMatchers {
                product: rules
                    .product
                    .iter()
                    .map(|p| Regex::new(p).expect("static product pattern must compile"))
                    .collect(),
                category: rules
                    .category
                    .iter()
                    .map(|p| Regex::new(p).expect("static category pattern must compile"))
                    .collect(),
            };
            (rules.domain.to_string(), matchers)
        })
        .collect()
});

/// The rules in force for one request: the static table plus a learned
/// overlay. Owned by the request; domains learned mid-request merge in with
/// [`RuleSet::absorb`]. No global mutable state.
pub struct RuleSet {
    learned: HashMap<String, DomainMatchers>,
}

impl RuleSet {
    /// Static rules only.
    pub fn static_only() -> Self {
        Self {
            learned: HashMap::new(),
        }
    }

    /// Static rules plus an overlay built from persisted pattern records.
    pub fn with_learned(patterns: &HashMap<String, VendorPatterns>) -> Self {
        let mut set = Self::static_only();
        for p in patterns.values() {
            set.absorb(p);
        }
        set
    }

    /// Merge one domain's patterns into the overlay. Anything that is not
    /// `learned` is ignored; a pattern that fails to compile is skipped with
    /// a warning rather than poisoning the domain.
    pub fn absorb(&mut self, patterns: &VendorPatterns) {
        if patterns.status != LearningStatus::Learned {
            return;
        }
        let matchers = DomainMatchers {
            product: compile_patterns(&patterns.domain, &patterns.product_patterns),
            category: compile_patterns(&patterns.domain, &patterns.category_patterns),
        };
        self.learned.insert(patterns.domain.clone(), matchers);
    }

    /// True when a static or learned rule exists for this host's domain.
    pub fn knows_host(&self, host: &str) -> bool {
        self.matchers_for(host).is_some()
    }

    /// Learned rules take precedence over static rules for the same domain.
    fn matchers_for(&self, host: &str) -> Option<(&String, &DomainMatchers)> {
        if let Some(hit) = self
            .learned
            .iter()
            .find(|(domain, _)| host_matches_domain(host, domain))
        {
            return Some(hit);
        }
        STATIC_MATCHERS
            .iter()
            .find(|(domain, _)| host_matches_domain(host, domain))
    }
}

fn compile_patterns(domain: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(domain, pattern = %p, error = %e, "Skipping invalid learned pattern");
                None
            }
        })
        .collect()
}

/// Outcome of classifying one URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_product: bool,
    pub is_category: bool,
    /// Domain whose rules decided the outcome, when one matched.
    pub matched_domain: Option<String>,
}

impl Classification {
    fn product(domain: Option<String>) -> Self {
        Self {
            is_product: true,
            is_category: false,
            matched_domain: domain,
        }
    }

    fn category(domain: Option<String>) -> Self {
        Self {
            is_product: false,
            is_category: true,
            matched_domain: domain,
        }
    }

    fn neither(domain: Option<String>) -> Self {
        Self {
            is_product: false,
            is_category: false,
            matched_domain: domain,
        }
    }
}

/// Classify one URL against a rule set. Category beats product when both
/// match: surfacing a listing page as a product is worse than missing one
/// real product page. A known domain where no rule fires is rejected the
/// same way everywhere.
pub fn classify(url: &str, rules: &RuleSet) -> Classification {
    let Some(host) = registrable_host(url) else {
        return Classification::neither(None);
    };
    let target = path_and_query(url);

    if let Some((domain, matchers)) = rules.matchers_for(&host) {
        let domain = Some(domain.clone());
        if matchers.category.iter().any(|re| re.is_match(&target)) {
            return Classification::category(domain);
        }
        if matchers.product.iter().any(|re| re.is_match(&target)) {
            return Classification::product(domain);
        }
        return Classification::neither(domain);
    }

    heuristic_classification(&target)
}

/// The portion of a URL that rules match against.
fn path_and_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

const CATEGORY_MARKERS: &[&str] = &[
    "/category/",
    "/categories/",
    "/browse/",
    "/search",
    "/collections/",
    "/shop/",
];

const PRODUCT_MARKERS: &[&str] = &["/product/", "/products/", "/item/", "/dp/"];

/// Best-effort classification for domains with no rules at all. Listing
/// signals are checked first so an ambiguous URL errs toward rejection.
fn heuristic_classification(target: &str) -> Classification {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    let path_lower = path.to_lowercase();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if CATEGORY_MARKERS.iter().any(|m| path_lower.contains(m)) {
        return Classification::category(None);
    }
    if segments.iter().any(|s| s.eq_ignore_ascii_case("c")) {
        return Classification::category(None);
    }
    if let Some(query) = query {
        let paginated_or_filtered = query.split('&').any(|pair| {
            let key = pair.split('=').next().unwrap_or("").to_lowercase();
            key == "page" || key.starts_with("filter") || key.starts_with("sort")
        });
        if paginated_or_filtered {
            return Classification::category(None);
        }
    }
    // A bare single word like "/toiletries" is a department page.
    if segments.len() == 1 && segments[0].chars().all(|c| c.is_ascii_lowercase()) {
        return Classification::category(None);
    }

    if PRODUCT_MARKERS.iter().any(|m| path_lower.contains(m)) {
        return Classification::product(None);
    }
    if segments.iter().any(|s| s.eq_ignore_ascii_case("p"))
        && path.chars().any(|c| c.is_ascii_digit())
    {
        return Classification::product(None);
    }
    if let Some(last) = segments.last() {
        if trailing_digit_run(last) >= 5 {
            return Classification::product(None);
        }
        let last_lower = last.to_lowercase();
        if last_lower.ends_with(".html") && last.chars().any(|c| c.is_ascii_digit()) {
            return Classification::product(None);
        }
        if last.len() >= 20 && last.contains('-') && last.chars().any(|c| c.is_ascii_digit()) {
            return Classification::product(None);
        }
    }

    Classification::neither(None)
}

/// Length of the digit run at the end of a path segment, ignoring a
/// trailing ".html".
fn trailing_digit_run(segment: &str) -> usize {
    segment
        .trim_end_matches(".html")
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trolley_common::LearningStatus;

    fn learned(domain: &str, product: &[&str], category: &[&str]) -> VendorPatterns {
        VendorPatterns {
            domain: domain.to_string(),
            vendor_name: domain.split('.').next().unwrap().to_string(),
            product_patterns: product.iter().map(|s| s.to_string()).collect(),
            category_patterns: category.iter().map(|s| s.to_string()).collect(),
            status: LearningStatus::Learned,
            confidence: 0.9,
            sample_size: 10,
            example_urls: Vec::new(),
            research_notes: None,
        }
    }

    // --- static rule tests ---

    #[test]
    fn tesco_product_url_is_product() {
        let rules = RuleSet::static_only();
        let c = classify("https://www.tesco.com/groceries/en-GB/products/254656543", &rules);
        assert!(c.is_product);
        assert_eq!(c.matched_domain.as_deref(), Some("tesco.com"));
    }

    #[test]
    fn tesco_shop_url_is_category() {
        let rules = RuleSet::static_only();
        let c = classify("https://www.tesco.com/groceries/en-GB/shop/food/sauces", &rules);
        assert!(c.is_category);
        assert!(!c.is_product);
    }

    #[test]
    fn known_domain_with_no_rule_fired_is_rejected() {
        let rules = RuleSet::static_only();
        let c = classify("https://www.tesco.com/help/delivery", &rules);
        assert!(!c.is_product);
        assert!(!c.is_category);
        assert_eq!(c.matched_domain.as_deref(), Some("tesco.com"));
    }

    #[test]
    fn boots_numeric_suffix_is_product() {
        let rules = RuleSet::static_only();
        let c = classify(
            "https://www.boots.com/marmite-yeast-extract-250g-10084967",
            &rules,
        );
        assert!(c.is_product);
    }

    // --- category-wins tests ---

    #[test]
    fn category_wins_over_simultaneous_product_match() {
        let mut rules = RuleSet::static_only();
        rules.absorb(&learned("overlap.example", &["/p/"], &["/p/clearance/"]));
        let c = classify("https://overlap.example/p/clearance/widget-1", &rules);
        assert!(c.is_category);
        assert!(!c.is_product);
    }

    // --- learned overlay tests ---

    #[test]
    fn learned_rules_classify_new_domains() {
        let mut rules = RuleSet::static_only();
        rules.absorb(&learned("hollandandbarrett.com", &[r"/p/\d+"], &[r"/shop/"]));
        let c = classify("https://www.hollandandbarrett.com/p/12345", &rules);
        assert!(c.is_product);
        assert_eq!(c.matched_domain.as_deref(), Some("hollandandbarrett.com"));
    }

    #[test]
    fn learned_rules_override_static_for_same_domain() {
        let mut rules = RuleSet::static_only();
        rules.absorb(&learned("tesco.com", &[r"/newshape/\d+"], &[]));
        // The old static product shape no longer matches once overridden.
        let c = classify("https://www.tesco.com/groceries/en-GB/products/254656543", &rules);
        assert!(!c.is_product);
        let c = classify("https://www.tesco.com/newshape/99", &rules);
        assert!(c.is_product);
    }

    #[test]
    fn non_learned_records_are_not_trusted() {
        let mut rules = RuleSet::static_only();
        let mut p = learned("pending.example", &["/p/"], &[]);
        p.status = LearningStatus::Pending;
        rules.absorb(&p);
        assert!(!rules.knows_host("pending.example"));
    }

    #[test]
    fn invalid_learned_pattern_is_skipped_not_fatal() {
        let mut rules = RuleSet::static_only();
        rules.absorb(&learned("broken.example", &["([unclosed", r"/item/\d+"], &[]));
        let c = classify("https://broken.example/item/42", &rules);
        assert!(c.is_product);
    }

    // --- heuristic tests ---

    #[test]
    fn heuristics_accept_product_shaped_urls() {
        let rules = RuleSet::static_only();
        assert!(classify("https://shop.example.io/products/widget-2000", &rules).is_product);
        assert!(classify("https://shop.example.io/x/thing-9/p/483920", &rules).is_product);
        assert!(classify("https://shop.example.io/widget/10293847", &rules).is_product);
        assert!(
            classify("https://shop.example.io/hp-brown-sauce-450g-classic-squeezy", &rules)
                .is_product
        );
    }

    #[test]
    fn heuristics_reject_listing_shaped_urls() {
        let rules = RuleSet::static_only();
        assert!(classify("https://shop.example.io/search?q=sauce", &rules).is_category);
        assert!(classify("https://shop.example.io/collections/sauces", &rules).is_category);
        assert!(classify("https://shop.example.io/sauces", &rules).is_category);
        assert!(classify("https://shop.example.io/products/all?page=2", &rules).is_category);
        assert!(classify("https://shop.example.io/c/food", &rules).is_category);
    }

    #[test]
    fn heuristics_pass_on_unclassifiable_urls() {
        let rules = RuleSet::static_only();
        let c = classify("https://shop.example.io/About-Us", &rules);
        assert!(!c.is_product);
        assert!(!c.is_category);
        assert!(c.matched_domain.is_none());
    }

    #[test]
    fn garbage_urls_are_rejected() {
        let rules = RuleSet::static_only();
        let c = classify("not a url at all", &rules);
        assert!(!c.is_product);
        assert!(!c.is_category);
    }
}
