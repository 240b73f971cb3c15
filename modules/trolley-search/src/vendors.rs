//! Curated retailer data: the priority vendor list, domains we never return
//! results from, and hand-written URL rules for every priority vendor.

use trolley_common::{host_matches_domain, Vendor};

/// Google `gl` country code for every search. The catalogue is UK retail.
pub const REGION: &str = "gb";

/// Retailers searched directly on every request, in rank order. The order is
/// also the tiebreak for final ranking, ahead of any vendor discovered through
/// the broader fallback search.
pub const PRIORITY_VENDORS: &[Vendor] = &[
    Vendor { name: "Tesco", domain: "tesco.com" },
    Vendor { name: "Sainsbury's", domain: "sainsburys.co.uk" },
    Vendor { name: "ASDA", domain: "asda.com" },
    Vendor { name: "Morrisons", domain: "morrisons.com" },
    Vendor { name: "Waitrose", domain: "waitrose.com" },
    Vendor { name: "Ocado", domain: "ocado.com" },
    Vendor { name: "Iceland", domain: "iceland.co.uk" },
    Vendor { name: "Boots", domain: "boots.com" },
    Vendor { name: "Superdrug", domain: "superdrug.com" },
    Vendor { name: "Savers", domain: "savers.co.uk" },
    Vendor { name: "Wilko", domain: "wilko.com" },
    Vendor { name: "LookFantastic", domain: "lookfantastic.com" },
];

/// Domains the broader fallback search must never return results from.
/// Marketplaces resell under third-party sellers with unstable pricing;
/// the rest are not shops at all.
pub const BLOCKED_DOMAINS: &[&str] = &[
    // marketplaces
    "ebay.co.uk",
    "ebay.com",
    "amazon.co.uk",
    "amazon.com",
    "etsy.com",
    "onbuy.com",
    "vinted.co.uk",
    // social
    "facebook.com",
    "instagram.com",
    "pinterest.com",
    "pinterest.co.uk",
    "tiktok.com",
    "x.com",
    "twitter.com",
    "reddit.com",
    "youtube.com",
    // news
    "dailymail.co.uk",
    "thesun.co.uk",
    "mirror.co.uk",
    "theguardian.com",
    "bbc.co.uk",
    // reviews and forums
    "trustpilot.com",
    "reviews.io",
    "mumsnet.com",
    // price comparison
    "pricerunner.com",
    "idealo.co.uk",
    "kelkoo.co.uk",
    "pricespy.co.uk",
    // reference
    "wikipedia.org",
];

/// Static URL rules for one domain. Patterns are regexes matched against the
/// path-and-query portion of a candidate URL.
#[derive(Debug, Clone, Copy)]
pub struct DomainRules {
    pub domain: &'static str,
    pub product: &'static [&'static str],
    pub category: &'static [&'static str],
}

/// Hand-written rules for the priority vendors. Learned rules for other
/// domains live in the vendor_url_patterns table and overlay these at
/// request time.
pub const STATIC_RULES: &[DomainRules] = &[
    DomainRules {
        domain: "tesco.com",
        product: &[r"/groceries/en-GB/products/\d+"],
        category: &[r"/groceries/en-GB/shop/", r"/groceries/en-GB/search"],
    },
    DomainRules {
        domain: "sainsburys.co.uk",
        product: &[r"/gol-ui/product/"],
        category: &[r"/gol-ui/groceries/", r"/gol-ui/SearchResults", r"/shop/gb/groceries$"],
    },
    DomainRules {
        domain: "asda.com",
        product: &[r"/product/"],
        category: &[r"/aisle/", r"/dept/", r"/shelf/", r"/cat/", r"/search/"],
    },
    DomainRules {
        domain: "morrisons.com",
        product: &[r"/products/[a-z0-9-]+-\d+"],
        category: &[r"/categories/", r"/browse/", r"/search\?"],
    },
    DomainRules {
        domain: "waitrose.com",
        product: &[r"/ecom/products/"],
        category: &[r"/ecom/shop/browse/", r"/ecom/shop/search"],
    },
    DomainRules {
        domain: "ocado.com",
        product: &[r"/products/[a-z0-9-]+-\d+"],
        category: &[r"/browse/", r"/search\?"],
    },
    DomainRules {
        domain: "iceland.co.uk",
        product: &[r"/p/"],
        category: &[r"/c/", r"/search\?"],
    },
    DomainRules {
        domain: "boots.com",
        product: &[r"-\d{6,}$", r"-\d{6,}\?"],
        category: &[r"/sitesearch", r"\?criteria="],
    },
    DomainRules {
        domain: "superdrug.com",
        product: &[r"/p/"],
        category: &[r"/c/", r"/search\?"],
    },
    DomainRules {
        domain: "savers.co.uk",
        product: &[r"/p/"],
        category: &[r"/c/", r"/search\?"],
    },
    DomainRules {
        domain: "wilko.com",
        product: &[r"/p/"],
        category: &[r"/c/", r"/search\?"],
    },
    DomainRules {
        domain: "lookfantastic.com",
        product: &[r"/\d{8}\.html", r"/p/"],
        category: &[r"\.list$", r"\.list\?", r"/c/"],
    },
];

/// True when the host belongs to a domain we refuse to surface results from.
pub fn is_blocked(host: &str) -> bool {
    BLOCKED_DOMAINS.iter().any(|d| host_matches_domain(host, d))
}

/// The priority vendor owning this host, if any.
pub fn priority_vendor_for_host(host: &str) -> Option<&'static Vendor> {
    PRIORITY_VENDORS
        .iter()
        .find(|v| host_matches_domain(host, v.domain))
}

/// Position of a vendor name in the priority list, used as a ranking
/// tiebreak. Case-insensitive so it works on names that round-tripped
/// through the cache. None for fallback shops.
pub fn priority_rank(name: &str) -> Option<usize> {
    let name = name.trim().to_lowercase();
    PRIORITY_VENDORS
        .iter()
        .position(|v| v.name.to_lowercase() == name)
}

/// True when the (display) vendor name belongs to a priority vendor.
pub fn is_priority_vendor_name(name: &str) -> bool {
    priority_rank(name).is_some()
}

/// Display name for a vendor discovered via fallback search: the first label
/// of the registrable host ("hollandandbarrett.com" -> "hollandandbarrett").
pub fn fallback_vendor_name(host: &str) -> String {
    host.split('.').next().unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_priority_vendor_has_static_rules() {
        for vendor in PRIORITY_VENDORS {
            assert!(
                STATIC_RULES.iter().any(|r| r.domain == vendor.domain),
                "missing static rules for {}",
                vendor.domain
            );
        }
    }

    #[test]
    fn static_rules_compile() {
        for rules in STATIC_RULES {
            for pattern in rules.product.iter().chain(rules.category.iter()) {
                assert!(
                    regex::Regex::new(pattern).is_ok(),
                    "invalid pattern {pattern} for {}",
                    rules.domain
                );
            }
        }
    }

    #[test]
    fn blocked_matches_subdomains() {
        assert!(is_blocked("www.ebay.co.uk"));
        assert!(is_blocked("amazon.co.uk"));
        assert!(!is_blocked("tesco.com"));
    }

    #[test]
    fn priority_lookup_by_host() {
        assert_eq!(
            priority_vendor_for_host("groceries.asda.com").map(|v| v.name),
            Some("ASDA")
        );
        assert_eq!(priority_vendor_for_host("hollandandbarrett.com"), None);
    }

    #[test]
    fn priority_name_check_is_case_insensitive() {
        assert!(is_priority_vendor_name("tesco"));
        assert!(is_priority_vendor_name("Sainsbury's"));
        assert!(!is_priority_vendor_name("hollandandbarrett"));
    }

    #[test]
    fn priority_rank_follows_list_order() {
        assert_eq!(priority_rank("Tesco"), Some(0));
        assert_eq!(priority_rank("sainsbury's"), Some(1));
        assert!(priority_rank("ASDA") < priority_rank("Wilko"));
        assert_eq!(priority_rank("newshop"), None);
    }

    #[test]
    fn fallback_name_strips_tld() {
        assert_eq!(fallback_vendor_name("hollandandbarrett.com"), "hollandandbarrett");
        assert_eq!(fallback_vendor_name("savers.co.uk"), "savers");
    }
}
