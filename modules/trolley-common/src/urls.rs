use url::Url;

/// Subdomain labels that never distinguish one retailer from another.
const GENERIC_SUBDOMAINS: &[&str] = &["www", "m", "mobile", "shop", "store", "groceries", "en"];

/// Hostname of `url`, lowercased, with generic subdomain labels stripped from
/// the front. Returns `None` for unparseable or hostless URLs.
pub fn registrable_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let mut labels: Vec<&str> = host.split('.').collect();
    while labels.len() > 2 && GENERIC_SUBDOMAINS.contains(&labels[0]) {
        labels.remove(0);
    }
    Some(labels.join("."))
}

/// True when `host` is `domain` itself or a subdomain of it.
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Strip tracking query parameters from a URL. They can break the checker
/// service's navigation and leak campaign noise into logs.
pub fn sanitize_url(url: &str) -> String {
    const TRACKING_PARAMS: &[&str] = &[
        "_dt", "fbclid", "gclid", "utm_source", "utm_medium", "utm_campaign",
        "utm_term", "utm_content", "ref", "mc_cid", "mc_eid", "awc", "tduid",
        "cmpid",
    ];

    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let had_query = parsed.query().is_some();
    if !had_query {
        return url.to_string();
    }

    let clean_pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if clean_pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(clean_pairs);
    }

    parsed.to_string()
}
