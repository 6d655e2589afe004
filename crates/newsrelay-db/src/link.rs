/// Query parameters that only carry referral/analytics data.
const TRACKING_PARAMS: &[&str] = &["ref", "fbclid", "gclid", "yclid", "mc_cid", "mc_eid"];

/// Canonical form of an article link, used as the unique key of the store.
///
/// Two links that differ only in scheme, a `www.` host prefix, a trailing
/// `/`, the fragment, tracking parameters or the order of the remaining query
/// parameters map to the same key: `host/path[?sorted_params]`.
///
/// Links that do not parse as absolute URLs are used verbatim (trimmed).
pub fn canonical_link(raw: &str) -> String {
    let raw = raw.trim();
    canonicalize_url(raw).unwrap_or_else(|| raw.to_owned())
}

fn canonicalize_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;

    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    let path = parsed.path().trim_end_matches('/');

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let mut canonical = String::with_capacity(raw.len());
    canonical.push_str(host);
    if let Some(port) = parsed.port() {
        canonical.push_str(&format!(":{port}"));
    }
    canonical.push_str(path);

    for (i, (key, value)) in params.iter().enumerate() {
        canonical.push(if i == 0 { '?' } else { '&' });
        canonical.push_str(key);
        if !value.is_empty() {
            canonical.push('=');
            canonical.push_str(value);
        }
    }

    Some(canonical)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_scheme_www_and_trailing_slash() {
        assert_eq!(canonical_link("https://www.example.com/post/"), "example.com/post");
        assert_eq!(canonical_link("http://example.com/post"), "example.com/post");
        assert_eq!(canonical_link("https://example.com/"), "example.com");
    }

    #[test]
    fn drops_fragment_and_tracking_params() {
        assert_eq!(
            canonical_link("https://example.com/a?utm_source=rss&id=7#comments"),
            "example.com/a?id=7"
        );
        assert_eq!(
            canonical_link("https://example.com/a?fbclid=x&ref=feed"),
            "example.com/a"
        );
    }

    #[test]
    fn sorts_remaining_params() {
        assert_eq!(
            canonical_link("https://example.com/a?z=1&a=2&flag"),
            "example.com/a?a=2&flag&z=1"
        );
    }

    #[test]
    fn keeps_path_case_and_port() {
        assert_eq!(
            canonical_link("https://example.com:8443/News/Item"),
            "example.com:8443/News/Item"
        );
    }

    #[test]
    fn unparseable_links_are_kept_verbatim() {
        assert_eq!(canonical_link("  not a url "), "not a url");
        assert_eq!(canonical_link(""), "");
    }

    #[test]
    fn feed_variants_collapse_to_one_key() {
        let a = canonical_link("https://x/1");
        let b = canonical_link("http://www.x/1/?utm_medium=telegram");
        assert_eq!(a, b);
    }
}
