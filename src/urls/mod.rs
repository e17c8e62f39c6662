//! URL normalization, redirect unwrapping, and hostname utilities.

use std::path::Path;
use std::sync::OnceLock;

use url::Url;

/// Query keys dropped before deduplication. Covers the usual UTM family plus
/// the share/tracking params common on Chinese platforms.
const TRACKING_QUERY_KEYS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "gclid",
    "fbclid",
    "igshid",
    "spm",
    "spm_id_from",
    "from",
    "from_source",
    "source",
    "sourcefrom",
    "share_source",
    "share_medium",
    "share_platform",
    "share_id",
    "share_from",
    "shareuid",
    "scene",
    "platform",
    "ref",
    "refer",
    "ref_source",
    "referrer",
    "vd_source",
    "_t",
    "_r",
    "mpshare",
];

const REDIRECT_PARAM_CANDIDATES: &[&str] = &[
    "uddg", "target", "url", "q", "u", "to", "dest", "destination", "redir", "redirect",
];

fn site_query_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)(^|\s)site\s*:\s*\S+").unwrap())
}

fn zhihu_answer_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)zhihu\.com/(?:question/\d+/)?answer/(\d+)").unwrap())
}

/// Upgrade protocol-relative (`//…`) and bare `www.` inputs to https.
fn upgrade_scheme(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{}", rest)
    } else if raw.starts_with("www.") {
        format!("https://{}", raw)
    } else {
        raw.to_string()
    }
}

/// Canonical form of a URL used for equality during deduplication.
///
/// Lowercases scheme and host, drops default ports, strips tracking query
/// keys, sorts the surviving pairs, collapses the trailing slash, and drops
/// the fragment. Unparseable input comes back as-is.
pub fn normalize_for_dedup(url: &str) -> String {
    if url.trim().is_empty() {
        return String::new();
    }
    let raw = upgrade_scheme(url);
    let Ok(parsed) = Url::parse(&raw) else {
        return raw;
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let port = match (parsed.port(), scheme.as_str()) {
        (Some(80), "http") | (Some(443), "https") | (None, _) => None,
        (Some(p), _) => Some(p),
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, v)| {
            !v.is_empty() && !TRACKING_QUERY_KEYS.contains(&k.to_ascii_lowercase().as_str())
        })
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    pairs.sort();

    let path = parsed.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };

    let mut out = format!("{}://{}", scheme, host);
    if let Some(p) = port {
        out.push_str(&format!(":{}", p));
    }
    out.push_str(path);
    if !pairs.is_empty() {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        out.push('?');
        out.push_str(&query);
    }
    out
}

fn first_http_param(parsed: &Url, keys: &[&str]) -> Option<String> {
    for key in keys {
        let found = parsed
            .query_pairs()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.to_string());
        if let Some(value) = found {
            if value.starts_with("http") {
                return Some(value);
            }
        }
    }
    None
}

/// Replace a known redirector URL with the destination found in its query
/// parameters. `t.co` links are intentionally left alone — they only resolve
/// with a live GET. Anything unrecognized comes back unchanged.
pub fn unwrap_redirect(url: &str) -> String {
    let raw = upgrade_scheme(url);
    if raw.is_empty() {
        return String::new();
    }
    let Ok(parsed) = Url::parse(&raw) else {
        return raw;
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let path = parsed.path().to_string();

    if host.ends_with("duckduckgo.com") && path.starts_with("/l/") {
        if let Some(target) = first_http_param(&parsed, &["uddg"]) {
            return target;
        }
    }
    if host == "link.zhihu.com" {
        if let Some(target) = first_http_param(&parsed, &["target"]) {
            return target;
        }
    }
    if host.ends_with("search.brave.com") && (path.contains("redirect") || host.starts_with("r.")) {
        if let Some(target) = first_http_param(&parsed, &["url", "q"]) {
            return target;
        }
    }
    if host.ends_with("google.com") && path.starts_with("/url") {
        if let Some(target) = first_http_param(&parsed, &["q", "url"]) {
            return target;
        }
    }
    if host.ends_with("youtube.com") && path.starts_with("/redirect") {
        if let Some(target) = first_http_param(&parsed, &["q", "url"]) {
            return target;
        }
    }
    if host.ends_with("steamcommunity.com") && path.contains("linkfilter") {
        if let Some(target) = first_http_param(&parsed, &["url"]) {
            return target;
        }
    }
    if host == "l.facebook.com" {
        if let Some(target) = first_http_param(&parsed, &["u"]) {
            return target;
        }
    }
    if host == "redirect.pinterest.com" {
        if let Some(target) = first_http_param(&parsed, REDIRECT_PARAM_CANDIDATES) {
            return target;
        }
    }

    raw
}

/// Lowercased hostname, or empty string when the URL does not parse.
pub fn hostname(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// True when the query contains a whitespace-delimited `site:<token>`.
pub fn is_site_query(query: &str) -> bool {
    site_query_re().is_match(query)
}

/// Hosts that serve nothing useful to a plain HTTP client; go straight to
/// the headless browser for these.
pub fn prefer_browser_for_url(url: &str) -> bool {
    let host = hostname(url);
    if host.is_empty() {
        return false;
    }
    host.ends_with("xiaohongshu.com") || host.ends_with("xhslink.com") || host.ends_with("zhihu.com")
}

/// Numeric answer id from a Zhihu answer URL.
pub fn extract_zhihu_answer_id(url: &str) -> Option<String> {
    zhihu_answer_re()
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Work around occasional browser-bundle arch/path mismatches: when the
/// configured path is missing, try the mac x64 → arm64 substitutions.
pub fn resolve_browser_executable_path(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    if Path::new(path).exists() {
        return Some(path.to_string());
    }

    let replacements = [
        ("chrome-mac-x64", "chrome-mac-arm64"),
        ("chrome-headless-shell-mac-x64", "chrome-headless-shell-mac-arm64"),
        ("mac-x64", "mac-arm64"),
    ];
    for (old, new) in replacements {
        if path.contains(old) {
            let alt = path.replace(old, new);
            if alt != path && Path::new(&alt).exists() {
                return Some(alt);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_strips_tracking_params() {
        assert_eq!(
            normalize_for_dedup("https://example.com/path/?utm_source=x"),
            "https://example.com/path"
        );
    }

    #[test]
    fn dedup_is_stable_across_cosmetic_variants() {
        let variants = [
            "https://Example.com:443/a/?b=2&a=1",
            "https://example.com/a?a=1&b=2",
            "https://example.com/a/?a=1&utm_campaign=z&b=2",
            "//example.com/a?b=2&a=1&fbclid=abc",
        ];
        let keys: Vec<String> = variants.iter().map(|u| normalize_for_dedup(u)).collect();
        assert!(keys.iter().all(|k| k == &keys[0]), "{:?}", keys);
        assert_eq!(keys[0], "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn dedup_keeps_non_default_port_and_upgrades_www() {
        assert_eq!(
            normalize_for_dedup("http://example.com:8080/x/"),
            "http://example.com:8080/x"
        );
        assert_eq!(normalize_for_dedup("www.example.com"), "https://www.example.com/");
    }

    #[test]
    fn unwrap_decodes_ddg_redirect() {
        assert_eq!(
            unwrap_redirect("https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc"),
            "https://example.com/a?b=c"
        );
    }

    #[test]
    fn unwrap_handles_known_redirectors() {
        assert_eq!(
            unwrap_redirect("https://link.zhihu.com/?target=https%3A%2F%2Frust-lang.org%2F"),
            "https://rust-lang.org/"
        );
        assert_eq!(
            unwrap_redirect("https://www.google.com/url?q=https%3A%2F%2Fexample.com%2Fdoc"),
            "https://example.com/doc"
        );
        assert_eq!(
            unwrap_redirect("https://www.youtube.com/redirect?q=https%3A%2F%2Fexample.org"),
            "https://example.org"
        );
        assert_eq!(
            unwrap_redirect(
                "https://steamcommunity.com/linkfilter/?url=https%3A%2F%2Fexample.com"
            ),
            "https://example.com"
        );
        assert_eq!(
            unwrap_redirect("https://l.facebook.com/l.php?u=https%3A%2F%2Fexample.com"),
            "https://example.com"
        );
        assert_eq!(
            unwrap_redirect("https://redirect.pinterest.com/?dest=https%3A%2F%2Fexample.net"),
            "https://example.net"
        );
    }

    #[test]
    fn unwrap_leaves_tco_and_unknown_hosts_alone() {
        assert_eq!(unwrap_redirect("https://t.co/abc123"), "https://t.co/abc123");
        assert_eq!(
            unwrap_redirect("https://example.com/a?url=https://other.com"),
            "https://example.com/a?url=https://other.com"
        );
    }

    #[test]
    fn unwrap_rejects_non_http_targets() {
        let u = "https://duckduckgo.com/l/?uddg=javascript%3Aalert(1)";
        assert_eq!(unwrap_redirect(u), u);
    }

    #[test]
    fn unwrap_is_idempotent() {
        let inputs = [
            "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc",
            "https://www.google.com/url?q=https%3A%2F%2Fexample.com",
            "https://example.com/plain",
            "https://t.co/abc",
            "not a url at all",
        ];
        for input in inputs {
            let once = unwrap_redirect(input);
            assert_eq!(unwrap_redirect(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn site_query_detection() {
        assert!(is_site_query("rust async site:github.com"));
        assert!(is_site_query("site:example.com"));
        assert!(!is_site_query("website:example.com"));
        assert!(!is_site_query("plain query"));
    }

    #[test]
    fn browser_preferred_hosts() {
        assert!(prefer_browser_for_url("https://www.zhihu.com/question/1"));
        assert!(prefer_browser_for_url("https://xhslink.com/x"));
        assert!(!prefer_browser_for_url("https://example.com/"));
    }

    #[test]
    fn zhihu_answer_id_extraction() {
        assert_eq!(
            extract_zhihu_answer_id("https://www.zhihu.com/question/123/answer/456"),
            Some("456".to_string())
        );
        assert_eq!(
            extract_zhihu_answer_id("https://www.zhihu.com/answer/789"),
            Some("789".to_string())
        );
        assert_eq!(extract_zhihu_answer_id("https://www.zhihu.com/people/x"), None);
    }
}
