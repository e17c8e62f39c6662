use scraper::{Html, Selector};
use tracing::info;

use crate::core::types::SearchLink;
use crate::net::{target_url, HttpClient};

/// Normalize an href from the DDG HTML endpoint: upgrade protocol-relative
/// and path-only URLs, then decode the `/l/?uddg=` redirect wrapper.
fn decode_ddg_href(href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    let candidate = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href.to_string()
    };
    if !candidate.starts_with("http") {
        return String::new();
    }

    if let Ok(parsed) = url::Url::parse(&candidate) {
        let host = parsed.host_str().unwrap_or("");
        if host.ends_with("duckduckgo.com") && parsed.path().starts_with("/l/") {
            if let Some((_, uddg)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
                if !uddg.trim().is_empty() {
                    return uddg.to_string();
                }
            }
        }
    }
    candidate
}

pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchLink> {
    let doc = Html::parse_document(html);
    let sel_item = Selector::parse(".results .result").ok();
    let sel_link = Selector::parse("a.result__a").ok();
    let sel_snippet = Selector::parse(".result__snippet").ok();
    let sel_body = Selector::parse(".result__body").ok();
    let (Some(sel_item), Some(sel_link), Some(sel_snippet), Some(sel_body)) =
        (sel_item, sel_link, sel_snippet, sel_body)
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in doc.select(&sel_item) {
        if out.len() >= max_results {
            break;
        }
        let Some(link) = item.select(&sel_link).next() else {
            continue;
        };
        let href = decode_ddg_href(link.value().attr("href").unwrap_or(""));
        if !href.starts_with("http") {
            continue;
        }
        let title = link.text().collect::<String>().trim().to_string();
        let title = if title.is_empty() { "No Title".to_string() } else { title };

        let description = item
            .select(&sel_snippet)
            .next()
            .or_else(|| item.select(&sel_body).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        out.push(SearchLink {
            title,
            url: href,
            description,
        });
    }
    out
}

pub async fn search(
    http: &HttpClient,
    query: &str,
    max_results: usize,
) -> anyhow::Result<Vec<SearchLink>> {
    let mut url = reqwest::Url::parse("https://duckduckgo.com/html/")?;
    url.query_pairs_mut().append_pair("q", query);

    let config = http.config().clone();
    let visit_url = target_url(&config, url.as_str());
    info!("searching (ddg): {}", query);

    let response = http
        .get(&visit_url, &[], Some(config.search_timeout_s), 3)
        .await?;
    let results = parse_results(&response.body, max_results);
    info!("ddg search done, {} results", results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_uddg_redirect_links() {
        let html = r#"<html><body><div class="results">
          <div class="result">
            <a class="result__a" href="https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc">Example</a>
            <a class="result__snippet">Snippet</a>
          </div>
        </div></body></html>"#;
        let results = parse_results(html, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.com/a?b=c");
        assert_eq!(results[0].title, "Example");
        assert_eq!(results[0].description, "Snippet");
    }

    #[test]
    fn upgrades_protocol_relative_and_path_only_hrefs() {
        assert_eq!(decode_ddg_href("//example.com/x"), "https://example.com/x");
        assert!(decode_ddg_href("/l/?uddg=https%3A%2F%2Fexample.org").starts_with("https://example.org"));
        assert_eq!(decode_ddg_href("mailto:a@b.c"), "");
    }

    #[test]
    fn skips_results_without_anchor() {
        let html = r#"<div class="results"><div class="result"><span>no link</span></div></div>"#;
        assert!(parse_results(html, 5).is_empty());
    }
}
