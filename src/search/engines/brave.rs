use scraper::{ElementRef, Html, Selector};
use tracing::info;

use crate::core::types::SearchLink;
use crate::net::{target_url, HttpClient};

fn select_text(container: &ElementRef<'_>, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    container
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Parse a Brave SERP. Result containers are `[data-type="web"]` with a
/// `.snippet` fallback; hrefs pointing back at the Worker are rejected.
pub fn parse_results(html: &str, max_results: usize, worker_url: Option<&str>) -> Vec<SearchLink> {
    let doc = Html::parse_document(html);
    let primary = Selector::parse(r#"[data-type="web"]"#).ok();
    let fallback = Selector::parse(".snippet").ok();
    let link_sel = Selector::parse("a[href]").ok();

    let (Some(primary), Some(fallback), Some(link_sel)) = (primary, fallback, link_sel) else {
        return Vec::new();
    };

    let mut items: Vec<ElementRef<'_>> = doc.select(&primary).collect();
    if items.is_empty() {
        items = doc.select(&fallback).collect();
    }

    let mut out = Vec::new();
    for item in items {
        if out.len() >= max_results {
            break;
        }
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or("");
        if !href.starts_with("http") {
            continue;
        }
        if worker_url.map(|w| href.contains(w)).unwrap_or(false) {
            continue;
        }

        let title = select_text(&item, ".snippet-title, .title")
            .unwrap_or_else(|| "No Title".to_string());
        let description = select_text(&item, ".snippet-description, .snippet-content, .description")
            .unwrap_or_default();

        out.push(SearchLink {
            title,
            url: href.to_string(),
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
    let mut url = reqwest::Url::parse("https://search.brave.com/search")?;
    url.query_pairs_mut().append_pair("q", query);

    let config = http.config().clone();
    let visit_url = target_url(&config, url.as_str());
    info!("searching (brave): {}", query);
    if config.cf_worker_url.is_some() {
        info!("via worker: {}", visit_url);
    }

    let response = http
        .get(&visit_url, &[], Some(config.search_timeout_s), 1)
        .await?;
    let results = parse_results(&response.body, max_results, config.cf_worker_url.as_deref());
    info!("brave search done, {} results", results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_web_results_and_skips_worker_links() {
        let html = r#"<html><body>
          <div data-type="web">
            <a href="https://example.com/one"></a>
            <div class="snippet-title">One</div>
            <div class="snippet-description">First result</div>
          </div>
          <div data-type="web">
            <a href="https://w.example.dev?url=https%3A//hidden"></a>
            <div class="snippet-title">Worker echo</div>
          </div>
          <div data-type="web">
            <a href="/relative"></a>
          </div>
        </body></html>"#;
        let results = parse_results(html, 10, Some("w.example.dev"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.com/one");
        assert_eq!(results[0].title, "One");
        assert_eq!(results[0].description, "First result");
    }

    #[test]
    fn falls_back_to_snippet_containers() {
        let html = r#"<div class="snippet">
            <a href="https://example.com/a"></a>
            <div class="title">A</div>
        </div>"#;
        let results = parse_results(html, 10, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "A");
    }

    #[test]
    fn caps_at_max_results() {
        let mut html = String::new();
        for i in 0..5 {
            html.push_str(&format!(
                r#"<div data-type="web"><a href="https://example.com/{}"></a>
                   <div class="title">t{}</div></div>"#,
                i, i
            ));
        }
        assert_eq!(parse_results(&html, 3, None).len(), 3);
    }
}
