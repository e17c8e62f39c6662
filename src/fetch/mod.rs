//! The fetch pipeline: site APIs → impersonated HTTP → content extraction →
//! headless-browser fallback, expressed as a linear chain of tagged results
//! rather than an exception funnel.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::browser;
use crate::core::types::{FetchMode, FetchResult};
use crate::core::AppConfig;
use crate::extract::{
    build_degraded_markdown, build_degraded_text, clean_for, extract_best_content, score_content,
    ExtractionCandidate, OutputFormat,
};
use crate::html::looks_like_blocked;
use crate::net::{target_url, HttpClient, TransportError};
use crate::urls::{extract_zhihu_answer_id, prefer_browser_for_url};

/// Clip content to the token cap (≈ 4 chars per token). Returns the kept
/// prefix and whether anything was dropped.
pub fn limit_content_length(content: &str, config: &AppConfig) -> (String, bool) {
    let estimated_tokens = content.chars().count() / 4;
    if estimated_tokens > config.max_token_limit {
        let keep = config.char_budget();
        (content.chars().take(keep).collect(), true)
    } else {
        (content.to_string(), false)
    }
}

fn output_format_for(mode: FetchMode) -> OutputFormat {
    match mode {
        FetchMode::Markdown => OutputFormat::Markdown,
        _ => OutputFormat::Text,
    }
}

/// Swap in a degraded title+description candidate when a blocked page still
/// produced low-quality content.
pub fn degrade_if_blocked(
    candidate: ExtractionCandidate,
    html: &str,
    mode: FetchMode,
    blocked: bool,
) -> ExtractionCandidate {
    if !blocked || candidate.quality_score >= 65 {
        return candidate;
    }
    let output = output_format_for(mode);
    let degraded = match output {
        OutputFormat::Markdown => build_degraded_markdown(html),
        OutputFormat::Text => build_degraded_text(html),
    }
    .unwrap_or_default();
    let cleaned = clean_for(output, &degraded);
    let mut replacement = score_content(&cleaned);
    replacement.extractor = "meta:blocked".to_string();
    replacement.degraded = true;
    replacement
}

/// Assemble a content-mode `FetchResult` from a scored candidate.
pub fn content_result(
    url: &str,
    mode: FetchMode,
    candidate: &ExtractionCandidate,
    config: &AppConfig,
) -> FetchResult {
    let (limited, truncated) = limit_content_length(&candidate.content, config);
    let mut result = FetchResult {
        success: true,
        url: url.to_string(),
        truncated,
        extractor: Some(candidate.extractor.clone()),
        quality_score: Some(candidate.quality_score),
        quality_metrics: Some(candidate.metrics()),
        degraded: candidate.degraded,
        ..Default::default()
    };
    match mode {
        FetchMode::Markdown => result.markdown = Some(limited),
        _ => result.text = Some(limited),
    }
    result
}

pub struct PageFetcher {
    config: Arc<AppConfig>,
    http: HttpClient,
}

impl PageFetcher {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let http = HttpClient::new(Arc::clone(&config))?;
        Ok(PageFetcher { config, http })
    }

    pub fn with_http(http: HttpClient) -> Self {
        PageFetcher {
            config: Arc::clone(http.config()),
            http,
        }
    }

    /// Fetch one URL in the given mode, walking the adapter → HTTP →
    /// browser fallback chain.
    pub async fn fetch(
        &self,
        url: &str,
        mode: FetchMode,
        headers: &[(String, String)],
    ) -> FetchResult {
        let primary = self.fetch_primary(url, mode, headers).await;

        let mut result = match primary {
            Ok(result) => result,
            Err(e) => {
                warn!("fetch failed {}: {}", url, e);
                if self.config.playwright_fallback {
                    return browser::fetch_with_browser(&self.config, url, mode, headers).await;
                }
                return FetchResult::failure(url, e.to_string());
            }
        };

        if result.needs_playwright.unwrap_or(false) && self.config.playwright_fallback {
            return browser::fetch_with_browser(&self.config, url, mode, headers).await;
        }

        // A successful GET can still hand back a block page as content;
        // retry through the browser and keep whichever succeeds.
        let content_blocked = match mode {
            FetchMode::Markdown => result
                .markdown
                .as_deref()
                .map(looks_like_blocked)
                .unwrap_or(false),
            FetchMode::Text => result
                .text
                .as_deref()
                .map(looks_like_blocked)
                .unwrap_or(false),
            _ => false,
        };
        if content_blocked && self.config.playwright_fallback {
            let browser_result =
                browser::fetch_with_browser(&self.config, url, mode, headers).await;
            if browser_result.success {
                return browser_result;
            }
            result.blocked = true;
            result.playwright_error = Some(
                browser_result
                    .error
                    .unwrap_or_else(|| "browser fallback failed".to_string()),
            );
        }

        result
    }

    async fn fetch_primary(
        &self,
        url: &str,
        mode: FetchMode,
        headers: &[(String, String)],
    ) -> Result<FetchResult, TransportError> {
        if let Some(result) = self.fetch_zhihu_answer(url, mode).await {
            return Ok(result);
        }
        if mode == FetchMode::Markdown {
            if let Some(result) = self.fetch_discourse_topic(url).await {
                return Ok(result);
            }
        }

        if prefer_browser_for_url(url) && self.config.playwright_fallback {
            return Ok(FetchResult::needs_browser(url));
        }

        let visit_url = target_url(&self.config, url);
        let response = self
            .http
            .get(&visit_url, headers, Some(self.config.fetch_timeout_s), 2)
            .await?;

        let raw_html = response.body;
        let blocked = looks_like_blocked(&raw_html);
        if blocked && self.config.playwright_fallback {
            let mut stub = FetchResult::needs_browser(url);
            stub.via_worker = self.config.cf_worker_url.is_some();
            stub.status_code = Some(response.status);
            return Ok(stub);
        }

        match mode {
            FetchMode::Html => {
                let (limited, truncated) = limit_content_length(&raw_html, &self.config);
                Ok(FetchResult {
                    success: true,
                    url: url.to_string(),
                    via_worker: self.config.cf_worker_url.is_some(),
                    status_code: Some(response.status),
                    html: Some(limited),
                    truncated,
                    blocked,
                    ..Default::default()
                })
            }
            FetchMode::Meta => {
                let (metadata, truncated) = crate::html::extract_metadata(&raw_html, &self.config);
                Ok(FetchResult {
                    success: true,
                    url: url.to_string(),
                    via_worker: self.config.cf_worker_url.is_some(),
                    status_code: Some(response.status),
                    metadata: Some(metadata),
                    truncated,
                    blocked,
                    ..Default::default()
                })
            }
            FetchMode::Markdown | FetchMode::Text => {
                let output = output_format_for(mode);
                let extracted = extract_best_content(&raw_html, url, output, &self.config);
                let extracted = degrade_if_blocked(extracted, &raw_html, mode, blocked);
                let mut result = content_result(url, mode, &extracted, &self.config);
                result.via_worker = self.config.cf_worker_url.is_some();
                result.status_code = Some(response.status);
                result.blocked = blocked;
                Ok(result)
            }
        }
    }

    // ── Zhihu answer API ────────────────────────────────────────────────────

    async fn fetch_zhihu_answer(&self, url: &str, mode: FetchMode) -> Option<FetchResult> {
        let answer_id = extract_zhihu_answer_id(url)?;
        let api_url = format!(
            "https://www.zhihu.com/api/v4/answers/{}?include=content,excerpt,content_need_truncated,segment_infos",
            answer_id
        );

        // Worker first when configured, direct second.
        if self.config.cf_worker_url.is_some() {
            let worker_url = target_url(&self.config, &api_url);
            if let Some(result) = self.try_zhihu_api(&worker_url, url, mode, true).await {
                return Some(result);
            }
        }
        self.try_zhihu_api(&api_url, url, mode, false).await
    }

    async fn try_zhihu_api(
        &self,
        api_url: &str,
        page_url: &str,
        mode: FetchMode,
        via_worker: bool,
    ) -> Option<FetchResult> {
        let response = self
            .http
            .get(
                api_url,
                &[("Accept".to_string(), "application/json".to_string())],
                Some(self.config.fetch_timeout_s),
                2,
            )
            .await
            .ok()?;

        let data: Value = serde_json::from_str(&response.body).ok()?;
        let content = data.get("content").and_then(Value::as_str)?;
        if content.is_empty() {
            return None;
        }

        let mut content_html = content.to_string();
        let truncated_flag = data
            .get("content_need_truncated")
            .map(|v| v.as_bool().unwrap_or(!v.is_null()))
            .unwrap_or(false);
        let segments = data.get("segment_infos").and_then(Value::as_array);
        if truncated_flag {
            if let Some(segments) = segments.filter(|s| !s.is_empty()) {
                // Re-append truncated segments the primary content is missing,
                // matching on a compacted 20-char prefix.
                let compact_content: String =
                    content_html.chars().filter(|c| !c.is_whitespace()).collect();
                let mut extra_parts = Vec::new();
                for segment in segments {
                    let text = segment.get("text").and_then(Value::as_str).unwrap_or("");
                    if text.trim().is_empty() {
                        continue;
                    }
                    let compact_text: String =
                        text.chars().filter(|c| !c.is_whitespace()).collect();
                    let prefix: String = compact_text.chars().take(20).collect();
                    if !prefix.is_empty() && compact_content.contains(&prefix) {
                        continue;
                    }
                    extra_parts.push(format!(
                        "<p>{}</p>",
                        crate::extract::adapters::escape_html(text.trim())
                    ));
                }
                content_html.push_str(&extra_parts.concat());
            }
        }

        info!("zhihu answer api hit for {}", page_url);
        Some(self.build_zhihu_result(page_url, mode, &content_html, via_worker))
    }

    fn build_zhihu_result(
        &self,
        url: &str,
        mode: FetchMode,
        content_html: &str,
        via_worker: bool,
    ) -> FetchResult {
        if mode == FetchMode::Html {
            let (limited, truncated) = limit_content_length(content_html, &self.config);
            return FetchResult {
                success: true,
                url: url.to_string(),
                via_worker,
                via_zhihu_api: true,
                html: Some(limited),
                truncated,
                ..Default::default()
            };
        }

        let wrapped = format!("<html><body>{}</body></html>", content_html);
        let output = output_format_for(mode);
        let extracted = extract_best_content(&wrapped, url, output, &self.config);
        let mut result = content_result(url, mode, &extracted, &self.config);
        result.via_worker = via_worker;
        result.via_zhihu_api = true;
        result
    }

    // ── Discourse topic JSON ────────────────────────────────────────────────

    async fn fetch_discourse_topic(&self, url: &str) -> Option<FetchResult> {
        let json_url = discourse_topic_json_url(url)?;
        let response = self
            .http
            .get(
                &target_url(&self.config, &json_url),
                &[("Accept".to_string(), "application/json".to_string())],
                Some(self.config.fetch_timeout_s),
                2,
            )
            .await
            .ok()?;

        if looks_like_blocked(&response.body) {
            return None;
        }
        let data: Value = serde_json::from_str(&response.body).ok()?;
        let markdown = discourse_topic_markdown(&data, url)?;

        let (limited, truncated) = limit_content_length(&markdown, &self.config);
        let metrics = score_content(&limited);
        Some(FetchResult {
            success: true,
            url: url.to_string(),
            via_worker: self.config.cf_worker_url.is_some(),
            status_code: Some(response.status),
            markdown: Some(limited),
            truncated,
            blocked: false,
            extractor: Some("adapter:discourse:topic_json".to_string()),
            quality_score: Some(metrics.quality_score),
            quality_metrics: Some(metrics.metrics()),
            degraded: false,
            ..Default::default()
        })
    }
}

/// Derive the `…/t/<slug>/<topic-id>.json` endpoint for a Discourse topic
/// URL. URLs already ending in `.json` are used as-is (query dropped).
pub fn discourse_topic_json_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let scheme = parsed.scheme();
    let path = parsed.path();

    if path.ends_with(".json") {
        return Some(format!("{}://{}{}", scheme, host, path));
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let t_index = segments.iter().position(|s| *s == "t")?;
    let topic_id_index = segments
        .iter()
        .enumerate()
        .skip(t_index + 1)
        .find(|(_, s)| s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty())
        .map(|(i, _)| i)?;

    let json_path = format!("/{}.json", segments[..=topic_id_index].join("/"));
    Some(format!("{}://{}{}", scheme, host, json_path))
}

/// Render a Discourse topic JSON payload as markdown: the topic title, then
/// each post prefixed with `## {username} · #{post_number}`.
pub fn discourse_topic_markdown(data: &Value, url: &str) -> Option<String> {
    let title = data.get("title").and_then(Value::as_str).unwrap_or("").trim();
    let posts = data
        .get("post_stream")
        .and_then(|s| s.get("posts"))
        .and_then(Value::as_array)?;
    if posts.is_empty() {
        return None;
    }

    let mut parts: Vec<String> = Vec::new();
    if !title.is_empty() {
        parts.push(format!("# {}", title));
    }

    for post in posts {
        let cooked = post.get("cooked").and_then(Value::as_str).unwrap_or("").trim();
        if cooked.is_empty() {
            continue;
        }
        let username = post
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if !username.is_empty() {
            let mut header = format!("## {}", username);
            if let Some(number) = post.get("post_number").and_then(Value::as_i64) {
                header = format!("{} · #{}", header, number);
            }
            parts.push(header);
        }

        let wrapped = format!("<html><body>{}</body></html>", cooked);
        let rendered = crate::extract::readability_extract(
            &wrapped,
            url,
            OutputFormat::Markdown,
            true,
            true,
        )
        .unwrap_or_else(|| crate::html::html_to_text(&wrapped));
        let cleaned = crate::extract::noise::clean_extracted_markdown(&rendered);
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
    }

    let combined = parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string();
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> AppConfig {
        crate::core::config::build_config(&[], &HashMap::<String, String>::new()).config
    }

    #[test]
    fn length_cap_honors_token_budget() {
        let env: HashMap<String, String> =
            [("MAX_TOKEN_LIMIT".to_string(), "10".to_string())].into();
        let config = crate::core::config::build_config(&[], &env).config;

        let short = "x".repeat(40);
        let (kept, truncated) = limit_content_length(&short, &config);
        assert_eq!(kept.len(), 40);
        assert!(!truncated);

        let long = "y".repeat(100);
        let (kept, truncated) = limit_content_length(&long, &config);
        assert_eq!(kept.len(), 40);
        assert!(truncated);
    }

    #[test]
    fn discourse_json_url_derivation() {
        assert_eq!(
            discourse_topic_json_url("https://forum.example.com/t/some-topic/1234"),
            Some("https://forum.example.com/t/some-topic/1234.json".to_string())
        );
        assert_eq!(
            discourse_topic_json_url("https://forum.example.com/t/some-topic/1234/7"),
            Some("https://forum.example.com/t/some-topic/1234.json".to_string())
        );
        assert_eq!(
            discourse_topic_json_url("https://forum.example.com/t/abc/999.json?page=2"),
            Some("https://forum.example.com/t/abc/999.json".to_string())
        );
        assert_eq!(discourse_topic_json_url("https://forum.example.com/t/no-id"), None);
        assert_eq!(discourse_topic_json_url("https://example.com/posts/5"), None);
    }

    #[test]
    fn discourse_markdown_includes_post_headers() {
        let data: Value = serde_json::from_str(
            r#"{
              "title": "Interesting topic",
              "post_stream": {"posts": [
                {"username": "alice", "post_number": 1,
                 "cooked": "<p>First answer with enough words to survive extraction and cleaning.</p>"},
                {"username": "bob", "post_number": 2, "cooked": "<p>Second answer, also long enough to keep.</p>"},
                {"username": "carol", "post_number": 3, "cooked": ""}
              ]}
            }"#,
        )
        .unwrap();
        let md = discourse_topic_markdown(&data, "https://forum.example.com/t/x/1").unwrap();
        assert!(md.starts_with("# Interesting topic"));
        assert!(md.contains("## alice · #1"));
        assert!(md.contains("## bob · #2"));
        assert!(!md.contains("carol"));
    }

    #[test]
    fn degrade_replaces_low_quality_blocked_content() {
        let html = r#"<html><head><title>Wall</title>
            <meta name="description" content="desc"></head><body></body></html>"#;
        let weak = score_content("tiny");
        let degraded = degrade_if_blocked(weak, html, FetchMode::Markdown, true);
        assert_eq!(degraded.extractor, "meta:blocked");
        assert!(degraded.degraded);
        assert!(degraded.content.contains("Wall"));
        let _ = config();
    }

    #[test]
    fn degrade_keeps_high_quality_content() {
        let strong_body = (0..50)
            .map(|i| format!("Meaningful unique sentence number {} with extra detail.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let strong = score_content(&strong_body);
        assert!(strong.quality_score >= 65, "score {}", strong.quality_score);
        let kept = degrade_if_blocked(strong.clone(), "<html></html>", FetchMode::Markdown, true);
        assert_eq!(kept.content, strong.content);
    }
}
