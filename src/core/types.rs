use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !*v
}

/// One curated link as returned by `web_search`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SearchLink {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Scoring metrics attached to text/markdown fetch results.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct QualityMetrics {
    pub char_len: usize,
    pub line_count: usize,
    pub unique_line_ratio: f64,
    pub noise_line_ratio: f64,
}

/// Page metadata as returned by the `meta` fetch mode. The anchor-list
/// truncation flag lives on the enclosing `FetchResult`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    pub canonical_url: String,
    pub links: Vec<MetaLink>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MetaLink {
    pub text: String,
    pub href: String,
}

/// Output format for one `fetch` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Html,
    Markdown,
    Text,
    Meta,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Html => "html",
            FetchMode::Markdown => "markdown",
            FetchMode::Text => "text",
            FetchMode::Meta => "meta",
        }
    }
}

/// Result of a single `fetch`. One mode-appropriate content field is set on
/// success; `error` is set instead when `success` is false.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FetchResult {
    pub success: bool,
    pub url: String,
    #[serde(default)]
    pub via_worker: bool,
    #[serde(default)]
    pub via_playwright: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub via_zhihu_api: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub truncated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub metadata: Option<PageMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_playwright: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playwright_error: Option<String>,
}

impl FetchResult {
    pub fn failure(url: &str, error: impl Into<String>) -> Self {
        FetchResult {
            success: false,
            url: url.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Stub telling the fetch pipeline to retry through the headless browser.
    pub fn needs_browser(url: &str) -> Self {
        FetchResult {
            success: false,
            url: url.to_string(),
            needs_playwright: Some(true),
            ..Default::default()
        }
    }
}

/// Per-backend search diagnostics surfaced to the client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserSearchDiagnostics {
    pub backend: String,
    pub fallback_used: bool,
    pub brave_results: usize,
    pub ddg_results: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brave_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddg_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_error: Option<String>,
}

impl Default for BrowserSearchDiagnostics {
    fn default() -> Self {
        BrowserSearchDiagnostics {
            backend: "none".to_string(),
            fallback_used: false,
            brave_results: 0,
            ddg_results: 0,
            brave_error: None,
            ddg_error: None,
            browser_error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchDiagnostics {
    pub search_backend: String,
    pub browser: BrowserSearchDiagnostics,
    pub is_site_query: bool,
    pub llm_enabled: bool,
}

/// Result of one `web_search`. Always `success: true`; failures are carried
/// in `ai_error` and `diagnostics`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchOutcome {
    pub success: bool,
    pub query: String,
    pub links: Vec<SearchLink>,
    pub ai_summary: String,
    pub ai_error: String,
    pub diagnostics: SearchDiagnostics,
}
