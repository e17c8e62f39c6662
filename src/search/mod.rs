//! The `web_search` orchestrator: AI research and scraped search run in
//! parallel with independent failure isolation, then merge under
//! deduplication and per-domain caps.

pub mod engines;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ai::parse::{extract_browse_page_links, parse_markdown_links, strip_urls};
use crate::ai::{research_prompt, ChatBackend};
use crate::core::types::{
    BrowserSearchDiagnostics, SearchDiagnostics, SearchLink, SearchOutcome,
};
use crate::core::AppConfig;
use crate::urls::{hostname, is_site_query, normalize_for_dedup, unwrap_redirect};
use engines::SearchService;

pub struct SearchContext {
    pub config: Arc<AppConfig>,
    pub search: Arc<dyn SearchService>,
    pub chat: Option<Arc<dyn ChatBackend>>,
}

struct AiSearchResult {
    priority_links: Vec<SearchLink>,
    other_links: Vec<SearchLink>,
    summary: String,
    error: String,
}

impl AiSearchResult {
    fn empty(error: impl Into<String>) -> Self {
        AiSearchResult {
            priority_links: Vec::new(),
            other_links: Vec::new(),
            summary: String::new(),
            error: error.into(),
        }
    }
}

async fn run_ai_search(ctx: &SearchContext, query: &str) -> AiSearchResult {
    let Some(chat) = &ctx.chat else {
        return AiSearchResult::empty("llm_not_configured");
    };
    if !ctx.config.llm_configured() {
        return AiSearchResult::empty("llm_not_configured");
    }

    let prompt = research_prompt(query);
    let completion = tokio::time::timeout(
        Duration::from_secs(ctx.config.search_timeout_s),
        chat.complete(&prompt),
    )
    .await;

    let (content, reasoning) = match completion {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!("AI search unavailable, fallback: {}", e);
            return AiSearchResult::empty(e.to_string());
        }
        Err(_) => {
            warn!("AI search timed out after {}s", ctx.config.search_timeout_s);
            return AiSearchResult::empty("ai_search_timeout");
        }
    };

    let priority_links = extract_browse_page_links(&content, &reasoning);
    let (ai_links, summary) = parse_markdown_links(&content, &reasoning);
    let priority_keys: HashSet<String> = priority_links
        .iter()
        .map(|l| dedup_key(&l.url))
        .collect();
    let other_links: Vec<SearchLink> = ai_links
        .into_iter()
        .filter(|l| !priority_keys.contains(&dedup_key(&l.url)))
        .collect();
    let summary = strip_urls(&summary);
    info!(
        "AI search done: links={} browse_page_links={}",
        other_links.len(),
        priority_links.len()
    );

    AiSearchResult {
        priority_links,
        other_links,
        summary,
        error: String::new(),
    }
}

async fn run_browser_search(
    ctx: &SearchContext,
    query: &str,
) -> (Vec<SearchLink>, BrowserSearchDiagnostics) {
    let internal_limit = (ctx.config.search_result_limit * 2).max(20);
    let mut diagnostics = BrowserSearchDiagnostics::default();

    let brave = tokio::time::timeout(
        Duration::from_secs(ctx.config.search_timeout_s),
        ctx.search.search_brave(query, internal_limit),
    )
    .await;
    let results = match brave {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            diagnostics.brave_error = Some(e.to_string());
            Vec::new()
        }
        Err(_) => {
            diagnostics.brave_error = Some("brave_search_timeout".to_string());
            Vec::new()
        }
    };
    diagnostics.brave_results = results.len();
    if !results.is_empty() {
        diagnostics.backend = "brave".to_string();
        info!("browser search done (brave), results={}", results.len());
        return (results, diagnostics);
    }

    diagnostics.fallback_used = true;
    let ddg = tokio::time::timeout(
        Duration::from_secs(ctx.config.search_timeout_s),
        ctx.search.search_duckduckgo(query, internal_limit),
    )
    .await;
    let fallback = match ddg {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            diagnostics.ddg_error = Some(e.to_string());
            Vec::new()
        }
        Err(_) => {
            diagnostics.ddg_error = Some("ddg_search_timeout".to_string());
            Vec::new()
        }
    };
    diagnostics.ddg_results = fallback.len();
    if !fallback.is_empty() {
        diagnostics.backend = "ddg".to_string();
    }
    info!("browser search done (ddg), results={}", fallback.len());
    (fallback, diagnostics)
}

fn dedup_key(url: &str) -> String {
    let normalized = normalize_for_dedup(url);
    if normalized.is_empty() {
        url.to_string()
    } else {
        normalized
    }
}

pub async fn web_search(ctx: &SearchContext, query: &str) -> SearchOutcome {
    info!("search request: query='{}'", query);
    let is_site = is_site_query(query);
    let use_ai = ctx.chat.is_some() && ctx.config.llm_configured();

    // AI and browser searches run concurrently; each absorbs its own
    // failures so neither can take the other down.
    let (ai, (browser_links, browser_diagnostics)) = if use_ai {
        tokio::join!(run_ai_search(ctx, query), run_browser_search(ctx, query))
    } else {
        let browser = run_browser_search(ctx, query).await;
        (AiSearchResult::empty(""), browser)
    };

    // Site queries ask for one specific source, so scraped results outrank
    // the AI's incidental links; otherwise AI links lead.
    let merged: Vec<SearchLink> = if is_site {
        ai.priority_links
            .into_iter()
            .chain(browser_links)
            .chain(ai.other_links)
            .collect()
    } else {
        ai.priority_links
            .into_iter()
            .chain(ai.other_links)
            .chain(browser_links)
            .collect()
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut unique_links: Vec<SearchLink> = Vec::new();
    for link in merged {
        let url = unwrap_redirect(&link.url);
        if url.is_empty() || !url.starts_with("http") {
            continue;
        }
        if !seen.insert(dedup_key(&url)) {
            continue;
        }
        unique_links.push(SearchLink {
            title: link.title,
            url,
            description: String::new(),
        });
    }

    let limit = ctx.config.search_result_limit;
    let max_per_domain = if is_site { 0 } else { ctx.config.search_max_per_domain };

    let mut domain_counts: HashMap<String, usize> = HashMap::new();
    let mut limited_links: Vec<SearchLink> = Vec::new();
    for link in unique_links {
        let host = hostname(&link.url);
        if max_per_domain > 0 && !host.is_empty() {
            if domain_counts.get(&host).copied().unwrap_or(0) >= max_per_domain {
                continue;
            }
        }
        if !host.is_empty() {
            *domain_counts.entry(host).or_insert(0) += 1;
        }
        limited_links.push(link);
        if limited_links.len() >= limit {
            break;
        }
    }

    SearchOutcome {
        success: true,
        query: query.to_string(),
        links: limited_links,
        ai_summary: ai.summary,
        ai_error: ai.error,
        diagnostics: SearchDiagnostics {
            search_backend: browser_diagnostics.backend.clone(),
            browser: browser_diagnostics,
            is_site_query: is_site,
            llm_enabled: use_ai,
        },
    }
}
