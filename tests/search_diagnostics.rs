//! Orchestrator behavior over scripted backends: fallback diagnostics,
//! merge order, domain caps, and AI failure isolation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use pagescout::ai::ChatBackend;
use pagescout::core::types::SearchLink;
use pagescout::search::engines::SearchService;
use pagescout::search::{web_search, SearchContext};

struct ScriptedEngines {
    brave: Result<Vec<SearchLink>, String>,
    ddg: Result<Vec<SearchLink>, String>,
}

#[async_trait]
impl SearchService for ScriptedEngines {
    async fn search_brave(&self, _query: &str, _max: usize) -> anyhow::Result<Vec<SearchLink>> {
        self.brave.clone().map_err(|e| anyhow::anyhow!(e))
    }

    async fn search_duckduckgo(&self, _query: &str, _max: usize) -> anyhow::Result<Vec<SearchLink>> {
        self.ddg.clone().map_err(|e| anyhow::anyhow!(e))
    }
}

struct ScriptedChat {
    content: String,
    reasoning: String,
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<(String, String)> {
        Ok((self.content.clone(), self.reasoning.clone()))
    }
}

struct FailingChat;

#[async_trait]
impl ChatBackend for FailingChat {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<(String, String)> {
        anyhow::bail!("llm exploded")
    }
}

fn link(url: &str) -> SearchLink {
    SearchLink {
        title: format!("title for {}", url),
        url: url.to_string(),
        description: String::new(),
    }
}

fn config_with(pairs: &[(&str, &str)]) -> Arc<pagescout::AppConfig> {
    let env: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(pagescout::core::config::build_config(&[], &env).config)
}

#[tokio::test]
async fn ddg_fallback_diagnostics_are_reported() {
    let ctx = SearchContext {
        config: config_with(&[]),
        search: Arc::new(ScriptedEngines {
            brave: Err("boom".to_string()),
            ddg: Ok(vec![link("https://example.com")]),
        }),
        chat: None,
    };

    let outcome = web_search(&ctx, "test query").await;
    assert!(outcome.success);
    assert_eq!(outcome.links.len(), 1);
    assert_eq!(outcome.diagnostics.search_backend, "ddg");
    assert!(outcome.diagnostics.browser.fallback_used);
    assert_eq!(outcome.diagnostics.browser.brave_error.as_deref(), Some("boom"));
    assert!(!outcome.diagnostics.llm_enabled);
    assert!(outcome.ai_error.is_empty());
}

#[tokio::test]
async fn brave_success_skips_the_fallback() {
    let ctx = SearchContext {
        config: config_with(&[]),
        search: Arc::new(ScriptedEngines {
            brave: Ok(vec![link("https://example.com/a"), link("https://other.org/b")]),
            ddg: Err("must not be called".to_string()),
        }),
        chat: None,
    };

    let outcome = web_search(&ctx, "anything").await;
    assert_eq!(outcome.diagnostics.search_backend, "brave");
    assert!(!outcome.diagnostics.browser.fallback_used);
    assert_eq!(outcome.diagnostics.browser.brave_results, 2);
    assert_eq!(outcome.links.len(), 2);
}

#[tokio::test]
async fn domain_cap_limits_non_site_queries() {
    let many: Vec<SearchLink> = (0..6)
        .map(|i| link(&format!("https://same.example.com/page-{}", i)))
        .chain((0..2).map(|i| link(&format!("https://other.example.org/p{}", i))))
        .collect();
    let ctx = SearchContext {
        config: config_with(&[("SEARCH_MAX_PER_DOMAIN", "2")]),
        search: Arc::new(ScriptedEngines {
            brave: Ok(many),
            ddg: Ok(vec![]),
        }),
        chat: None,
    };

    let outcome = web_search(&ctx, "regular query").await;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for l in &outcome.links {
        let host = url::Url::parse(&l.url).unwrap().host_str().unwrap().to_string();
        *counts.entry(host).or_insert(0) += 1;
    }
    for (host, count) in counts {
        assert!(count <= 2, "host {} appeared {} times", host, count);
    }
}

#[tokio::test]
async fn site_queries_disable_the_domain_cap() {
    let many: Vec<SearchLink> = (0..5)
        .map(|i| link(&format!("https://docs.example.com/page-{}", i)))
        .collect();
    let ctx = SearchContext {
        config: config_with(&[("SEARCH_MAX_PER_DOMAIN", "2")]),
        search: Arc::new(ScriptedEngines {
            brave: Ok(many),
            ddg: Ok(vec![]),
        }),
        chat: None,
    };

    let outcome = web_search(&ctx, "topic site:docs.example.com").await;
    assert!(outcome.diagnostics.is_site_query);
    assert_eq!(outcome.links.len(), 5);
}

#[tokio::test]
async fn result_limit_bounds_the_link_list() {
    let many: Vec<SearchLink> = (0..30)
        .map(|i| link(&format!("https://host{}.example.com/", i)))
        .collect();
    let ctx = SearchContext {
        config: config_with(&[("SEARCH_RESULT_LIMIT", "5")]),
        search: Arc::new(ScriptedEngines {
            brave: Ok(many),
            ddg: Ok(vec![]),
        }),
        chat: None,
    };

    let outcome = web_search(&ctx, "wide query").await;
    assert_eq!(outcome.links.len(), 5);
}

#[tokio::test]
async fn ai_links_lead_for_regular_queries_and_trail_for_site_queries() {
    let chat_content = concat!(
        "browse_page {\"url\":\"https://priority.example.com/\",\"instructions\":\"check\"}\n",
        "Other finding: [doc](https://aidoc.example.org/ref)\n",
        "### 总结\n结论正文。",
    );
    let engines = || ScriptedEngines {
        brave: Ok(vec![link("https://serp.example.net/hit")]),
        ddg: Ok(vec![]),
    };
    let chat = || -> Option<Arc<dyn ChatBackend>> {
        Some(Arc::new(ScriptedChat {
            content: chat_content.to_string(),
            reasoning: String::new(),
        }))
    };
    let config = config_with(&[
        ("OPENAI_API_KEY", "sk-real"),
        ("OPENAI_BASE_URL", "https://llm.example/v1"),
    ]);

    let outcome = web_search(
        &SearchContext {
            config: Arc::clone(&config),
            search: Arc::new(engines()),
            chat: chat(),
        },
        "regular query",
    )
    .await;
    let urls: Vec<&str> = outcome.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://priority.example.com/",
            "https://aidoc.example.org/ref",
            "https://serp.example.net/hit",
        ]
    );
    assert!(outcome.diagnostics.llm_enabled);
    assert!(outcome.ai_error.is_empty());
    assert!(outcome.ai_summary.contains("结论正文"));
    assert!(!outcome.ai_summary.contains("https://"));

    let outcome = web_search(
        &SearchContext {
            config,
            search: Arc::new(engines()),
            chat: chat(),
        },
        "query site:example.net",
    )
    .await;
    let urls: Vec<&str> = outcome.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://priority.example.com/",
            "https://serp.example.net/hit",
            "https://aidoc.example.org/ref",
        ]
    );
}

#[tokio::test]
async fn ai_failure_degrades_to_browser_only() {
    let ctx = SearchContext {
        config: config_with(&[
            ("OPENAI_API_KEY", "sk-real"),
            ("OPENAI_BASE_URL", "https://llm.example/v1"),
        ]),
        search: Arc::new(ScriptedEngines {
            brave: Ok(vec![link("https://example.com/only")]),
            ddg: Ok(vec![]),
        }),
        chat: Some(Arc::new(FailingChat)),
    };

    let outcome = web_search(&ctx, "query").await;
    assert!(outcome.success);
    assert_eq!(outcome.links.len(), 1);
    assert_eq!(outcome.ai_error, "llm exploded");
    assert!(outcome.ai_summary.is_empty());
}

#[tokio::test]
async fn merged_results_are_deduplicated_by_normalized_url() {
    let ctx = SearchContext {
        config: config_with(&[]),
        search: Arc::new(ScriptedEngines {
            brave: Ok(vec![
                link("https://example.com/a?utm_source=serp"),
                link("https://example.com/a/"),
                link("https://example.com/a"),
            ]),
            ddg: Ok(vec![]),
        }),
        chat: None,
    };

    let outcome = web_search(&ctx, "dupes").await;
    assert_eq!(outcome.links.len(), 1);
}
