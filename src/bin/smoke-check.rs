//! Local smoke checks for code wiring and config values.
//!
//! Usage:
//!   smoke-check
//!   smoke-check --require-llm
//!
//! Prints a JSON report; exits 0 on pass, 2 on failure.

use serde_json::json;

use pagescout::ai::parse::{extract_browse_page_links, parse_markdown_links, strip_urls};
use pagescout::urls::{normalize_for_dedup, unwrap_redirect};

fn is_placeholder_api_key(value: &str) -> bool {
    let text = value.trim().to_lowercase();
    if text.is_empty() {
        return true;
    }
    let patterns = [
        r"^sk-xxx+$",
        r"your.*key",
        r"example",
        r"test",
        r"dummy",
        r"placeholder",
    ];
    patterns
        .iter()
        .any(|p| regex::Regex::new(p).map(|re| re.is_match(&text)).unwrap_or(false))
}

fn run_core_checks() -> Vec<String> {
    let mut failures = Vec::new();

    if unwrap_redirect("https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc")
        != "https://example.com/a?b=c"
    {
        failures.push("DDG redirect unwrap failed".to_string());
    }

    let (links, summary) =
        parse_markdown_links("[Example](https://example.com/a) bare https://example.com/b", "");
    let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
    if !urls.contains(&"https://example.com/a") || !urls.contains(&"https://example.com/b") {
        failures.push("Markdown link parser failed".to_string());
    }

    let cleaned = strip_urls(&summary);
    if cleaned.contains("http://") || cleaned.contains("https://") {
        failures.push("URL stripping failed".to_string());
    }

    let browse_links = extract_browse_page_links(
        r#"browse_page {"url":"https://openai.com/","instructions":"check"}"#,
        "",
    );
    if browse_links.first().map(|l| l.url.as_str()) != Some("https://openai.com/") {
        failures.push("browse_page link extraction failed".to_string());
    }

    if normalize_for_dedup("https://example.com/path/?utm_source=x") != "https://example.com/path" {
        failures.push("URL normalization failed".to_string());
    }

    failures
}

fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let require_llm = argv.iter().any(|a| a == "--require-llm");
    let config = pagescout::init_runtime(&argv);

    let core_failures = run_core_checks();

    let mut warnings: Vec<String> = Vec::new();
    let mut config_failures: Vec<String> = Vec::new();

    let key = config.openai_api_key.clone().unwrap_or_default();
    let key_is_placeholder = is_placeholder_api_key(&key);
    let llm_ready = config.llm_configured() && !key_is_placeholder;

    if config.openai_base_url.is_none() {
        warnings.push("OPENAI_BASE_URL is empty; AI summary will be disabled".to_string());
    }
    if config.openai_api_key.is_none() {
        warnings.push("OPENAI_API_KEY is empty; AI summary will be disabled".to_string());
    } else if key_is_placeholder {
        warnings.push("OPENAI_API_KEY looks like a placeholder value".to_string());
    }
    if require_llm && !llm_ready {
        config_failures.push(
            "LLM strict check failed: provide real OPENAI_API_KEY + OPENAI_BASE_URL".to_string(),
        );
    }

    let success = core_failures.is_empty() && config_failures.is_empty();
    let report = json!({
        "success": success,
        "checks": {
            "core_failures": core_failures,
            "config_failures": config_failures,
            "warnings": warnings,
        },
        "config_snapshot": {
            "OPENAI_MODEL": config.openai_model,
            "OPENAI_BASE_URL_set": config.openai_base_url.is_some(),
            "OPENAI_API_KEY_set": config.openai_api_key.is_some(),
            "OPENAI_API_KEY_placeholder": key_is_placeholder,
            "LLM_effectively_ready": llm_ready,
            "PROXY_CONFIG": config.proxy,
            "CF_WORKER_URL": config.cf_worker_url,
            "PLAYWRIGHT_FALLBACK": config.playwright_fallback,
            "PLAYWRIGHT_TIMEOUT_MS": config.playwright_timeout_ms,
            "PLAYWRIGHT_CHALLENGE_WAIT": config.playwright_challenge_wait,
            "EXTRACTION_STRATEGY": config.extraction.strategy.as_str(),
        },
    });

    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    std::process::exit(if success { 0 } else { 2 });
}
