//! Native headless-browser fallback via `chromiumoxide`.
//!
//! Launches a stealth-configured chromium, waits out challenge
//! interstitials, and returns the rendered page in the requested mode.
//! The browser instance is scoped to a single fetch and released on every
//! exit path.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetTimezoneOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Browser;
use futures::StreamExt;
use serde_json::json;
use tracing::{error, info, warn};

use crate::core::types::{FetchMode, FetchResult};
use crate::core::AppConfig;
use crate::extract::{extract_best_content, OutputFormat};
use crate::fetch::{content_result, degrade_if_blocked, limit_content_length};
use crate::html::{looks_like_blocked, looks_like_challenge};
use crate::urls::resolve_browser_executable_path;

/// Find a usable chromium-family executable.
///
/// Resolution order: configured path (with the mac x64 → arm64 fallback),
/// `CHROME_EXECUTABLE`, a PATH scan, then platform well-known locations.
pub fn find_browser_executable(config: &AppConfig) -> Option<String> {
    if let Some(configured) = &config.browser.executable_path {
        if let Some(resolved) = resolve_browser_executable_path(configured) {
            return Some(resolved);
        }
    }

    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Headless flags: container-safe, telemetry off, consistent rendering.
fn build_browser_config(config: &AppConfig, exe: &str) -> Result<BrowserConfig> {
    let viewport = config.browser.viewport.unwrap_or(crate::core::config::ViewportSize {
        width: 1366,
        height: 768,
    });

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: viewport.width,
            height: viewport.height,
            device_scale_factor: Some(config.browser.device_scale_factor),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(viewport.width, viewport.height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-breakpad")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg(format!("--lang={}", config.browser.locale));

    if !config.browser.headless {
        builder = builder.with_head();
    }
    if let Some(proxy) = &config.proxy {
        builder = builder.arg(format!("--proxy-server={}", proxy));
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {}", e))
}

/// Stealth patches applied before any page script runs: hide webdriver,
/// fake plugins/languages, stub the chrome runtime object.
fn stealth_script() -> &'static str {
    r#"
(() => {
    try {
        Object.defineProperty(Navigator.prototype, 'webdriver', {
            get: () => undefined,
            configurable: true,
        });
        delete navigator.webdriver;
    } catch (e) {}
    try {
        Object.defineProperty(Navigator.prototype, 'languages', {
            get: () => ['zh-CN', 'zh', 'en'],
            configurable: true,
        });
        Object.defineProperty(Navigator.prototype, 'plugins', {
            get: () => [1, 2, 3, 4, 5],
            configurable: true,
        });
    } catch (e) {}
    if (!window.chrome) { window.chrome = {}; }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {
            connect: function() { return { onDisconnect: { addListener: function() {} } }; },
            sendMessage: function() {},
        };
    }
    const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (originalQuery) {
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
    }
})();
"#
}

/// Fetch `url` through the headless browser. Never panics or leaks the
/// browser; failures come back as an unsuccessful `FetchResult` with
/// `via_playwright` set.
pub async fn fetch_with_browser(
    config: &Arc<AppConfig>,
    url: &str,
    mode: FetchMode,
    headers: &[(String, String)],
) -> FetchResult {
    if !config.playwright_fallback {
        return FetchResult::failure(url, "Playwright fallback disabled");
    }
    match fetch_inner(config, url, mode, headers).await {
        Ok(result) => result,
        Err(e) => {
            let mut result = FetchResult::failure(url, e.to_string());
            result.via_playwright = true;
            result
        }
    }
}

async fn fetch_inner(
    config: &Arc<AppConfig>,
    url: &str,
    mode: FetchMode,
    headers: &[(String, String)],
) -> Result<FetchResult> {
    let exe = find_browser_executable(config).ok_or_else(|| {
        anyhow!("no browser executable found; install chromium or set CHROME_EXECUTABLE")
    })?;
    info!("headless browser fetch: {} (browser: {})", url, exe);

    // Caller headers override the context-level UA / Accept-Language.
    let mut user_agent = config.browser.user_agent.clone();
    let mut accept_language = config.browser.accept_language.clone();
    let mut extra_headers: Vec<(String, String)> = Vec::new();
    for (key, value) in headers {
        if key.eq_ignore_ascii_case("user-agent") {
            user_agent = value.clone();
        } else if key.eq_ignore_ascii_case("accept-language") {
            accept_language = value.clone();
        } else {
            extra_headers.push((key.clone(), value.clone()));
        }
    }

    let browser_config = build_browser_config(config, &exe)?;
    let (mut browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| anyhow!("failed to launch browser ({}): {}", exe, e))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                error!("CDP handler error: {}", e);
            }
        }
    });

    let result = drive_page(config, &browser, url, mode, &user_agent, &accept_language, &extra_headers).await;

    // Release on every exit path; a close error must not shadow the fetch.
    if let Err(e) = browser.close().await {
        warn!("browser close error (non-fatal): {}", e);
    }
    handler_task.abort();

    result
}

async fn drive_page(
    config: &Arc<AppConfig>,
    browser: &Browser,
    url: &str,
    mode: FetchMode,
    user_agent: &str,
    accept_language: &str,
    extra_headers: &[(String, String)],
) -> Result<FetchResult> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| anyhow!("failed to create page: {}", e))?;

    let ua_params = SetUserAgentOverrideParams::builder()
        .user_agent(user_agent)
        .accept_language(accept_language)
        .build()
        .map_err(|e| anyhow!("user-agent override: {}", e))?;
    page.execute(ua_params)
        .await
        .map_err(|e| anyhow!("user-agent override: {}", e))?;

    let tz_params = SetTimezoneOverrideParams::builder()
        .timezone_id(config.browser.timezone_id.clone())
        .build()
        .map_err(|e| anyhow!("timezone override: {}", e))?;
    page.execute(tz_params)
        .await
        .map_err(|e| anyhow!("timezone override: {}", e))?;

    if !extra_headers.is_empty() {
        let mut header_map = serde_json::Map::new();
        for (key, value) in extra_headers {
            header_map.insert(key.clone(), json!(value));
        }
        page.execute(NetworkEnableParams::default())
            .await
            .map_err(|e| anyhow!("network enable: {}", e))?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(json!(header_map))))
            .await
            .map_err(|e| anyhow!("extra headers: {}", e))?;
    }

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script()))
        .await
        .map_err(|e| anyhow!("stealth injection: {}", e))?;

    let nav_timeout = Duration::from_millis(config.playwright_timeout_ms);
    tokio::time::timeout(nav_timeout, page.goto(url))
        .await
        .map_err(|_| anyhow!("navigation timed out after {}ms", config.playwright_timeout_ms))?
        .map_err(|e| anyhow!("navigation failed: {}", e))?;

    // Best-effort settle, bounded at 5 s like a networkidle wait.
    let settle = Duration::from_millis(config.playwright_timeout_ms.min(5_000));
    let _ = tokio::time::timeout(settle, page.wait_for_navigation()).await;

    // Poll the title until it stops looking like a challenge interstitial.
    for _ in 0..config.playwright_challenge_wait.max(1) {
        match page.get_title().await {
            Ok(Some(title)) if !looks_like_challenge(&title) => break,
            Ok(None) => break,
            _ => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }

    let html = match page.content().await {
        Ok(html) => html,
        Err(_) => {
            // One more settle round before giving up on the DOM.
            tokio::time::sleep(Duration::from_secs(1)).await;
            page.content()
                .await
                .map_err(|e| anyhow!("failed to read page content: {}", e))?
        }
    };
    let blocked = looks_like_blocked(&html);

    let result = match mode {
        FetchMode::Html => {
            let (limited, truncated) = limit_content_length(&html, config);
            FetchResult {
                success: true,
                url: url.to_string(),
                via_playwright: true,
                html: Some(limited),
                truncated,
                blocked,
                ..Default::default()
            }
        }
        FetchMode::Markdown | FetchMode::Text => {
            let output = match mode {
                FetchMode::Markdown => OutputFormat::Markdown,
                _ => OutputFormat::Text,
            };
            let extracted = extract_best_content(&html, url, output, config);
            let extracted = degrade_if_blocked(extracted, &html, mode, blocked);
            let mut result = content_result(url, mode, &extracted, config);
            result.via_playwright = true;
            result.blocked = blocked;
            result
        }
        FetchMode::Meta => {
            let (metadata, truncated) = crate::html::extract_metadata(&html, config);
            FetchResult {
                success: true,
                url: url.to_string(),
                via_playwright: true,
                metadata: Some(metadata),
                truncated,
                blocked,
                ..Default::default()
            }
        }
    };
    Ok(result)
}
