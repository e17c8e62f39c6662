//! Runtime configuration and logging bootstrap.
//!
//! Config is resolved once at startup (CLI flags → environment → defaults)
//! and stored as a process-wide immutable snapshot. Invalid values never
//! abort startup; they fall back to the default and emit a `[config] …`
//! diagnostic on stderr.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";

static RUNTIME: RwLock<Option<Arc<AppConfig>>> = RwLock::new(None);
static LOG_HANDLERS: AtomicUsize = AtomicUsize::new(0);

/// Returned when config is read before `init_runtime()` ran.
#[derive(Debug, thiserror::Error)]
#[error("runtime config is not initialized; call init_runtime() first")]
pub struct RuntimeUninitialized;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Quality,
    Balanced,
    Speed,
}

impl ExtractionStrategy {
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quality" => Some(ExtractionStrategy::Quality),
            "balanced" => Some(ExtractionStrategy::Balanced),
            "speed" => Some(ExtractionStrategy::Speed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Quality => "quality",
            ExtractionStrategy::Balanced => "balanced",
            ExtractionStrategy::Speed => "speed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExtractionSettings {
    pub strategy: ExtractionStrategy,
    pub markdown_min_chars: usize,
    pub text_min_chars: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Headless-browser settings. Env names keep the historical `PLAYWRIGHT_*`
/// / `PW_*` spelling; the engine behind them is CDP-native chromium.
#[derive(Clone, Debug)]
pub struct BrowserSettings {
    pub headless: bool,
    pub user_agent: String,
    pub accept_language: String,
    pub locale: String,
    pub timezone_id: String,
    pub viewport: Option<ViewportSize>,
    pub device_scale_factor: f64,
    pub executable_path: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub proxy: Option<String>,
    pub cf_worker_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: String,
    pub user_agent: String,
    pub impersonate: String,
    pub http_version: String,
    pub max_token_limit: usize,
    pub fetch_timeout_s: u64,
    pub search_timeout_s: u64,
    pub search_result_limit: usize,
    pub search_max_per_domain: usize,
    pub playwright_fallback: bool,
    pub playwright_timeout_ms: u64,
    pub playwright_challenge_wait: u32,
    pub browser: BrowserSettings,
    pub extraction: ExtractionSettings,
    pub log_level: String,
}

impl AppConfig {
    pub fn llm_configured(&self) -> bool {
        self.openai_api_key.is_some() && self.openai_base_url.is_some()
    }

    /// Character budget derived from the token cap (≈ 4 chars per token).
    pub fn char_budget(&self) -> usize {
        self.max_token_limit.saturating_mul(4)
    }
}

// ── Env source abstraction (tests feed maps, prod uses the process env) ─────

pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

// ── CLI flags ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct CliOverrides {
    proxy: Option<String>,
    cf_worker: Option<String>,
    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    openai_model: Option<String>,
    log_level: Option<String>,
}

/// Parse the supported flags from argv; unknown flags are ignored.
/// Both `--flag value` and `--flag=value` forms are accepted.
fn parse_cli(argv: &[String]) -> CliOverrides {
    let mut out = CliOverrides::default();
    let mut i = 0;
    while i < argv.len() {
        let (flag, inline) = match argv[i].split_once('=') {
            Some((f, v)) => (f.to_string(), Some(v.to_string())),
            None => (argv[i].clone(), None),
        };
        let slot = match flag.as_str() {
            "--proxy" => Some(&mut out.proxy),
            "--cf-worker" => Some(&mut out.cf_worker),
            "--openai-api-key" => Some(&mut out.openai_api_key),
            "--openai-base-url" => Some(&mut out.openai_base_url),
            "--openai-model" => Some(&mut out.openai_model),
            "--log-level" => Some(&mut out.log_level),
            _ => None,
        };
        if let Some(slot) = slot {
            if let Some(v) = inline {
                *slot = Some(v);
            } else if i + 1 < argv.len() && !argv[i + 1].starts_with("--") {
                *slot = Some(argv[i + 1].clone());
                i += 1;
            }
        }
        i += 1;
    }
    out
}

// ── Parse helpers ───────────────────────────────────────────────────────────

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

fn parse_int(
    value: Option<String>,
    default: usize,
    minimum: Option<usize>,
    field_name: &str,
    warnings: &mut Vec<String>,
) -> usize {
    let Some(raw) = value else {
        return default;
    };
    let parsed = match raw.trim().parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            warnings.push(format!(
                "[config] invalid integer for {}: '{}', fallback to {}",
                field_name, raw, default
            ));
            return default;
        }
    };
    if parsed < 0 || minimum.map(|m| (parsed as usize) < m).unwrap_or(false) {
        warnings.push(format!(
            "[config] {}={} is below minimum {}, fallback to {}",
            field_name,
            parsed,
            minimum.unwrap_or(0),
            default
        ));
        return default;
    }
    parsed as usize
}

fn parse_bool(
    value: Option<String>,
    default: bool,
    field_name: &str,
    warnings: &mut Vec<String>,
) -> bool {
    let Some(raw) = value else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warnings.push(format!(
                "[config] invalid boolean for {}: '{}', fallback to {}",
                field_name, raw, default
            ));
            default
        }
    }
}

fn parse_strategy(value: Option<String>, warnings: &mut Vec<String>) -> ExtractionStrategy {
    let Some(raw) = value else {
        return ExtractionStrategy::Quality;
    };
    match ExtractionStrategy::parse_str(&raw) {
        Some(s) => s,
        None => {
            warnings.push(format!(
                "[config] invalid value for EXTRACTION_STRATEGY: '{}', expected balanced/quality/speed, fallback to quality",
                raw
            ));
            ExtractionStrategy::Quality
        }
    }
}

fn parse_log_level(value: Option<String>, warnings: &mut Vec<String>) -> String {
    let Some(raw) = normalize_optional(value) else {
        return "INFO".to_string();
    };
    let upper = raw.to_ascii_uppercase();
    match upper.as_str() {
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "WARNING" | "ERROR" => upper,
        _ => {
            warnings.push(format!(
                "[config] invalid LOG_LEVEL '{}', fallback to INFO",
                raw
            ));
            "INFO".to_string()
        }
    }
}

/// `1366x768` or `1366,768` → viewport; anything else → `None`.
fn parse_viewport(raw: Option<String>) -> Option<ViewportSize> {
    let text = raw?.to_ascii_lowercase().replace(' ', "");
    let (w, h) = text.split_once('x').or_else(|| text.split_once(','))?;
    Some(ViewportSize {
        width: w.parse().ok()?,
        height: h.parse().ok()?,
    })
}

// ── Config construction ─────────────────────────────────────────────────────

pub struct ConfigOutcome {
    pub config: AppConfig,
    pub warnings: Vec<String>,
}

/// Build an `AppConfig` from argv and an environment source. Pure: no
/// globals are touched, diagnostics come back as `warnings`.
pub fn build_config(argv: &[String], env: &dyn EnvSource) -> ConfigOutcome {
    let cli = parse_cli(argv);
    let mut warnings = Vec::new();

    let pick = |cli_value: &Option<String>, key: &str| -> Option<String> {
        normalize_optional(cli_value.clone().or_else(|| env.get(key)))
    };

    let proxy = pick(&cli.proxy, "PROXY");
    let cf_worker_url = pick(&cli.cf_worker, "CF_WORKER");
    let openai_api_key = pick(&cli.openai_api_key, "OPENAI_API_KEY");
    let openai_base_url = pick(&cli.openai_base_url, "OPENAI_BASE_URL");
    let openai_model = pick(&cli.openai_model, "OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".into());
    let log_level = parse_log_level(cli.log_level.clone().or_else(|| env.get("LOG_LEVEL")), &mut warnings);

    let user_agent =
        normalize_optional(env.get("USER_AGENT")).unwrap_or_else(|| DEFAULT_USER_AGENT.into());
    let impersonate =
        normalize_optional(env.get("CURL_IMPERSONATE")).unwrap_or_else(|| "chrome110".into());
    let http_version =
        normalize_optional(env.get("HTTP_VERSION")).unwrap_or_else(|| "v1".into());

    let max_token_limit = parse_int(env.get("MAX_TOKEN_LIMIT"), 10_000, Some(1), "MAX_TOKEN_LIMIT", &mut warnings);
    let fetch_timeout_s = parse_int(env.get("FETCH_TIMEOUT_S"), 15, Some(1), "FETCH_TIMEOUT_S", &mut warnings);
    let search_timeout_s = parse_int(env.get("SEARCH_TIMEOUT_S"), 60, Some(1), "SEARCH_TIMEOUT_S", &mut warnings);
    let search_result_limit = parse_int(env.get("SEARCH_RESULT_LIMIT"), 25, Some(1), "SEARCH_RESULT_LIMIT", &mut warnings);
    let search_max_per_domain = parse_int(env.get("SEARCH_MAX_PER_DOMAIN"), 2, Some(0), "SEARCH_MAX_PER_DOMAIN", &mut warnings);

    let playwright_fallback = parse_bool(env.get("PLAYWRIGHT_FALLBACK"), true, "PLAYWRIGHT_FALLBACK", &mut warnings);
    let playwright_timeout_ms = parse_int(env.get("PLAYWRIGHT_TIMEOUT_MS"), 60_000, Some(1), "PLAYWRIGHT_TIMEOUT_MS", &mut warnings);
    let playwright_challenge_wait = parse_int(env.get("PLAYWRIGHT_CHALLENGE_WAIT"), 20, Some(1), "PLAYWRIGHT_CHALLENGE_WAIT", &mut warnings);

    // Older EXTRACTION_* tuning knobs are intentionally not read; the tuning
    // table is internal and keyed off the strategy alone.
    let extraction = ExtractionSettings {
        strategy: parse_strategy(env.get("EXTRACTION_STRATEGY"), &mut warnings),
        markdown_min_chars: parse_int(env.get("EXTRACTION_MARKDOWN_MIN_CHARS"), 120, Some(1), "EXTRACTION_MARKDOWN_MIN_CHARS", &mut warnings),
        text_min_chars: parse_int(env.get("EXTRACTION_TEXT_MIN_CHARS"), 200, Some(1), "EXTRACTION_TEXT_MIN_CHARS", &mut warnings),
    };

    let pw_executable = normalize_optional(env.get("PW_CHROMIUM_EXECUTABLE_PATH"))
        .or_else(|| normalize_optional(env.get("PW_EXECUTABLE_PATH")))
        .or_else(|| normalize_optional(env.get("PLAYWRIGHT_EXECUTABLE_PATH")));
    let device_scale_factor = normalize_optional(env.get("PW_DEVICE_SCALE"))
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(2.0);

    let browser = BrowserSettings {
        headless: parse_bool(env.get("PW_HEADLESS"), true, "PW_HEADLESS", &mut warnings),
        user_agent: normalize_optional(env.get("PW_USER_AGENT")).unwrap_or_else(|| user_agent.clone()),
        accept_language: normalize_optional(env.get("PW_ACCEPT_LANGUAGE"))
            .unwrap_or_else(|| DEFAULT_ACCEPT_LANGUAGE.into()),
        locale: normalize_optional(env.get("PW_LOCALE")).unwrap_or_else(|| "zh-CN".into()),
        timezone_id: normalize_optional(env.get("PW_TIMEZONE")).unwrap_or_else(|| "Asia/Shanghai".into()),
        viewport: parse_viewport(env.get("PW_VIEWPORT").or_else(|| Some("1366x768".into()))),
        device_scale_factor,
        executable_path: pw_executable,
    };

    let config = AppConfig {
        proxy,
        cf_worker_url,
        openai_api_key,
        openai_base_url,
        openai_model,
        user_agent,
        impersonate,
        http_version,
        max_token_limit,
        fetch_timeout_s: fetch_timeout_s as u64,
        search_timeout_s: search_timeout_s as u64,
        search_result_limit,
        search_max_per_domain,
        playwright_fallback,
        playwright_timeout_ms: playwright_timeout_ms as u64,
        playwright_challenge_wait: playwright_challenge_wait as u32,
        browser,
        extraction,
        log_level,
    };

    ConfigOutcome { config, warnings }
}

// ── Runtime singleton ───────────────────────────────────────────────────────

/// Load the `.env` file, build the runtime config from the process
/// environment, bootstrap logging, and publish the config snapshot.
pub fn init_runtime(argv: &[String]) -> Arc<AppConfig> {
    super::env_file::load_default_env_file();

    let outcome = build_config(argv, &ProcessEnv);
    for warning in &outcome.warnings {
        eprintln!("{}", warning);
    }

    setup_logging(&outcome.config.log_level);

    let cfg = Arc::new(outcome.config);
    if let Ok(mut slot) = RUNTIME.write() {
        *slot = Some(Arc::clone(&cfg));
    }
    cfg
}

/// Return the runtime config; fails before `init_runtime()`.
pub fn config() -> Result<Arc<AppConfig>, RuntimeUninitialized> {
    RUNTIME
        .read()
        .ok()
        .and_then(|slot| slot.clone())
        .ok_or(RuntimeUninitialized)
}

/// Install the tracing subscriber exactly once, writing to stderr (stdout
/// carries the JSON-RPC protocol). Repeated calls are no-ops.
pub fn setup_logging(level_name: &str) {
    let directive = match level_name.to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    if tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .is_ok()
    {
        LOG_HANDLERS.fetch_add(1, Ordering::SeqCst);
    }
}

/// Number of tracing subscribers this process installed. At most 1.
pub fn installed_log_handlers() -> usize {
    LOG_HANDLERS.load(Ordering::SeqCst)
}

/// Test-only hook: drop the published config and the noise-rule cache so
/// tests can re-initialize from a clean slate.
#[doc(hidden)]
pub fn reset_runtime_for_tests() {
    if let Ok(mut slot) = RUNTIME.write() {
        *slot = None;
    }
    crate::extract::noise::reset_rules_cache();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn cli_overrides_env() {
        let env = env(&[
            ("PROXY", "http://env:7890"),
            ("OPENAI_BASE_URL", "https://env.example/v1"),
        ]);
        let argv: Vec<String> = [
            "--proxy",
            "http://cli:7890",
            "--openai-base-url",
            "https://cli.example/v1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let outcome = build_config(&argv, &env);
        assert_eq!(outcome.config.proxy.as_deref(), Some("http://cli:7890"));
        assert_eq!(
            outcome.config.openai_base_url.as_deref(),
            Some("https://cli.example/v1")
        );
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let argv: Vec<String> = ["--frobnicate", "yes", "--proxy=http://cli:1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let outcome = build_config(&argv, &env(&[]));
        assert_eq!(outcome.config.proxy.as_deref(), Some("http://cli:1"));
    }

    #[test]
    fn blank_env_values_are_unset() {
        let outcome = build_config(&[], &env(&[("PROXY", "   "), ("CF_WORKER", "")]));
        assert!(outcome.config.proxy.is_none());
        assert!(outcome.config.cf_worker_url.is_none());
        assert!(!outcome.config.llm_configured());
    }

    #[test]
    fn viewport_accepts_both_separators() {
        assert_eq!(
            parse_viewport(Some("1366x768".into())),
            Some(ViewportSize { width: 1366, height: 768 })
        );
        assert_eq!(
            parse_viewport(Some("1280, 720".into())),
            Some(ViewportSize { width: 1280, height: 720 })
        );
        assert_eq!(parse_viewport(Some("wide".into())), None);
    }

    #[test]
    fn invalid_integer_falls_back_with_warning() {
        let outcome = build_config(
            &[],
            &env(&[
                ("PLAYWRIGHT_TIMEOUT_MS", "invalid"),
                ("PLAYWRIGHT_CHALLENGE_WAIT", "-1"),
            ]),
        );
        assert_eq!(outcome.config.playwright_timeout_ms, 60_000);
        assert_eq!(outcome.config.playwright_challenge_wait, 20);
        assert!(outcome.warnings.iter().any(|w| w.contains("invalid integer")));
    }
}
