//! Impersonated HTTP client with Worker rewriting and retry classification.
//!
//! The wire is hidden behind [`HttpTransport`] so the retry policy can be
//! exercised against scripted transports in tests; production uses a
//! `reqwest` client configured from [`AppConfig`].

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, warn};

use crate::core::AppConfig;

/// Everything except unreserved characters and `/` is escaped in the
/// Worker's `url` parameter.
const WORKER_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Transport-level failure. Status ≥ 400 responses surface through the same
/// type as connect/read errors; the classifier decides what is retryable
/// from the message text alone.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            status: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}

const RETRYABLE_CODES: &[u32] = &[18, 23, 28];
const RETRYABLE_HINTS: &[&str] = &[
    "Failed reading the chunked-encoded stream",
    "Operation timed out",
    "transfer closed with",
];

fn curl_code_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"curl:\s*\((\d+)\)").unwrap())
}

/// Parse a curl-style numeric code out of an error message and decide
/// whether the failure is worth another attempt.
pub fn classify_transport_error(message: &str) -> (Option<u32>, bool) {
    let code = curl_code_re()
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    let retryable = code.map(|c| RETRYABLE_CODES.contains(&c)).unwrap_or(false)
        || RETRYABLE_HINTS.iter().any(|hint| message.contains(hint));
    (code, retryable)
}

/// Route a URL through the configured Worker: the original URL only ever
/// appears percent-encoded in the `url` query parameter.
pub fn target_url(config: &AppConfig, original_url: &str) -> String {
    match &config.cf_worker_url {
        Some(worker) => format!(
            "{}?url={}",
            worker.trim_end_matches('/'),
            utf8_percent_encode(original_url, WORKER_ENCODE_SET)
        ),
        None => original_url.to_string(),
    }
}

/// Fixed header set sent with every request; caller headers override per key.
pub fn default_headers(config: &AppConfig) -> Vec<(String, String)> {
    let mut headers = vec![
        ("User-Agent".to_string(), config.user_agent.clone()),
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        (
            "Accept-Language".to_string(),
            "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        ),
        ("Accept-Encoding".to_string(), "gzip, deflate, br".to_string()),
        ("Connection".to_string(), "close".to_string()),
    ];
    headers.extend(impersonation_headers(&config.impersonate));
    headers
}

/// Client-hint headers matching the impersonation profile, so the header
/// fingerprint is consistent with the claimed browser.
fn impersonation_headers(profile: &str) -> Vec<(String, String)> {
    let p = profile.trim().to_ascii_lowercase();
    let (sec_ch_ua, platform) = if p.starts_with("chrome120") {
        (
            r#""Chromium";v="120", "Not_A Brand";v="8", "Google Chrome";v="120""#,
            "\"macOS\"",
        )
    } else if p.starts_with("safari") {
        // Safari sends no client hints.
        return Vec::new();
    } else {
        // chrome110 and any unrecognized profile.
        (
            r#""Chromium";v="110", "Not A(Brand";v="24", "Google Chrome";v="110""#,
            "\"macOS\"",
        )
    };
    vec![
        ("sec-ch-ua".to_string(), sec_ch_ua.to_string()),
        ("sec-ch-ua-mobile".to_string(), "?0".to_string()),
        ("sec-ch-ua-platform".to_string(), platform.to_string()),
    ]
}

fn merge_headers(
    defaults: Vec<(String, String)>,
    overrides: &[(String, String)],
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .into_iter()
        .filter(|(k, _)| {
            !overrides
                .iter()
                .any(|(ok, _)| ok.eq_ignore_ascii_case(k))
        })
        .collect();
    merged.extend(overrides.iter().cloned());
    merged
}

// ── reqwest-backed transport ────────────────────────────────────────────────

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(ReqwestTransport {
            client: build_client(config)?,
        })
    }
}

/// Build a `reqwest::Client` honoring proxy and HTTP-version preference.
pub fn build_client(config: &AppConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10));
    if config.http_version == "v1" {
        builder = builder.http1_only();
    }
    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    Ok(builder.build()?)
}

/// Normalize a reqwest failure into a curl-style message so the shared
/// classifier applies uniformly.
fn reqwest_error_to_transport(e: &reqwest::Error) -> TransportError {
    let code = if e.is_timeout() {
        28
    } else if e.is_connect() {
        7
    } else if e.is_body() || e.is_decode() {
        23
    } else {
        56
    };
    let detail = if e.is_timeout() {
        format!("Operation timed out: {}", e)
    } else {
        e.to_string()
    };
    TransportError::new(format!("curl: ({}) {}", code, detail))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| reqwest_error_to_transport(&e))?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(TransportError {
                message: format!("HTTP status {} for {}", status, url),
                status: Some(status),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| reqwest_error_to_transport(&e))?;
        Ok(RawResponse { status, body })
    }
}

// ── Retry-equipped client ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn HttpTransport>,
    config: Arc<AppConfig>,
}

impl HttpClient {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(HttpClient { transport, config })
    }

    /// Test seam: run the retry policy over a scripted transport.
    pub fn with_transport(config: Arc<AppConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        HttpClient { transport, config }
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// GET with the default header set (caller headers override per key) and
    /// the shared retry policy: at most `max(1, retries)` attempts, doubling
    /// the effective timeout (or +10 s, whichever is larger) between tries,
    /// sleeping `0.3 × attempt` seconds before each retry.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout_s: Option<u64>,
        retries: u32,
    ) -> Result<RawResponse, TransportError> {
        let merged = merge_headers(default_headers(&self.config), headers);
        let mut effective_timeout_s = timeout_s.unwrap_or(self.config.fetch_timeout_s).max(1);
        let max_attempts = retries.max(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .transport
                .get(url, &merged, Duration::from_secs(effective_timeout_s))
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let (code, retryable) = classify_transport_error(&e.message);
                    let mut message = e.message.replace('\n', " ").trim().to_string();
                    if message.len() > 240 {
                        message.truncate(237);
                        message.push_str("...");
                    }

                    if !retryable || attempt >= max_attempts {
                        debug!(
                            "HTTP FAIL attempt={}/{} url={} timeout_s={} code={:?} err={}",
                            attempt, max_attempts, url, effective_timeout_s, code, message
                        );
                        return Err(e);
                    }

                    let next_timeout_s =
                        (effective_timeout_s * 2).max(effective_timeout_s + 10);
                    warn!(
                        "HTTP RETRY attempt={}/{} url={} timeout_s={} next_timeout_s={} code={:?} err={}",
                        attempt, max_attempts, url, effective_timeout_s, next_timeout_s, code, message
                    );
                    effective_timeout_s = next_timeout_s;
                    tokio::time::sleep(Duration::from_millis(300 * attempt as u64)).await;
                }
            }
        }
    }
}
