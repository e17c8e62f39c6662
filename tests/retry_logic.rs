//! Retry policy over scripted transports: retryable failures are retried
//! with the shared backoff, everything else surfaces immediately.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pagescout::net::{HttpClient, HttpTransport, RawResponse, TransportError};
use pagescout::search::engines::{ScrapedSearchService, SearchService};

struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(responses: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(
        &self,
        _url: &str,
        _headers: &[(String, String)],
        _timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("script exhausted")))
    }
}

fn test_config() -> Arc<pagescout::AppConfig> {
    let env: HashMap<String, String> = HashMap::new();
    Arc::new(pagescout::core::config::build_config(&[], &env).config)
}

fn ok(body: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
        status: 200,
        body: body.to_string(),
    })
}

#[tokio::test]
async fn retries_on_chunked_stream_read_failure() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::new(
            "Failed to perform, curl: (23) Failed reading the chunked-encoded stream.",
        )),
        ok("<html>ok</html>"),
    ]);
    let client = HttpClient::with_transport(test_config(), transport.clone());

    let response = client
        .get("https://example.com", &[], Some(1), 2)
        .await
        .expect("second attempt succeeds");
    assert_eq!(response.body, "<html>ok</html>");
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn does_not_retry_non_retryable_errors() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::new(
        "Failed to perform, curl: (6) Could not resolve host: example.com",
    ))]);
    let client = HttpClient::with_transport(test_config(), transport.clone());

    let err = client
        .get("https://example.com", &[], Some(1), 3)
        .await
        .expect_err("must surface immediately");
    assert!(err.message.contains("Could not resolve host"));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn timeout_style_errors_retry_until_attempts_are_spent() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::new("curl: (28) Operation timed out after 1000 ms")),
        Err(TransportError::new("curl: (28) Operation timed out after 2000 ms")),
        Err(TransportError::new("curl: (28) Operation timed out after 4000 ms")),
    ]);
    let client = HttpClient::with_transport(test_config(), transport.clone());

    let err = client
        .get("https://example.com", &[], Some(1), 3)
        .await
        .expect_err("all attempts fail");
    assert!(err.message.contains("Operation timed out"));
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn status_errors_are_not_retried() {
    let transport = ScriptedTransport::new(vec![Err(TransportError {
        message: "HTTP status 403 for https://example.com".to_string(),
        status: Some(403),
    })]);
    let client = HttpClient::with_transport(test_config(), transport.clone());

    let err = client
        .get("https://example.com", &[], Some(1), 2)
        .await
        .expect_err("403 surfaces");
    assert_eq!(err.status, Some(403));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn ddg_search_uses_the_shared_retry_helper() {
    let html = r#"<html><body>
      <div class="results">
        <div class="result">
          <a class="result__a" href="https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc">Example</a>
          <a class="result__snippet">Snippet</a>
        </div>
      </div>
    </body></html>"#;
    let transport = ScriptedTransport::new(vec![ok(html)]);
    let client = HttpClient::with_transport(test_config(), transport.clone());
    let service = ScrapedSearchService::new(client);

    let results = service
        .search_duckduckgo("test query", 1)
        .await
        .expect("parse succeeds");
    assert_eq!(transport.call_count(), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://example.com/a?b=c");
}
