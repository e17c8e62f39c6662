//! OpenAI-compatible chat-completions client for the research bridge.
//!
//! The endpoint may answer either as a single JSON document or as an SSE
//! stream; both are consumed into `(content, reasoning)`. The SSE consumer
//! is restartable across chunk boundaries and returns whatever accumulated
//! when the stream dies mid-flight.

pub mod parse;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::warn;

use crate::core::AppConfig;

/// The research prompt: prose without URLs, then a `SOURCES:` block.
pub fn research_prompt(query: &str) -> String {
    format!(
        "你是一个研究型搜索助手。请通过联网检索与交叉验证，给出高质量、细节充分的回答，避免编造。\n\
         输出要求：\n\
         1) 正文：自然语言写作，不要输出任何 URL/链接（包括 http/https/www 开头内容），也不要出现“参考来源/References/Sources”等段落标题。\n\
         2) 末尾追加一段 SOURCES（必须以单独一行 'SOURCES:' 开头），其后每行一个你参考过的来源 URL（最多 30 条）。\n\
         用户问题：{}",
        query
    )
}

/// Seam for the LLM call so the orchestrator can be driven by scripted
/// backends in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns `(content, reasoning)`.
    async fn complete(&self, prompt: &str) -> anyhow::Result<(String, String)>;
}

// ── SSE accumulation ────────────────────────────────────────────────────────

/// Incremental SSE consumer. Chunks may split lines arbitrarily; a pending
/// buffer carries the partial tail between pushes.
#[derive(Default)]
pub struct SseAccumulator {
    pending: String,
    content_parts: Vec<String>,
    reasoning_parts: Vec<String>,
    done: bool,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn has_output(&self) -> bool {
        !self.content_parts.is_empty() || !self.reasoning_parts.is_empty()
    }

    pub fn push_chunk(&mut self, chunk: &str) {
        self.pending.push_str(chunk);
        while let Some(newline) = self.pending.find('\n') {
            let line = self.pending[..newline].trim_end_matches('\r').to_string();
            self.pending.drain(..=newline);
            self.consume_line(&line);
            if self.done {
                break;
            }
        }
    }

    fn consume_line(&mut self, raw_line: &str) {
        let line = raw_line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            return;
        };
        let Some(choices) = event.get("choices").and_then(Value::as_array) else {
            return;
        };
        for choice in choices {
            let Some(delta) = choice.get("delta").and_then(Value::as_object) else {
                continue;
            };
            if let Some(piece) = delta.get("content").and_then(Value::as_str) {
                if !piece.is_empty() {
                    self.content_parts.push(piece.to_string());
                }
            }
            let reasoning = ["reasoning_content", "reasoning", "analysis", "thinking"]
                .iter()
                .find_map(|key| delta.get(*key).and_then(Value::as_str))
                .filter(|s| !s.is_empty());
            if let Some(piece) = reasoning {
                self.reasoning_parts.push(piece.to_string());
            }
        }
    }

    /// Flush the trailing unterminated line and return the accumulation.
    pub fn finish(mut self) -> (String, String) {
        if !self.pending.is_empty() && !self.done {
            let tail = self.pending.trim_end_matches('\r').to_string();
            self.consume_line(&tail);
        }
        (self.content_parts.concat(), self.reasoning_parts.concat())
    }
}

fn join_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::Object(obj) => obj
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Non-streamed response body → `(content, reasoning)`. Unparseable bodies
/// come back as raw content with empty reasoning.
pub fn parse_chat_completion_json(text: &str) -> (String, String) {
    let Ok(data) = serde_json::from_str::<Value>(text) else {
        return (text.to_string(), String::new());
    };
    let message = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"));
    let Some(message) = message else {
        return (String::new(), String::new());
    };

    let content = message.get("content").map(join_value_text).unwrap_or_default();
    let reasoning = ["reasoning_content", "reasoning", "analysis"]
        .iter()
        .find_map(|key| {
            message
                .get(*key)
                .filter(|v| !v.is_null())
                .map(join_value_text)
        })
        .unwrap_or_default();
    (content, reasoning)
}

// ── reqwest-backed backend ──────────────────────────────────────────────────

pub struct OpenAiChatBackend {
    client: reqwest::Client,
    config: Arc<AppConfig>,
}

impl OpenAiChatBackend {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        Ok(OpenAiChatBackend {
            client: crate::net::build_client(&config)?,
            config,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatBackend {
    async fn complete(&self, prompt: &str) -> anyhow::Result<(String, String)> {
        let (Some(api_key), Some(base_url)) =
            (&self.config.openai_api_key, &self.config.openai_base_url)
        else {
            anyhow::bail!("llm_not_configured");
        };

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.config.openai_model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(&payload)
            .timeout(std::time::Duration::from_secs(self.config.search_timeout_s))
            .send()
            .await?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.contains("text/event-stream") {
            let mut accumulator = SseAccumulator::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        accumulator.push_chunk(&String::from_utf8_lossy(&bytes));
                        if accumulator.is_done() {
                            break;
                        }
                    }
                    Err(e) => {
                        if accumulator.has_output() {
                            warn!("AI SSE stream interrupted, returning partial: {}", e);
                            break;
                        }
                        return Err(e.into());
                    }
                }
            }
            return Ok(accumulator.finish());
        }

        let body = response.text().await?;
        Ok(parse_chat_completion_json(&body))
    }
}
