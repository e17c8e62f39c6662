//! Stdio JSON-RPC (MCP) server exposing `web_search` and `fetch`.
//!
//! One JSON-RPC message per line on stdin, one response line per request on
//! stdout; logging goes to stderr so the protocol stream stays clean.

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::ai::OpenAiChatBackend;
use crate::core::types::FetchMode;
use crate::core::AppConfig;
use crate::fetch::PageFetcher;
use crate::net::HttpClient;
use crate::search::engines::ScrapedSearchService;
use crate::search::{web_search, SearchContext};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// The search query. Append `site:<host>` to focus on one site.
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchArgs {
    /// Absolute http(s) URL to fetch.
    pub url: String,
    /// Extra request headers; `User-Agent` and `Accept-Language` override
    /// the defaults.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

pub struct McpService {
    fetcher: PageFetcher,
    search_ctx: SearchContext,
}

impl McpService {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let http = HttpClient::new(Arc::clone(&config))?;
        let chat: Option<Arc<dyn crate::ai::ChatBackend>> = if config.llm_configured() {
            Some(Arc::new(OpenAiChatBackend::new(Arc::clone(&config))?))
        } else {
            None
        };
        let search_ctx = SearchContext {
            config: Arc::clone(&config),
            search: Arc::new(ScrapedSearchService::new(http.clone())),
            chat,
        };
        Ok(McpService {
            fetcher: PageFetcher::with_http(http),
            search_ctx,
        })
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, String> {
        match name {
            "web_search" => {
                let args: WebSearchArgs = serde_json::from_value(arguments.clone())
                    .map_err(|e| format!("invalid web_search arguments: {}", e))?;
                let outcome = web_search(&self.search_ctx, &args.query).await;
                serde_json::to_value(outcome).map_err(|e| e.to_string())
            }
            "fetch" => {
                let args: FetchArgs = serde_json::from_value(arguments.clone())
                    .map_err(|e| format!("invalid fetch arguments: {}", e))?;
                let headers: Vec<(String, String)> = args
                    .headers
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                let result = self
                    .fetcher
                    .fetch(&args.url, FetchMode::Markdown, &headers)
                    .await;
                serde_json::to_value(result).map_err(|e| e.to_string())
            }
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "web_search",
                "description": "Hybrid web search: AI research and scraped search engines in parallel, merged into a deduplicated, domain-capped link list with an optional AI summary.",
                "inputSchema": schema_value::<WebSearchArgs>(),
            },
            {
                "name": "fetch",
                "description": "Fetch a single page as cleaned Markdown with anti-bot evasion, site adapters, quality scoring, and a headless-browser fallback.",
                "inputSchema": schema_value::<FetchArgs>(),
            },
        ]
    })
}

fn jsonrpc_error(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

fn jsonrpc_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

async fn handle_tools_call(service: &McpService, id: &Value, params: &Value) -> Value {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return jsonrpc_error(id, -32602, "Missing required field: params.name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match service.call_tool(name, &arguments).await {
        Ok(payload) => {
            let text = serde_json::to_string(&payload).unwrap_or_default();
            jsonrpc_result(
                id,
                json!({
                    "content": [{"type": "text", "text": text}],
                    "isError": false
                }),
            )
        }
        Err(message) => {
            let code = if message.starts_with("Unknown tool") { -32601 } else { -32602 };
            jsonrpc_error(id, code, message)
        }
    }
}

/// Run the stdio server until EOF or shutdown+exit.
pub async fn run(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let service = McpService::new(config)?;
    info!("MCP stdio server initialized; waiting for client session");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    let mut has_initialize = false;
    let mut is_initialized = false;
    let mut shutdown_requested = false;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };

        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let is_request = message.get("id").is_some();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        if !is_request {
            match method {
                // Some clients omit params entirely; accept both spellings.
                "initialized" | "notifications/initialized" => {
                    has_initialize = true;
                    is_initialized = true;
                }
                "exit" => {
                    if shutdown_requested {
                        break;
                    }
                }
                _ => {}
            }
            continue;
        }

        let response = match method {
            "initialize" => {
                has_initialize = true;
                jsonrpc_result(
                    &id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {
                            "name": "pagescout",
                            "title": "Web Research MCP",
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    }),
                )
            }
            "shutdown" => {
                shutdown_requested = true;
                jsonrpc_result(&id, Value::Null)
            }
            "tools/list" => {
                if !has_initialize || !is_initialized {
                    jsonrpc_error(&id, -32002, "Server not initialized")
                } else {
                    jsonrpc_result(&id, tool_list())
                }
            }
            "tools/call" => {
                if !has_initialize || !is_initialized {
                    jsonrpc_error(&id, -32002, "Server not initialized")
                } else {
                    handle_tools_call(&service, &id, &params).await
                }
            }
            _ => jsonrpc_error(&id, -32601, format!("Method not found: {}", method)),
        };

        let out = serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{{\"code\":-32603,\"message\":\"serialize error: {}\"}}}}",
                e
            )
        });
        stdout.write_all(out.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    warn!("MCP stdio server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_list_describes_both_tools() {
        let tools = tool_list();
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["web_search", "fetch"]);
        assert!(tools["tools"][0]["inputSchema"]["properties"]["query"].is_object());
    }

    #[test]
    fn jsonrpc_shapes_round_trip() {
        let err = jsonrpc_error(&json!(1), -32601, "nope");
        assert_eq!(err["error"]["code"], -32601);
        let ok = jsonrpc_result(&json!(2), json!({"x": 1}));
        assert_eq!(ok["result"]["x"], 1);
    }
}
