use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let config = pagescout::init_runtime(&argv);

    info!("pagescout MCP server starting...");
    if let Some(worker) = &config.cf_worker_url {
        info!("Cloudflare Worker enabled: {}", worker);
    }
    if let Some(proxy) = &config.proxy {
        info!("proxy enabled: {}", proxy);
    }
    if config.llm_configured() {
        info!("AI search enabled, model={}", config.openai_model);
    }
    info!("waiting for MCP client connection...");

    pagescout::mcp::run(config).await
}
