//! OData MCP Server
//!
//! Entry point for the MCP server binary.
//! Implements MCP protocol over stdio using JSON-RPC 2.0.

use anyhow::Context;
use futures::StreamExt;
use odata_mcp::config::Config;
use odata_mcp::mcp::{JsonRpcRequest, JsonRpcResponse, ODataMcpServer, PARSE_ERROR};
use odata_mcp::odata::ODataClient;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    // Logging goes to stderr, stdout carries the protocol
    let default_level = if config.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    tracing::info!("Starting OData MCP Server...");

    let runtime_config = config.to_runtime().context("Invalid configuration")?;
    tracing::info!("Configured for {}", runtime_config.service_url);

    let client = Arc::new(
        ODataClient::new(runtime_config.client_settings()).context("Failed to build HTTP client")?,
    );
    let server = ODataMcpServer::new(client, runtime_config.session());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, shutting down");
                shutdown.cancel();
            }
        });
    }

    if let Err(e) = server.bootstrap(&shutdown).await {
        tracing::warn!("Metadata bootstrap failed, continuing in OData v2 mode: {}", e);
    }

    tracing::info!("MCP Server ready, listening on stdio...");
    run_stdio_loop(&server, &shutdown).await
}

async fn run_stdio_loop(server: &ODataMcpServer, shutdown: &CancellationToken) -> anyhow::Result<()> {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = lines.next() => match next {
                Some(line) => line?,
                None => break,
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        tracing::debug!("Received: {}", line);

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => server.handle_request(request, &shutdown.child_token()).await,
            Err(e) => Some(JsonRpcResponse::error(
                None,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            )),
        };

        if let Some(response) = response {
            let json = serde_json::to_string(&response)?;
            tracing::debug!("Sending: {}", json);
            stdout.write_all(json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}
