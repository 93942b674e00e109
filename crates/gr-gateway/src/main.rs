//! group-relay: main binary
//!
//! Answers Facebook group posts and comments with LLM-generated replies.
//!
//! Usage:
//!   group-relay           - Start the webhook server
//!   group-relay --help    - Show help
//!   group-relay --version - Show version

use std::sync::Arc;

use gr_core::{Config, LlmClient};
use gr_facebook::{EventDispatcher, FacebookApi, WebhookState, start_webhook_server};
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    /// Webhook server
    Server,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_args(std::env::args().skip(1)) {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("group-relay {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server => {}
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    // Missing API key aborts here, before anything binds
    let config = Config::load().map_err(|e| {
        tracing::error!("CRITICAL ERROR: {}", e);
        anyhow::anyhow!("Config error: {}", e)
    })?;

    tracing::info!("Starting group-relay...");
    tracing::info!("Model: {} ({:?})", config.llm.model, config.llm.provider);

    if config.facebook.page_access_token.is_none() {
        tracing::warn!("FACEBOOK_PAGE_ACCESS_TOKEN is not set; replies will be skipped");
    }
    if config.uses_default_verify_token() {
        tracing::warn!("FACEBOOK_VERIFY_TOKEN is not set; using the placeholder verify token");
    }

    let state = build_state(&config)?;
    let port = config.server.port;

    start_webhook_server(state, port, shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Webhook server error: {}", e))?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wire the LLM client, Graph client and dispatcher together
fn build_state(config: &Config) -> anyhow::Result<WebhookState> {
    let llm = LlmClient::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?;
    let api = Arc::new(FacebookApi::new(&config.facebook));
    let dispatcher = EventDispatcher::new(Arc::new(llm), api.clone());

    Ok(WebhookState {
        api,
        dispatcher: Arc::new(dispatcher),
        async_dispatch: config.server.async_dispatch,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}

/// Parse command line arguments
fn parse_args<I>(args: I) -> RunMode
where
    I: IntoIterator<Item = String>,
{
    for arg in args {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            _ => {}
        }
    }

    RunMode::Server
}

/// Print help message
fn print_help() {
    println!("group-relay - LLM replies for Facebook groups");
    println!();
    println!("Usage:");
    println!("  group-relay           Start the webhook server");
    println!("  group-relay --help    Show this help message");
    println!("  group-relay --version Show version");
    println!();
    println!("Environment Variables:");
    println!("  OPENAI_API_KEY              LLM API key (required; LLM_API_KEY also accepted)");
    println!("  LLM_PROVIDER                openai or claude (default: openai)");
    println!("  LLM_MODEL                   Model name (default: gpt-3.5-turbo)");
    println!("  LLM_BASE_URL                Custom API endpoint");
    println!("  LLM_SYSTEM_PROMPT           System instruction");
    println!("  LLM_FALLBACK_REPLY          Reply used when the LLM call fails");
    println!("  FACEBOOK_PAGE_ACCESS_TOKEN  Graph API page token (replies skipped if unset)");
    println!("  FACEBOOK_VERIFY_TOKEN       Webhook verify token");
    println!("  FACEBOOK_GRAPH_API_URL      Graph API base URL (default: https://graph.facebook.com/v19.0)");
    println!("  PORT                        Listening port (default: 3000)");
    println!("  WEBHOOK_ASYNC_DISPATCH      Acknowledge deliveries before replying (default: false)");
    println!();
    println!("Settings may also be read from ./group-relay.toml.");
}
