use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use supabase_mcp::transport::{serve_http, serve_stdio};
use supabase_mcp::{DynamicConfigMiddleware, McpServer, Settings, Transport};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "supabase-mcp", version, about = "MCP server for Supabase with per-call project resolution")]
struct Cli {
    /// Transport to serve on
    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen address for the HTTP transport
    #[arg(long, env = "MCP_BIND", default_value = "0.0.0.0:8000")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    init_tracing(&settings);

    settings.validate().context("invalid configuration")?;
    let middleware = DynamicConfigMiddleware::new(&settings)
        .context("default Supabase project is not configured")?;
    let server = Arc::new(McpServer::supabase(Arc::new(middleware)).await);

    tracing::info!(
        transport = ?cli.transport,
        timeout_secs = settings.request_timeout_secs,
        "supabase-mcp starting"
    );

    match cli.transport {
        Transport::Stdio => serve_stdio(server).await?,
        Transport::Http => serve_http(server, &cli.bind).await?,
    }

    Ok(())
}

/// Log to stderr; stdout belongs to the stdio transport.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if settings.debug { "debug" } else { settings.log_level.as_str() };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
