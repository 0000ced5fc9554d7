mod config;
mod inference;
mod retrieval;
mod search;
mod server;

pub const USER_AGENT: &str = concat!("deepsearch/", env!("CARGO_PKG_VERSION"));

use clap::Parser;
use tracing::info;

/// Deep-search HTTP server: recursive query expansion, web retrieval, and
/// LLM synthesis behind a single POST /search endpoint.
#[derive(Parser)]
#[command(name = "deepsearch")]
#[command(about = "Recursive deep web search service")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deepsearch=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = config::Config::from_env()
        .inspect_err(|e| tracing::error!("configuration error: {e}"))?;

    let state = server::AppState::new(config);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "deepsearch server listening");

    axum::serve(listener, server::app(state)).await?;
    Ok(())
}
