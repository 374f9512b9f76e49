//! Resource map resolver CLI
//!
//! Resolves one PID against live services configured from the environment
//! (see `ServiceConfig::from_env`) and prints the result as JSON.
//!
//! Usage: `resmap_resolver <pid> [--chain] [--trace]`

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use resmap_resolver::auth::{StaticToken, TokenProvider};
use resmap_resolver::{Registry, ResolverConfig, ServiceConfig};

// ──────────────────────────────────────────────────────────────────────────────
// ARGUMENTS
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "resmap_resolver", version, about = "Resolve the resource map that aggregates a document")]
struct Args {
    /// Document PID or series id
    pid: String,

    /// Print the version chain instead of resolving
    #[arg(long)]
    chain: bool,

    /// Print the full event trace after the result
    #[arg(long)]
    trace: bool,
}

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Loads .env as well
    let services = ServiceConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resmap_resolver=info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let registry = Registry::new();
    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticToken::new(services.token.clone()));

    info!(
        meta = %services.meta_service_url,
        query = %services.query_service_url,
        db = %services.db_path.display(),
        "services configured"
    );

    if args.chain {
        let tracker = registry
            .http_tracker(&services, services.tracker.clone(), tokens)
            .await
            .context("failed to build version tracker")?;
        let chain = tracker.get_full_chain(&args.pid, false).await?;
        println!("{}", serde_json::to_string_pretty(&chain)?);
        return Ok(());
    }

    let config = ResolverConfig {
        id: services.meta_service_url.clone(),
        ..ResolverConfig::default()
    };
    let resolver = registry
        .http_resolver(&services, config, tokens)
        .await
        .context("failed to build resolver")?;

    let result = resolver.resolve(&args.pid).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if args.trace {
        for event in resolver.get_trace(None) {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
