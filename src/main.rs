//! # Codesift
//!
//! A local-first code-search MCP server: an embedding subsystem (static
//! hash fallback, remote GPU/local-runner backends, LRU cache, thermal
//! timeout policy) fronted by an MCP tool server exposing `search`,
//! `search_code`, `search_docs`, and `index_status` over stdio.
//!
//! ## Modules
//!
//! - [`config`] — layered TOML + environment configuration
//! - [`embedding`] — embedder trait, backends, cache, thermal policy, factory
//! - [`search_engine`] — the indexing/retrieval collaborator seam
//! - [`mcp`] — tool dispatch and resource surface bridged to `rmcp`
//! - [`metrics`] — query telemetry
//! - [`progress`] — indexing progress tracker
//! - [`store`] — telemetry flush target
//! - [`errors`] — typed errors mapped to JSON-RPC error codes

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rmcp::service::ServiceExt;
use tracing_subscriber::EnvFilter;

use codesift_mcp::config::{self, ConfigOverrides};
use codesift_mcp::embedding::factory;
use codesift_mcp::mcp::{McpToolServer, ToolContext};
use codesift_mcp::metrics::QueryMetrics;
use codesift_mcp::progress::ProgressTracker;
use codesift_mcp::project;
use codesift_mcp::search_engine::NullSearchEngine;
use codesift_mcp::store::{NullTelemetryStore, TelemetryStore};

#[derive(Parser)]
#[command(
    name = "codesift",
    about = "Codesift — local code-search MCP server over an embedding index",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./codesift.toml")]
    config: PathBuf,

    /// Override the embedding model (same precedence tier as config file,
    /// beneath environment variables)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Disable the embedding cache regardless of config
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP tool server
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Serve MCP tools over stdio
    Mcp,
}

fn init_logging(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        // stdout carries only the JSON-RPC stream; all logging goes to stderr.
        .with_writer(std::io::stderr);

    if log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    config::set_overrides(ConfigOverrides {
        model: cli.model.clone(),
        cache_enabled: if cli.no_cache { Some(false) } else { None },
    })
    .ok();

    let cfg = config::load_config(Some(&cli.config))?;
    init_logging(cfg.server.log_json);

    match cli.command {
        Commands::Serve { service } => match service {
            ServeService::Mcp => run_mcp_server(&cfg).await?,
        },
    }

    Ok(())
}

async fn run_mcp_server(cfg: &config::Config) -> anyhow::Result<()> {
    let settings = cfg.to_factory_settings();
    let embedder = factory::build(&settings).await?;

    tracing::info!(model = %settings.model, "embedder ready");

    let ctx = Arc::new(ToolContext {
        engine: Arc::new(NullSearchEngine),
        embedder: Arc::from(embedder),
        metrics: Arc::new(QueryMetrics::new(Duration::from_secs(
            cfg.server.flush_interval_secs,
        ))),
        progress: Arc::new(ProgressTracker::new()),
        project: project::detect(&cfg.workspace_root()),
    });

    let telemetry_store: Arc<dyn TelemetryStore> = Arc::new(NullTelemetryStore);
    let flush_handle = spawn_telemetry_flush_loop(ctx.metrics.clone(), telemetry_store.clone());

    let server = McpToolServer::new(ctx.clone(), cfg.workspace_root());

    let transport = rmcp::transport::io::stdio();
    let service = server.serve(transport).await?;
    tracing::info!("codesift MCP server listening on stdio");
    service.waiting().await?;

    flush_handle.abort();
    if let Err(err) = ctx.metrics.close(telemetry_store.as_ref()).await {
        tracing::warn!(error = %err, "final telemetry flush failed");
    }

    Ok(())
}

/// Ticks every `flush-interval` and upserts the aggregator's snapshot into
/// `store` whenever [`QueryMetrics::due_for_flush`] says it's time. Flush
/// errors are logged, never propagated — collection keeps running even
/// when the store is unreachable.
fn spawn_telemetry_flush_loop(
    metrics: Arc<QueryMetrics>,
    store: Arc<dyn TelemetryStore>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if metrics.due_for_flush() {
                if let Err(err) = metrics.flush(store.as_ref()).await {
                    tracing::warn!(error = %err, "periodic telemetry flush failed");
                }
            }
        }
    })
}
