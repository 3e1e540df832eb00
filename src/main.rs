//! Tributary CLI
//!
//! Operational entry points for the ingestion core:
//! - Validate and print a configuration
//! - Generate a default configuration file
//! - Replay a JSON push batch through an in-memory ingester and query it

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tributary::config::{generate_default_config, Config, LoggingConfig};
use tributary::ingester::{
    CollectingSink, Ingester, Overrides, PushRequest, QueryRequest, RequestContext,
};
use tributary::storage::{Direction, NANOS_PER_MILLI};
use tributary::store::MemoryStore;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-tenant log ingestion core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration and print it resolved
    CheckConfig,

    /// Print the default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Push a JSON batch into an in-memory ingester and query it back
    Replay {
        /// JSON file holding a push request: {"streams": [...]}
        #[arg(short, long)]
        file: PathBuf,
        /// Tenant to push as
        #[arg(short, long, default_value = "fake")]
        tenant: String,
        /// Selector to query after the push (default: print stats only)
        #[arg(short, long)]
        selector: Option<String>,
        /// Query start, unix milliseconds
        #[arg(long, default_value = "0")]
        since_ms: i64,
        /// Maximum entries to print
        #[arg(short, long, default_value = "100")]
        limit: u32,
        /// Newest entries first
        #[arg(long)]
        backward: bool,
    },
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tributary={}", logging.level)));

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateConfig { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
        }

        Commands::CheckConfig => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config.logging);
            let resolved =
                toml::to_string_pretty(&config.ingester).context("rendering configuration")?;
            println!("Configuration OK\n");
            println!("[ingester]\n{}", resolved);
            println!(
                "Default stream limit: {} ({} tenant overrides)",
                config.limits.max_local_streams_per_user,
                config.tenants.len()
            );
        }

        Commands::Replay {
            file,
            tenant,
            selector,
            since_ms,
            limit,
            backward,
        } => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config.logging);
            replay(config, &file, &tenant, selector, since_ms, limit, backward).await?;
        }
    }

    Ok(())
}

async fn replay(
    config: Config,
    file: &Path,
    tenant: &str,
    selector: Option<String>,
    since_ms: i64,
    limit: u32,
    backward: bool,
) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let batch: PushRequest = serde_json::from_str(&content)
        .with_context(|| format!("parsing push request {}", file.display()))?;
    if batch.streams.is_empty() {
        bail!("{} holds no streams", file.display());
    }

    let overrides = Arc::new(Overrides::new(config.limits.clone(), config.tenants.clone()));
    let ingester = Arc::new(Ingester::new(
        config.ingester.clone(),
        overrides,
        Arc::new(MemoryStore::new()),
    )?);
    ingester.start();

    let ctx = RequestContext::new(tenant);
    tracing::info!(tenant = %tenant, request_id = %ctx.request_id(), streams = batch.streams.len(), "replaying batch");
    match ingester.push(&ctx, batch).await {
        Ok(resp) => println!(
            "Pushed: {} accepted, {} out of order, {} duplicate",
            resp.accepted, resp.out_of_order, resp.duplicate
        ),
        Err(e) => println!("Push finished with error ({}): {}", e.status_code(), e),
    }

    if let Some(selector) = selector {
        let req = QueryRequest {
            selector,
            start: since_ms.saturating_mul(NANOS_PER_MILLI),
            end: i64::MAX,
            limit,
            direction: if backward {
                Direction::Backward
            } else {
                Direction::Forward
            },
        };
        let mut sink = CollectingSink::new();
        ingester.query(&ctx, &req, &mut sink).await?;

        for stream in sink.streams() {
            println!("\n{}", stream.labels);
            for entry in &stream.entries {
                println!("  {}  {}", format_timestamp(entry.timestamp), entry.line);
            }
        }
    }

    println!("\n{}", ingester.stats().await);
    ingester.shutdown().await?;
    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts.div_euclid(1_000_000_000), ts.rem_euclid(1_000_000_000) as u32)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
