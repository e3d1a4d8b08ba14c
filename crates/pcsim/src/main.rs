//! pcsim - drives pipecache with pipeline-shaped traffic and reports statistics

mod workload;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pipecache::{CacheConfig, CacheRegistry, Reclaimer, TieredCache, TieredConfig, MAIN_CACHE};
use tracing::info;

use crate::workload::{Artifact, Workload, WorkloadConfig};

/// Name of the tiered cache section read from the configuration file
const SESSIONS_CACHE: &str = "sessions";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Main cache capacity, overriding the configuration
    #[arg(short, long)]
    capacity: Option<usize>,

    /// Hot tier capacity of the sessions cache when not configured
    #[arg(long, default_value_t = 16)]
    hot_size: usize,

    /// Number of simulated pipeline calls
    #[arg(short, long, default_value_t = 10000)]
    operations: usize,

    /// Number of distinct source documents
    #[arg(short, long, default_value_t = 64)]
    documents: i64,

    /// Reclaim half the reclaimable payloads every N calls (0 disables)
    #[arg(long, default_value_t = 500)]
    reclaim_every: usize,

    /// Random seed for the workload
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Print cache contents after the run
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting pcsim v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.caches.insert(MAIN_CACHE.to_string(), capacity);
    }

    let sessions_layout = config.tiered(SESSIONS_CACHE).cloned().unwrap_or(TieredConfig {
        max_hot: args.hot_size,
        slots: vec!["id".to_string(), "path".to_string()],
        max_reclaimable: None,
    });
    if sessions_layout.slots.len() != 2 {
        anyhow::bail!(
            "tiered cache '{}' needs exactly two slots, got {:?}",
            SESSIONS_CACHE,
            sessions_layout.slots
        );
    }
    let sessions: TieredCache<String, Artifact> = sessions_layout.build(Reclaimer::new())?;
    let registry: CacheRegistry<Artifact> = CacheRegistry::from_config(config);

    info!(
        "Main cache capacity: {}, sessions hot size: {}",
        registry.main().max_size(),
        sessions.max_hot_size()
    );

    let mut workload = Workload::new(
        &registry,
        &sessions,
        WorkloadConfig {
            operations: args.operations,
            documents: args.documents,
            reclaim_every: args.reclaim_every,
            seed: args.seed,
        },
    )?;
    let report = workload.run()?;

    info!(
        lookups = report.lookups,
        hits = report.hits,
        edits = report.edits,
        evicted = report.evicted,
        "run finished"
    );
    println!("{}: {}", MAIN_CACHE, registry.main().lifetime_stats());
    println!(
        "{} {}: {}",
        SESSIONS_CACHE,
        pipecache::TierStats::FORMAT,
        sessions.stats()
    );
    println!(
        "sessions: {} hits, {} puts, {} payloads reclaimed",
        report.session_hits, report.session_puts, report.reclaimed
    );

    if args.dump {
        print!("{}", registry.main().dump());
        print!("{}", sessions.dump());
    }

    Ok(())
}
