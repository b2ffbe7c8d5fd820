mod config;
mod telemetry;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use config::{BenchConfig, CliArgs};
use ferroid_hilo::{ClientRegistry, Conventions, MemoryLeaseServer};
use futures::future::try_join_all;
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

type Registry = ClientRegistry<MemoryLeaseServer>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = BenchConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let server = Arc::new(
        MemoryLeaseServer::new(config.server_tag.clone())
            .with_initial_batch_size(config.initial_batch_size)
            .with_max_batch_size(config.max_batch_size),
    );
    let conventions = Arc::new(Conventions::new().with_identity_parts_separator(&config.separator));
    let registry = Arc::new(ClientRegistry::new(Arc::clone(&server), conventions));

    let outcome = tokio::select! {
        res = run(Arc::clone(&registry), config.clone()) => res,
        _ = shutdown_signal() => {
            tracing::warn!("Interrupted, returning unused ranges");
            Ok(())
        }
    };

    // Always hand back what was leased, even after a failure.
    registry.shutdown().await;

    for database in &config.databases {
        for collection in &config.collections {
            let tag = registry.conventions().tag_for(collection);
            tracing::info!(
                database,
                tag,
                high_watermark = server.high_watermark(database, &tag),
                "server state after shutdown"
            );
        }
    }

    outcome
}

async fn run(registry: Arc<Registry>, config: BenchConfig) -> anyhow::Result<()> {
    let start = Instant::now();

    let writers = (0..config.writers).map(|writer| {
        let registry = Arc::clone(&registry);
        let database = config.databases[writer % config.databases.len()].clone();
        let collection = config.collections[writer % config.collections.len()].clone();
        let ids_per_writer = config.ids_per_writer;
        let keep = config.check_unique;

        tokio::spawn(async move {
            let mut ids = Vec::with_capacity(if keep { ids_per_writer } else { 0 });
            for _ in 0..ids_per_writer {
                let id = registry
                    .id_for(Some(&database), &collection)
                    .await
                    .with_context(|| format!("writer {writer} failed on {database}/{collection}"))?;
                if keep {
                    ids.push(format!("{database}:{id}"));
                }
            }
            anyhow::Ok(ids)
        })
    });

    let results = try_join_all(writers).await.context("writer task panicked")?;
    let elapsed = start.elapsed();

    let mut seen = HashSet::with_capacity(if config.check_unique { config.total_ids } else { 0 });
    for ids in results {
        for id in ids? {
            if !seen.insert(id.clone()) {
                anyhow::bail!("duplicate identifier generated: {id}");
            }
        }
    }

    report(&config, elapsed);
    if config.check_unique {
        tracing::info!(unique = seen.len(), "no duplicate identifiers");
    }
    Ok(())
}

fn report(config: &BenchConfig, elapsed: Duration) {
    let throughput = config.total_ids as f64 / elapsed.as_secs_f64();
    tracing::info!(
        writers = config.writers,
        ids = config.total_ids,
        elapsed_ms = format!("{:.2}", elapsed.as_secs_f64() * 1000.0),
        ids_per_sec = format!("{throughput:.0}"),
        "allocation finished"
    );
}

fn log_startup_info(config: &BenchConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting HiLo benchmark with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting HiLo benchmark: {} writers x {} ids over {} database(s)",
            config.writers,
            config.ids_per_writer,
            config.databases.len()
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
