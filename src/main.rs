use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use labseq::allocator::{CodeAllocator, Department, DEFAULT_RESERVATION_TTL_SECS};
use labseq::api::{start_server, AppState, Metrics, ServerConfig};
use labseq::storage::RocksDbCounterStore;
use labseq::sweeper::{BackgroundSweeper, SweeperConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("labseq=info".parse()?))
        .init();

    tracing::info!("labseq starting...");

    // Durable counter store (RocksDB)
    let data_dir = std::env::var("LABSEQ_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let store = Arc::new(RocksDbCounterStore::open(&data_dir)?);
    tracing::info!("Opened RocksDB at {}", data_dir);

    let ttl_secs: i64 = std::env::var("LABSEQ_RESERVATION_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RESERVATION_TTL_SECS);

    let allocator =
        Arc::new(CodeAllocator::new(store).with_ttl(chrono::Duration::seconds(ttl_secs)));

    for department in departments_from_env() {
        tracing::info!(
            id = department.id,
            code = %department.code,
            "Registered department"
        );
        allocator.register_department(department)?;
    }

    let sweeper = Arc::new(BackgroundSweeper::new(
        Arc::clone(&allocator),
        SweeperConfig::from_env(),
    ));
    sweeper.start()?;
    tracing::info!("Background reservation sweeper started");

    let state = Arc::new(AppState {
        allocator,
        metrics: Arc::new(Metrics::new()),
    });

    let config = ServerConfig::from_env();
    start_server(config, state, shutdown_signal()).await?;

    sweeper.stop()?;

    Ok(())
}

/// Parses `LABSEQ_DEPARTMENTS`, e.g. `1:PCR:PCR;2:SER:Serology`.
/// Falls back to the stock lab layout when unset.
fn departments_from_env() -> Vec<Department> {
    let raw = std::env::var("LABSEQ_DEPARTMENTS")
        .unwrap_or_else(|_| "1:PCR:PCR;2:SER:Serology;3:MIC:Microbiology".into());

    raw.split(';')
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let id = parts.next()?.trim().parse().ok()?;
            let code = parts.next()?.trim();
            let name = parts.next().unwrap_or(code).trim();
            if code.is_empty() {
                return None;
            }
            Some(Department {
                id,
                code: code.into(),
                name: name.into(),
            })
        })
        .collect()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
