//! lore-store operator CLI.
//!
//! Applies schema migrations, reports the schema ledger and probes database
//! liveness outside the game server.

use clap::Parser;
use lore_store::config::{Command, Config};
use lore_store::db::{HealthMonitor, HealthState, Migrator, PoolManager};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let store_config = config.store_config()?;
    info!(
        backend = %store_config.database.db_type,
        database = %store_config.database.masked_connection_string(),
        "lore-store v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = Arc::new(PoolManager::configure(&store_config.database).await?);

    let result = match config.command {
        Command::Migrate => migrate(&pool).await,
        Command::Status => status(&pool).await,
        Command::Check => check(&pool, &store_config).await,
    };

    pool.close().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn migrate(pool: &Arc<PoolManager>) -> Result<(), Box<dyn std::error::Error>> {
    let report = lore_store::store::migrate(pool).await?;
    if report.applied.is_empty() {
        println!("Schema already at version {}", report.to_version);
    } else {
        println!(
            "Migrated schema from version {} to {} (applied {:?})",
            report.from_version, report.to_version, report.applied
        );
    }
    Ok(())
}

async fn status(pool: &Arc<PoolManager>) -> Result<(), Box<dyn std::error::Error>> {
    let status = Migrator::new(pool.clone()).status().await?;
    println!(
        "Schema version {} of {}",
        status.current_version, status.latest_version
    );
    for record in &status.applied {
        println!(
            "  v{:<4} {}  {}",
            record.version,
            record.applied_at.to_rfc3339(),
            record.description
        );
    }
    if !status.pending.is_empty() {
        println!("Pending: {:?}", status.pending);
    }
    Ok(())
}

async fn check(
    pool: &Arc<PoolManager>,
    store_config: &lore_store::StoreConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = HealthMonitor::new(pool.clone(), store_config.health.clone());
    let state = monitor.check_now().await;
    let info = pool.connection_info();
    let stats = pool.stats().await;
    println!(
        "{} {}: {:?} (pool {}/{} open, {} idle)",
        info.database_type,
        info.server_version.as_deref().unwrap_or("unknown version"),
        state,
        stats.size,
        stats.max_connections,
        stats.idle
    );
    if state == HealthState::Degraded {
        return Err("database probe failed".into());
    }
    Ok(())
}
