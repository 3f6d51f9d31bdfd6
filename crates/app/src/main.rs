mod cache;
mod operations;
mod problem;
mod router;
mod telemetry;

use std::net::SocketAddr;

use chrono::Utc;
use metrics::counter;
use quick_ops_storage::{bootstrap, Database, SeedError};
use quick_ops_util::{load_env_file, AppConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    if config.seed_on_start {
        seed(&database).await?;
    } else {
        info!(stage = "seed", "seeding disabled by APP_SEED");
    }

    let cache = cache::OperationsCache::new(config.cache);
    info!(
        stage = "app",
        enabled = cache.is_enabled(),
        ttl_secs = config.cache.ttl.as_secs(),
        max_entries = config.cache.max_entries,
        "operations cache configured"
    );

    let state = router::AppState::new(metrics, database, cache);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}

async fn seed(database: &Database) -> Result<(), SeedError> {
    let report = bootstrap(database, Utc::now()).await.map_err(|err| {
        error!(stage = "seed", user_id = err.user_id, error = %err, "seeding failed");
        err
    })?;
    counter!("seed_documents_total", "outcome" => "inserted").increment(report.inserted as u64);
    counter!("seed_documents_total", "outcome" => "updated").increment(report.updated as u64);
    Ok(())
}
