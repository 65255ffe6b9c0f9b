use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clob_backend::config::AppConfig;
use clob_backend::db::Database;
use clob_backend::services::matching::{
    MatchingEngine, OrderMatcher, PgPriceSource, PriceChecker,
};
use clob_backend::services::settlement::{AmmExecutionService, SettlementService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clob_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting CLOB backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    let db = Database::connect(&config.database_url).await?;
    tracing::info!("Database connected");
    if config.run_migrations {
        db.migrate().await?;
        tracing::info!("Migrations applied");
    }

    let matching_engine = Arc::new(MatchingEngine::new());
    match matching_engine.recover_orders(db.pool()).await {
        Ok(count) => {
            if count > 0 {
                tracing::info!("Recovered {} open limit orders into the book", count);
            }
        }
        Err(e) => {
            tracing::error!("Order recovery failed: {}", e);
            return Err(e.into());
        }
    }

    let settlement_tx =
        SettlementService::new(db.pool().clone(), config.settlement_queue_capacity).start_worker();
    let amm_tx =
        AmmExecutionService::new(db.pool().clone(), config.amm_queue_capacity).start_worker();

    let matcher_handle = if config.matcher_enabled {
        let matcher = OrderMatcher::new(
            matching_engine.clone(),
            PriceChecker::new(PgPriceSource::new(db.pool().clone())),
            settlement_tx,
            amm_tx,
        );
        Some(matcher.start(config.matcher_interval_ms))
    } else {
        tracing::warn!("Order matcher disabled by configuration");
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    if let Some(handle) = matcher_handle {
        handle.stop();
    }

    Ok(())
}
