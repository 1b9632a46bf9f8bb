//! Order Engine - transactional order placement service

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_engine::publisher::{EventPublisher, NatsPublisher, NoopPublisher};
use order_engine::store::PgStore;
use order_engine::{http, Config, OrderCoordinator};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = PgStore::connect(&config.database_url, config.db_max_connections).await?;
    store.migrate().await?;

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match NatsPublisher::connect(url).await {
            Ok(nats) => Arc::new(nats),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, order events disabled");
                Arc::new(NoopPublisher)
            }
        },
        None => Arc::new(NoopPublisher),
    };

    let coordinator = Arc::new(OrderCoordinator::new(store, publisher, config.engine.clone()));
    let app = http::router(coordinator);

    tracing::info!("order engine listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
