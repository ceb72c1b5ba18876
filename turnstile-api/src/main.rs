use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turnstile_api::{app, worker, AppState, AuthConfig};
use turnstile_core::SystemClock;
use turnstile_store::app_config::{Config, StoreBackend};
use turnstile_store::{BroadcastChangeFeed, DbClient, PgOrderStore, PgSeatStore, RedisClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Turnstile API on port {}", config.server.port);

    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
        expiration: config.auth.jwt_expiration_seconds,
    };
    let clock = Arc::new(SystemClock);

    let mut app_state = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; inventory is lost on restart");
            AppState::in_memory(clock, config.business_rules.clone(), auth, config.store.feed_capacity)?
        }
        StoreBackend::Postgres => {
            let db = DbClient::new(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            let business_rules = db
                .fetch_business_rules(config.business_rules.clone())
                .await
                .context("Failed to load business rules")?;

            let feed = Arc::new(BroadcastChangeFeed::new(config.store.feed_capacity));
            let seats = Arc::new(PgSeatStore::with_feed(db.pool.clone(), feed.clone()));
            let orders = Arc::new(PgOrderStore::new(db.pool.clone()));
            AppState::new(seats, orders, feed, clock, business_rules, auth)?
        }
    };

    // Redis Connection (optional, hold rate limiting only)
    if let Some(url) = &config.redis.url {
        let redis = RedisClient::new(url).context("Invalid Redis URL")?;
        app_state = app_state.with_redis(redis);
    }

    tokio::spawn(worker::start_expiry_sweeper(
        app_state.engine.clone(),
        app_state.metrics.clone(),
        app_state.business_rules.sweep_interval(),
        app_state.business_rules.sweep_batch_size,
    ));

    #[cfg(feature = "kafka")]
    {
        let producer = turnstile_store::EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
        tokio::spawn(worker::start_event_relay(
            app_state.feed.clone(),
            app_state.order_events.subscribe(),
            Arc::new(producer),
            config.kafka.seat_topic.clone(),
            config.kafka.order_topic.clone(),
        ));
    }

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
