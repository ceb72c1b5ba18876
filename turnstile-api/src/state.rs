use std::sync::Arc;
use tokio::sync::broadcast;

use turnstile_catalog::{PricingEngine, ReservationEngine};
use turnstile_core::identity::IdentityResolver;
use turnstile_core::{Clock, OrderStore, SeatStore};
use turnstile_order::{OrderFinalizer, OrderManager, PaymentOrchestrator, SimulatedGateway};
use turnstile_shared::models::events::OrderEvent;
use turnstile_store::app_config::BusinessRules;
use turnstile_store::{BroadcastChangeFeed, InMemoryOrderStore, InMemorySeatStore, RedisClient};

use crate::metrics::Metrics;
use crate::middleware::JwtIdentity;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    pub finalizer: Arc<OrderFinalizer>,
    pub orders: Arc<OrderManager>,
    pub feed: Arc<BroadcastChangeFeed>,
    pub pricing: Arc<PricingEngine>,
    pub identity: Arc<dyn IdentityResolver>,
    pub redis: Option<Arc<RedisClient>>,
    pub order_events: broadcast::Sender<OrderEvent>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

impl AppState {
    /// Wires the engine, finalizer and order manager over the given stores.
    /// `seats` must publish its writes to `feed`.
    pub fn new(
        seats: Arc<dyn SeatStore>,
        orders: Arc<dyn OrderStore>,
        feed: Arc<BroadcastChangeFeed>,
        clock: Arc<dyn Clock>,
        business_rules: BusinessRules,
        auth: AuthConfig,
    ) -> anyhow::Result<Self> {
        let engine = Arc::new(
            ReservationEngine::new(seats, clock)
                .with_hold_ttl(business_rules.hold_ttl())
                .with_sale_policy(business_rules.sale_policy),
        );
        let pricing = Arc::new(PricingEngine::default());
        let (order_events, _) = broadcast::channel(256);

        let finalizer = OrderFinalizer::new(
            engine.clone(),
            orders.clone(),
            PaymentOrchestrator::new(Arc::new(SimulatedGateway)),
            pricing.clone(),
        )
        .with_currency(&business_rules.currency)
        .with_events(order_events.clone());
        let manager = OrderManager::new(engine.clone(), orders).with_events(order_events.clone());

        Ok(Self {
            engine,
            finalizer: Arc::new(finalizer),
            orders: Arc::new(manager),
            feed,
            pricing,
            identity: Arc::new(JwtIdentity::new(&auth.secret)),
            redis: None,
            order_events,
            metrics: Arc::new(Metrics::new()?),
            auth,
            business_rules,
        })
    }

    /// Everything in process memory; used for local runs and router tests.
    pub fn in_memory(
        clock: Arc<dyn Clock>,
        business_rules: BusinessRules,
        auth: AuthConfig,
        feed_capacity: usize,
    ) -> anyhow::Result<Self> {
        let feed = Arc::new(BroadcastChangeFeed::new(feed_capacity));
        let seats = Arc::new(InMemorySeatStore::with_feed(feed.clone()));
        Self::new(seats, Arc::new(InMemoryOrderStore::new()), feed, clock, business_rules, auth)
    }

    pub fn with_redis(mut self, redis: RedisClient) -> Self {
        self.redis = Some(Arc::new(redis));
        self
    }
}
