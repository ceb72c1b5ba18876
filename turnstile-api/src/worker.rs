use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use turnstile_catalog::ReservationEngine;
use turnstile_core::ReservationResult;

use crate::metrics::Metrics;

/// Periodically returns lapsed holds to sale. Reads already treat them as
/// available; the sweep makes the stored rows and the change feed agree.
pub async fn start_expiry_sweeper(
    engine: Arc<ReservationEngine>,
    metrics: Arc<Metrics>,
    every: Duration,
    batch_size: usize,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Expiry sweeper started, every {:?}", every);

    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(&engine, &metrics, batch_size).await {
            error!("Expiry sweep failed: {}", e);
        }
    }
}

pub async fn sweep_once(engine: &ReservationEngine, metrics: &Metrics, batch_size: usize) -> ReservationResult<usize> {
    let expired = engine.sweep_expired(batch_size).await?;
    if expired > 0 {
        metrics.expired_holds.inc_by(expired as u64);
    }
    Ok(expired)
}

#[cfg(feature = "kafka")]
pub use relay::start_event_relay;

#[cfg(feature = "kafka")]
mod relay {
    use std::sync::Arc;
    use tokio::sync::broadcast::{self, error::RecvError};
    use tracing::{info, warn};

    use turnstile_shared::models::events::OrderEvent;
    use turnstile_store::{BroadcastChangeFeed, EventProducer};

    use crate::seats::seat_event;

    /// Forwards every seat change and order event to Kafka.
    pub async fn start_event_relay(
        feed: Arc<BroadcastChangeFeed>,
        mut orders: broadcast::Receiver<OrderEvent>,
        producer: Arc<EventProducer>,
        seat_topic: String,
        order_topic: String,
    ) {
        let mut seats = feed.subscribe_all();
        info!("Event relay started: {} / {}", seat_topic, order_topic);

        loop {
            tokio::select! {
                change = seats.recv() => match change {
                    Ok(change) => {
                        let event = seat_event(&change);
                        if let Err(e) = producer.send(&seat_topic, &event.seat_id, &event).await {
                            warn!("Seat change {} not relayed: {}", event.seat_id, e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Event relay dropped {} seat changes", n),
                    Err(RecvError::Closed) => break,
                },
                event = orders.recv() => match event {
                    Ok(event) => {
                        let key = event.order_id().to_string();
                        if let Err(e) = producer.send(&order_topic, &key, &event).await {
                            warn!("Order event {} not relayed: {}", key, e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Event relay dropped {} order events", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("Event relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use turnstile_catalog::StadiumLayout;
    use turnstile_core::{AuthContext, GameId, ManualClock, SeatId, SeatState};
    use turnstile_store::InMemorySeatStore;

    #[tokio::test]
    async fn sweep_counts_expired_holds() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = ReservationEngine::new(Arc::new(InMemorySeatStore::new()), clock.clone())
            .with_hold_ttl(ChronoDuration::seconds(60));
        let game = GameId::new("g1");
        engine
            .initialize_game(&AuthContext::admin("root"), &game, &StadiumLayout::default_stadium())
            .await
            .unwrap();

        let seat = SeatId::new(&game, "VIP", "A", 1);
        engine.hold(&AuthContext::customer("u1"), &seat).await.unwrap();
        let metrics = Metrics::new().unwrap();

        assert_eq!(sweep_once(&engine, &metrics, 100).await.unwrap(), 0);

        clock.advance(ChronoDuration::seconds(61));
        assert_eq!(sweep_once(&engine, &metrics, 100).await.unwrap(), 1);
        assert_eq!(metrics.expired_holds.get(), 1);
        assert_eq!(engine.get_seat(&seat).await.unwrap().state, SeatState::Available);
    }
}
