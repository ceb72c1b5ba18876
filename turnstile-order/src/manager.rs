use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

use turnstile_catalog::ReservationEngine;
use turnstile_core::{AuthContext, GameId, Order, OrderStore, PaymentStatus, ReservationError, ReservationResult};
use turnstile_shared::models::events::{OrderCancelledEvent, OrderEvent};

use crate::fulfillment::{Ticket, TicketIssuer};

/// Reads, cancels and administers orders after checkout.
pub struct OrderManager {
    engine: Arc<ReservationEngine>,
    orders: Arc<dyn OrderStore>,
    events: Option<broadcast::Sender<OrderEvent>>,
}

impl OrderManager {
    pub fn new(engine: Arc<ReservationEngine>, orders: Arc<dyn OrderStore>) -> Self {
        Self {
            engine,
            orders,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<OrderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The order, if the caller owns it or is an administrator.
    pub async fn get(&self, ctx: &AuthContext, order_id: Uuid) -> ReservationResult<Order> {
        let user = ctx.require_user()?;
        let order = self.orders.get(order_id).await?.ok_or(ReservationError::OrderNotFound(order_id))?;
        if &order.user_id != user && !ctx.is_admin() {
            return Err(ReservationError::Forbidden(format!("order {} belongs to another customer", order_id)));
        }
        Ok(order)
    }

    pub async fn list_for_user(&self, ctx: &AuthContext) -> ReservationResult<Vec<Order>> {
        let user = ctx.require_user()?;
        Ok(self.orders.list_by_user(user).await?)
    }

    pub async fn list_for_game(&self, ctx: &AuthContext, game_id: &GameId) -> ReservationResult<Vec<Order>> {
        ctx.require_admin()?;
        Ok(self.orders.list_by_game(game_id).await?)
    }

    pub async fn ticket(&self, ctx: &AuthContext, order_id: Uuid) -> ReservationResult<Ticket> {
        let order = self.get(ctx, order_id).await?;
        TicketIssuer::issue(&order)
    }

    /// Marks the order cancelled, puts every seat of the order back on sale, then
    /// deletes the order. Returns how many seats were released.
    ///
    /// A failure part way leaves the order `cancelled` rather than `paid`, so it
    /// gets no ticket and calling `cancel` again finishes the job.
    pub async fn cancel(&self, ctx: &AuthContext, order_id: Uuid) -> ReservationResult<usize> {
        let order = self.get(ctx, order_id).await?;
        self.orders.update_payment_status(order.id, PaymentStatus::Cancelled).await?;
        let released = self.engine.cancel_sale(order.id, &order.seat_ids()).await?;
        if let Err(e) = self.orders.delete(order.id).await {
            error!("Order {} released {} seat(s) but could not be deleted: {}", order.id, released, e);
            return Err(e.into());
        }

        let by = ctx.require_user()?.to_string();
        info!("Order {} cancelled by {}", order.id, by);
        if let Some(events) = &self.events {
            let _ = events.send(OrderEvent::Cancelled(OrderCancelledEvent {
                order_id: order.id,
                game_id: order.game_id.to_string(),
                released_seats: released,
                cancelled_by: by,
                timestamp: Utc::now().timestamp(),
            }));
        }
        Ok(released)
    }

    pub async fn update_payment_status(
        &self,
        ctx: &AuthContext,
        order_id: Uuid,
        status: PaymentStatus,
    ) -> ReservationResult<Order> {
        let admin = ctx.require_admin()?;
        if !self.orders.update_payment_status(order_id, status).await? {
            return Err(ReservationError::OrderNotFound(order_id));
        }
        info!("Order {} payment status set to {} by {}", order_id, status, admin);
        self.get(ctx, order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer::OrderFinalizer;
    use crate::orchestrator::{PaymentOrchestrator, SimulatedGateway};
    use turnstile_catalog::{PricingEngine, StadiumLayout};
    use turnstile_core::payment::PaymentDetails;
    use turnstile_core::{SeatId, SeatState, SystemClock};
    use async_trait::async_trait;
    use turnstile_core::{HolderId, StoreError, StoreResult};
    use turnstile_store::{InMemoryOrderStore, InMemorySeatStore};

    /// Order store whose deletes fail until `heal` is called.
    struct StuckDeletes {
        inner: InMemoryOrderStore,
        broken: std::sync::atomic::AtomicBool,
    }

    impl StuckDeletes {
        fn heal(&self) {
            self.broken.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl OrderStore for StuckDeletes {
        async fn insert(&self, order: &Order) -> StoreResult<()> {
            self.inner.insert(order).await
        }
        async fn delete(&self, order_id: Uuid) -> StoreResult<bool> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Unavailable("delete timed out".to_string()));
            }
            self.inner.delete(order_id).await
        }
        async fn get(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
            self.inner.get(order_id).await
        }
        async fn list_by_user(&self, user_id: &HolderId) -> StoreResult<Vec<Order>> {
            self.inner.list_by_user(user_id).await
        }
        async fn list_by_game(&self, game_id: &GameId) -> StoreResult<Vec<Order>> {
            self.inner.list_by_game(game_id).await
        }
        async fn update_payment_status(&self, order_id: Uuid, status: PaymentStatus) -> StoreResult<bool> {
            self.inner.update_payment_status(order_id, status).await
        }
    }

    struct World {
        engine: Arc<ReservationEngine>,
        manager: OrderManager,
        order: Order,
    }

    async fn world_with_order() -> World {
        let engine = Arc::new(ReservationEngine::new(Arc::new(InMemorySeatStore::new()), Arc::new(SystemClock)));
        let orders: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
        let game = GameId::new("g1");
        engine
            .initialize_game(&AuthContext::admin("root"), &game, &StadiumLayout::default_stadium())
            .await
            .unwrap();

        let u1 = AuthContext::customer("u1");
        let seats = [SeatId::new(&game, "VIP", "A", 1), SeatId::new(&game, "VIP", "A", 2)];
        for s in &seats {
            engine.hold(&u1, s).await.unwrap();
        }
        let finalizer = OrderFinalizer::new(
            engine.clone(),
            orders.clone(),
            PaymentOrchestrator::new(Arc::new(SimulatedGateway)),
            Arc::new(PricingEngine::default()),
        );
        let order = finalizer.checkout(&u1, &game, &seats, None, &PaymentDetails::default()).await.unwrap();

        World {
            manager: OrderManager::new(engine.clone(), orders),
            engine,
            order,
        }
    }

    #[tokio::test]
    async fn owner_cancellation_releases_seats() {
        let w = world_with_order().await;
        let u1 = AuthContext::customer("u1");

        assert_eq!(w.manager.cancel(&u1, w.order.id).await.unwrap(), 2);

        for id in w.order.seat_ids() {
            assert_eq!(w.engine.get_seat(&id).await.unwrap().state, SeatState::Available);
        }
        assert!(matches!(w.manager.get(&u1, w.order.id).await, Err(ReservationError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn strangers_cannot_see_or_cancel() {
        let w = world_with_order().await;
        let u2 = AuthContext::customer("u2");

        assert!(matches!(w.manager.get(&u2, w.order.id).await, Err(ReservationError::Forbidden(_))));
        assert!(matches!(w.manager.cancel(&u2, w.order.id).await, Err(ReservationError::Forbidden(_))));
        assert_eq!(w.manager.cancel(&AuthContext::admin("root"), w.order.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn only_admins_change_payment_status() {
        let w = world_with_order().await;
        let customer = w.manager.update_payment_status(&AuthContext::customer("u1"), w.order.id, PaymentStatus::Cancelled).await;
        assert!(matches!(customer, Err(ReservationError::Forbidden(_))));

        let updated = w
            .manager
            .update_payment_status(&AuthContext::admin("root"), w.order.id, PaymentStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(updated.payment_status, PaymentStatus::Cancelled);

        let missing = w.manager.update_payment_status(&AuthContext::admin("root"), Uuid::new_v4(), PaymentStatus::Paid).await;
        assert!(matches!(missing, Err(ReservationError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn ticket_and_listing_for_owner() {
        let w = world_with_order().await;
        let u1 = AuthContext::customer("u1");

        let ticket = w.manager.ticket(&u1, w.order.id).await.unwrap();
        assert_eq!(ticket.code, w.order.ticket_code);
        assert_eq!(w.manager.list_for_user(&u1).await.unwrap().len(), 1);
        assert!(w.manager.list_for_user(&AuthContext::customer("u9")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_leaves_a_cancelled_order_that_can_be_retried() {
        let w = world_with_order().await;
        let u1 = AuthContext::customer("u1");
        let orders = Arc::new(StuckDeletes {
            inner: InMemoryOrderStore::new(),
            broken: std::sync::atomic::AtomicBool::new(true),
        });
        orders.inner.insert(&w.order).await.unwrap();
        let manager = OrderManager::new(w.engine.clone(), orders.clone());

        let err = manager.cancel(&u1, w.order.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::StoreUnavailable(_)));

        let stuck = manager.get(&u1, w.order.id).await.unwrap();
        assert_eq!(stuck.payment_status, PaymentStatus::Cancelled);
        assert!(matches!(manager.ticket(&u1, w.order.id).await, Err(ReservationError::Validation(_))));
        for id in w.order.seat_ids() {
            assert_eq!(w.engine.get_seat(&id).await.unwrap().state, SeatState::Available);
        }

        orders.heal();
        assert_eq!(manager.cancel(&u1, w.order.id).await.unwrap(), 0);
        assert!(matches!(manager.get(&u1, w.order.id).await, Err(ReservationError::OrderNotFound(_))));
    }
}
