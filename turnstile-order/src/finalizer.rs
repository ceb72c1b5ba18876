use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use turnstile_catalog::{PricingEngine, ReservationEngine};
use turnstile_core::payment::PaymentDetails;
use turnstile_core::{
    AuthContext, BuyerContact, GameId, Order, OrderStore, PaymentStatus, ReservationError, ReservationResult, Seat,
    SeatId, SeatSnapshot,
};
use turnstile_selection::SelectionView;
use turnstile_shared::models::events::{OrderEvent, OrderPaidEvent};

use crate::orchestrator::PaymentOrchestrator;

/// Turns a set of held seats into a paid order. Either every seat is sold and
/// the order exists, or nothing changed.
pub struct OrderFinalizer {
    engine: Arc<ReservationEngine>,
    orders: Arc<dyn OrderStore>,
    payments: PaymentOrchestrator,
    pricing: Arc<PricingEngine>,
    currency: String,
    events: Option<broadcast::Sender<OrderEvent>>,
}

impl OrderFinalizer {
    pub fn new(
        engine: Arc<ReservationEngine>,
        orders: Arc<dyn OrderStore>,
        payments: PaymentOrchestrator,
        pricing: Arc<PricingEngine>,
    ) -> Self {
        Self {
            engine,
            orders,
            payments,
            pricing,
            currency: "AOA".to_string(),
            events: None,
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_string();
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<OrderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sells `seat_ids` to the caller and charges for them.
    pub async fn checkout(
        &self,
        ctx: &AuthContext,
        game_id: &GameId,
        seat_ids: &[SeatId],
        contact: Option<BuyerContact>,
        payment: &PaymentDetails,
    ) -> ReservationResult<Order> {
        self.checkout_seats(ctx, game_id, seat_ids, contact, payment).await.map(|(order, _)| order)
    }

    /// Checks out the session's selection. On success the selection is cleared; on
    /// `SeatConflict` only the lost seats leave it and the view is reconciled.
    pub async fn finalize(
        &self,
        view: &SelectionView,
        contact: Option<BuyerContact>,
        payment: &PaymentDetails,
    ) -> ReservationResult<Order> {
        let selection = view.selected_seats();
        match self.checkout_seats(view.context(), view.game_id(), &selection, contact, payment).await {
            Ok((order, sold)) => {
                view.record_confirmed(&sold);
                view.clear_selection();
                Ok(order)
            }
            Err(e) => {
                if let ReservationError::SeatConflict(lost) = &e {
                    view.remove_from_selection(lost);
                }
                if e.requires_reconcile() {
                    if let Err(re) = view.reconcile().await {
                        error!("Reconcile after failed checkout: {}", re);
                    }
                }
                Err(e)
            }
        }
    }

    async fn checkout_seats(
        &self,
        ctx: &AuthContext,
        game_id: &GameId,
        seat_ids: &[SeatId],
        contact: Option<BuyerContact>,
        payment: &PaymentDetails,
    ) -> ReservationResult<(Order, Vec<Seat>)> {
        let buyer = ctx.require_user()?.clone();
        // A seat listed twice is still one seat.
        let mut seen = HashSet::new();
        let seat_ids: Vec<SeatId> = seat_ids.iter().filter(|id| seen.insert(*id)).cloned().collect();
        if seat_ids.is_empty() {
            return Err(ReservationError::Validation("selection is empty".to_string()));
        }

        // Pre-sale rows, for prices and to undo the sale if anything after it fails.
        let prior = self.engine.get_seats(&seat_ids).await?;
        if let Some(stray) = prior.iter().find(|s| &s.game_id != game_id) {
            return Err(ReservationError::Validation(format!("seat {} is not part of game {}", stray.id, game_id)));
        }

        let order_id = Uuid::new_v4();
        let sold = self.engine.mark_sold(ctx, &seat_ids, order_id).await?;

        let by_id: HashMap<&SeatId, &Seat> = sold.iter().map(|s| (&s.id, s)).collect();
        let snapshots: Vec<SeatSnapshot> = seat_ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|seat| SeatSnapshot::capture(seat, self.pricing.price_of(seat)))
            .collect();
        let mut order = Order::new(order_id, buyer.clone(), game_id.clone(), snapshots, &self.currency, self.engine.clock().now());
        order.contact = contact;

        if let Err(e) = self.orders.insert(&order).await {
            error!("Order {} could not be stored, undoing sale: {}", order_id, e);
            self.undo_sale(order_id, &prior).await;
            return Err(e.into());
        }

        if let Err(e) = self.payments.charge_order(&order, payment).await {
            warn!("Payment for order {} failed, releasing seats back to {}: {}", order_id, buyer, e);
            self.undo_sale(order_id, &prior).await;
            if let Err(de) = self.orders.delete(order_id).await {
                error!("Failed to delete unpaid order {}: {}", order_id, de);
            }
            return Err(e);
        }

        match self.orders.update_payment_status(order_id, PaymentStatus::Paid).await {
            Ok(_) => order.payment_status = PaymentStatus::Paid,
            Err(e) => error!("Order {} charged but still pending: {}", order_id, e),
        }

        info!("Order {} for {} completed: {} seat(s), total {}", order_id, buyer, order.seats.len(), order.total);
        self.publish(&order);
        Ok((order, sold))
    }

    async fn undo_sale(&self, order_id: Uuid, prior: &[Seat]) {
        if let Err(e) = self.engine.restore_holds(order_id, prior).await {
            error!("Seats of order {} could not all be restored: {}", order_id, e);
        }
    }

    fn publish(&self, order: &Order) {
        if let Some(events) = &self.events {
            let _ = events.send(OrderEvent::Paid(OrderPaidEvent {
                order_id: order.id,
                game_id: order.game_id.to_string(),
                customer_id: order.user_id.to_string(),
                seat_ids: order.seat_ids().iter().map(|id| id.to_string()).collect(),
                total: order.total,
                timestamp: order.created_at.timestamp(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{SimulatedGateway, DECLINE_TOKEN};
    use chrono::{Duration, Utc};
    use turnstile_catalog::StadiumLayout;
    use turnstile_core::retry::RetryPolicy;
    use turnstile_core::{Clock, HolderId, ManualClock, SeatState, SeatStatus};
    use turnstile_store::{BroadcastChangeFeed, InMemoryOrderStore, InMemorySeatStore};

    struct World {
        engine: Arc<ReservationEngine>,
        orders: Arc<InMemoryOrderStore>,
        finalizer: Arc<OrderFinalizer>,
        feed: Arc<BroadcastChangeFeed>,
        clock: Arc<ManualClock>,
        game: GameId,
    }

    async fn world() -> World {
        let feed = Arc::new(BroadcastChangeFeed::new(1024));
        let store = Arc::new(InMemorySeatStore::with_feed(feed.clone()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = Arc::new(ReservationEngine::new(store, clock.clone()).with_read_retry(RetryPolicy::none()));
        let orders = Arc::new(InMemoryOrderStore::new());
        let game = GameId::new("g1");
        engine
            .initialize_game(&AuthContext::admin("root"), &game, &StadiumLayout::default_stadium())
            .await
            .unwrap();
        let finalizer = Arc::new(OrderFinalizer::new(
            engine.clone(),
            orders.clone(),
            PaymentOrchestrator::new(Arc::new(SimulatedGateway)),
            Arc::new(PricingEngine::default()),
        ));
        World {
            engine,
            orders,
            finalizer,
            feed,
            clock,
            game,
        }
    }

    fn card() -> PaymentDetails {
        PaymentDetails {
            method: "card".to_string(),
            token: "tok_visa".to_string(),
        }
    }

    fn vip(game: &GameId, row: &str, n: u32) -> SeatId {
        SeatId::new(game, "VIP", row, n)
    }

    async fn view_for(w: &World, user: &str) -> SelectionView {
        SelectionView::open(
            AuthContext::customer(user),
            w.game.clone(),
            w.engine.clone(),
            w.orders.clone(),
            w.feed.as_ref(),
            Arc::new(PricingEngine::default()),
        )
        .await
        .unwrap()
        .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn finalize_sells_selection_and_clears_it() {
        let w = world().await;
        let view = view_for(&w, "u1").await;
        let a1 = vip(&w.game, "A", 1);
        let b1 = vip(&w.game, "B", 1);
        view.hold(&a1).await.unwrap();
        view.hold(&b1).await.unwrap();

        let order = w.finalizer.finalize(&view, None, &card()).await.unwrap();

        assert_eq!(order.total, 10_000 + 9_800);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert!(view.selected_seats().is_empty());
        for id in [&a1, &b1] {
            let seat = w.engine.get_seat(id).await.unwrap();
            assert_eq!(seat.state, SeatState::Sold { holder: HolderId::new("u1"), order_id: order.id });
        }
        assert_eq!(w.orders.get(order.id).await.unwrap().unwrap().payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn expired_seat_in_cart_conflicts_and_keeps_other_hold() {
        let w = world().await;
        let view = view_for(&w, "u1").await;
        let a1 = vip(&w.game, "A", 1);
        let a2 = vip(&w.game, "A", 2);
        view.hold(&a1).await.unwrap();
        view.hold(&a2).await.unwrap();

        // A2's hold runs out and another buyer takes it; A1 is re-held so it stays valid.
        w.clock.advance(Duration::minutes(16));
        w.engine.hold(&AuthContext::customer("u1"), &a1).await.unwrap();
        w.engine.hold(&AuthContext::customer("u2"), &a2).await.unwrap();

        let err = w.finalizer.finalize(&view, None, &card()).await.unwrap_err();

        assert_eq!(err.conflicting_seats(), &[a2.clone()][..]);
        assert!(w.engine.get_seat(&a1).await.unwrap().is_held_by(&HolderId::new("u1"), w.clock.now()));
        assert!(w.orders.list_by_user(&HolderId::new("u1")).await.unwrap().is_empty());
        assert_eq!(view.selected_seats(), vec![a1]);
    }

    #[tokio::test]
    async fn disjoint_checkouts_both_succeed() {
        let w = world().await;
        let u1 = AuthContext::customer("u1");
        let u2 = AuthContext::customer("u2");
        let mine = [vip(&w.game, "C", 1), vip(&w.game, "C", 2)];
        let theirs = [vip(&w.game, "D", 1), vip(&w.game, "D", 2)];
        for s in &mine {
            w.engine.hold(&u1, s).await.unwrap();
        }
        for s in &theirs {
            w.engine.hold(&u2, s).await.unwrap();
        }

        let payment = card();
        let (first, second) = tokio::join!(
            w.finalizer.checkout(&u1, &w.game, &mine, None, &payment),
            w.finalizer.checkout(&u2, &w.game, &theirs, None, &payment),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.id, second.id);
        assert!(first.seat_ids().iter().all(|id| !second.contains(id)));
        assert_eq!(w.orders.list_by_game(&w.game).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn declined_payment_restores_holds() {
        let w = world().await;
        let u1 = AuthContext::customer("u1");
        let seat = vip(&w.game, "E", 3);
        w.engine.hold(&u1, &seat).await.unwrap();
        let decline = PaymentDetails {
            method: "card".to_string(),
            token: DECLINE_TOKEN.to_string(),
        };

        let err = w.finalizer.checkout(&u1, &w.game, &[seat.clone()], None, &decline).await.unwrap_err();

        assert!(matches!(err, ReservationError::PaymentDeclined(_)));
        let current = w.engine.get_seat(&seat).await.unwrap();
        assert!(current.is_held_by(&HolderId::new("u1"), w.clock.now()));
        assert!(w.orders.list_by_game(&w.game).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn order_store_outage_undoes_sale() {
        let w = world().await;
        let u1 = AuthContext::customer("u1");
        let seat = vip(&w.game, "E", 4);
        w.engine.hold(&u1, &seat).await.unwrap();
        w.orders.simulate_outage(true);

        let err = w.finalizer.checkout(&u1, &w.game, &[seat.clone()], None, &card()).await.unwrap_err();

        assert!(matches!(err, ReservationError::StoreUnavailable(_)));
        assert_eq!(w.engine.get_seat(&seat).await.unwrap().status(), SeatStatus::Held);
    }

    #[tokio::test]
    async fn empty_or_anonymous_checkout_is_rejected() {
        let w = world().await;
        let empty = w.finalizer.checkout(&AuthContext::customer("u1"), &w.game, &[], None, &card()).await;
        assert!(matches!(empty, Err(ReservationError::Validation(_))));

        let anon = w
            .finalizer
            .checkout(&AuthContext::anonymous(), &w.game, &[vip(&w.game, "A", 1)], None, &card())
            .await;
        assert!(matches!(anon, Err(ReservationError::Unauthenticated)));
    }

    #[tokio::test]
    async fn paid_orders_are_announced() {
        let w = world().await;
        let (tx, mut rx) = broadcast::channel(8);
        let finalizer = OrderFinalizer::new(
            w.engine.clone(),
            w.orders.clone(),
            PaymentOrchestrator::new(Arc::new(SimulatedGateway)),
            Arc::new(PricingEngine::default()),
        )
        .with_events(tx);
        let u1 = AuthContext::customer("u1");
        let seat = vip(&w.game, "A", 7);
        w.engine.hold(&u1, &seat).await.unwrap();

        let order = finalizer.checkout(&u1, &w.game, &[seat], None, &card()).await.unwrap();

        match rx.recv().await.unwrap() {
            OrderEvent::Paid(e) => assert_eq!(e.order_id, order.id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn repeated_seat_is_sold_and_charged_once() {
        let w = world().await;
        let u1 = AuthContext::customer("u1");
        let seat = vip(&w.game, "A", 1);
        w.engine.hold(&u1, &seat).await.unwrap();

        let order = w
            .finalizer
            .checkout(&u1, &w.game, &[seat.clone(), seat.clone()], None, &card())
            .await
            .unwrap();

        assert_eq!(order.seats.len(), 1);
        assert_eq!(order.total, 10_000);
        assert_eq!(order.seat_ids(), vec![seat]);
    }
}
