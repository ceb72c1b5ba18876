use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use turnstile_core::{
    ChangeFeed, GameId, HolderId, Order, OrderStore, PaymentStatus, Precondition, SaleOutcome, SalePolicy, Seat,
    SeatChange, SeatId, SeatState, SeatStore, StoreError, StoreResult,
};

/// Next row version: `now`, or one microsecond past the previous write if the clock did not move.
pub(crate) fn next_version(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Seat table kept in process memory. Same semantics as the Postgres store.
pub struct InMemorySeatStore {
    seats: RwLock<HashMap<SeatId, Seat>>,
    feed: Option<Arc<dyn ChangeFeed>>,
    offline: AtomicBool,
}

impl InMemorySeatStore {
    pub fn new() -> Self {
        Self {
            seats: RwLock::new(HashMap::new()),
            feed: None,
            offline: AtomicBool::new(false),
        }
    }

    pub fn with_feed(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed: Some(feed),
            ..Self::new()
        }
    }

    /// Makes every call fail with `StoreError::Unavailable` until switched back.
    pub fn simulate_outage(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Removes a seat row, as an administrator would. Emits a delete change.
    pub async fn delete_seat(&self, seat_id: &SeatId, now: DateTime<Utc>) -> StoreResult<bool> {
        self.check_online()?;
        let mut seats = self.seats.write().await;
        match seats.remove(seat_id) {
            Some(seat) => {
                self.publish(SeatChange::delete(seat, now));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("seat store offline".to_string()));
        }
        Ok(())
    }

    fn publish(&self, change: SeatChange) {
        if let Some(feed) = &self.feed {
            feed.publish(change);
        }
    }
}

impl Default for InMemorySeatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SeatStore for InMemorySeatStore {
    async fn seats_for_game(&self, game_id: &GameId) -> StoreResult<Vec<Seat>> {
        self.check_online()?;
        let seats = self.seats.read().await;
        let mut result: Vec<Seat> = seats.values().filter(|s| &s.game_id == game_id).cloned().collect();
        result.sort_by(|a, b| (&a.section, &a.row, a.number).cmp(&(&b.section, &b.row, b.number)));
        Ok(result)
    }

    async fn get_seat(&self, seat_id: &SeatId) -> StoreResult<Option<Seat>> {
        self.check_online()?;
        Ok(self.seats.read().await.get(seat_id).cloned())
    }

    async fn get_seats(&self, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        self.check_online()?;
        let seats = self.seats.read().await;
        Ok(seat_ids.iter().filter_map(|id| seats.get(id).cloned()).collect())
    }

    async fn compare_and_set(
        &self,
        seat_id: &SeatId,
        expected: Precondition,
        next: SeatState,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Seat>> {
        self.check_online()?;
        let mut seats = self.seats.write().await;
        let Some(seat) = seats.get_mut(seat_id) else {
            return Ok(None);
        };
        if !expected.matches(seat, now) {
            debug!("Conditional write on {} skipped: {:?} not satisfied", seat_id, expected);
            return Ok(None);
        }

        seat.state = next;
        seat.updated_at = next_version(seat.updated_at, now);
        let updated = seat.clone();
        self.publish(SeatChange::update(updated.clone()));
        Ok(Some(updated))
    }

    async fn commit_sale(
        &self,
        seat_ids: &[SeatId],
        buyer: &HolderId,
        order_id: Uuid,
        policy: SalePolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<SaleOutcome> {
        self.check_online()?;
        let mut seats = self.seats.write().await;

        let mut seen = HashSet::new();
        let batch: Vec<&SeatId> = seat_ids.iter().filter(|id| seen.insert(*id)).collect();

        let conflicts: Vec<SeatId> = batch
            .iter()
            .filter(|id| !seats.get(**id).is_some_and(|seat| policy.accepts(seat, buyer, now)))
            .map(|id| (*id).clone())
            .collect();
        if !conflicts.is_empty() {
            return Ok(SaleOutcome::Conflict(conflicts));
        }

        let mut sold = Vec::with_capacity(batch.len());
        for id in batch {
            if let Some(seat) = seats.get_mut(id) {
                seat.state = SeatState::Sold {
                    holder: buyer.clone(),
                    order_id,
                };
                seat.updated_at = next_version(seat.updated_at, now);
                sold.push(seat.clone());
            }
        }
        for seat in &sold {
            self.publish(SeatChange::update(seat.clone()));
        }
        Ok(SaleOutcome::Committed(sold))
    }

    async fn initialize_seats(&self, new_seats: Vec<Seat>) -> StoreResult<usize> {
        self.check_online()?;
        let mut seats = self.seats.write().await;
        let mut created = 0;
        for seat in new_seats {
            if seats.contains_key(&seat.id) {
                continue;
            }
            seats.insert(seat.id.clone(), seat.clone());
            self.publish(SeatChange::insert(seat));
            created += 1;
        }
        Ok(created)
    }

    async fn expired_holds(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SeatId>> {
        self.check_online()?;
        let seats = self.seats.read().await;
        let mut expired: Vec<(DateTime<Utc>, SeatId)> = seats
            .values()
            .filter_map(|seat| match &seat.state {
                SeatState::Held { expires_at, .. } if *expires_at <= now => Some((*expires_at, seat.id.clone())),
                _ => None,
            })
            .collect();
        expired.sort();
        Ok(expired.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

/// Order table kept in process memory.
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    offline: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn simulate_outage(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order store offline".to_string()));
        }
        Ok(())
    }

    fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        self.check_online()?;
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::Corrupt(format!("duplicate order id {}", order.id)));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn delete(&self, order_id: Uuid) -> StoreResult<bool> {
        self.check_online()?;
        Ok(self.orders.write().await.remove(&order_id).is_some())
    }

    async fn get(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        self.check_online()?;
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn list_by_user(&self, user_id: &HolderId) -> StoreResult<Vec<Order>> {
        self.check_online()?;
        let orders = self.orders.read().await;
        Ok(Self::newest_first(orders.values().filter(|o| &o.user_id == user_id).cloned().collect()))
    }

    async fn list_by_game(&self, game_id: &GameId) -> StoreResult<Vec<Order>> {
        self.check_online()?;
        let orders = self.orders.read().await;
        Ok(Self::newest_first(orders.values().filter(|o| &o.game_id == game_id).cloned().collect()))
    }

    async fn update_payment_status(&self, order_id: Uuid, status: PaymentStatus) -> StoreResult<bool> {
        self.check_online()?;
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order_id) {
            Some(order) => {
                order.payment_status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::BroadcastChangeFeed;
    use turnstile_core::{FeedMessage, SeatStatus, SeatSnapshot};

    fn seats(game: &GameId, n: u32, now: DateTime<Utc>) -> Vec<Seat> {
        (1..=n).map(|i| Seat::new(game.clone(), "VIP", "A", i, now)).collect()
    }

    fn held_by(holder: &str, now: DateTime<Utc>) -> SeatState {
        SeatState::Held {
            holder: HolderId::new(holder),
            expires_at: now + Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = InMemorySeatStore::new();
        let game = GameId::new("g1");
        let now = Utc::now();

        assert_eq!(store.initialize_seats(seats(&game, 10, now)).await.unwrap(), 10);
        assert_eq!(store.initialize_seats(seats(&game, 10, now)).await.unwrap(), 0);
        assert_eq!(store.seats_for_game(&game).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn conditional_write_applies_once() {
        let store = InMemorySeatStore::new();
        let game = GameId::new("g1");
        let now = Utc::now();
        store.initialize_seats(seats(&game, 1, now)).await.unwrap();
        let id = SeatId::new(&game, "VIP", "A", 1);

        let first = store.compare_and_set(&id, Precondition::Available, held_by("u1", now), now).await.unwrap();
        let second = store.compare_and_set(&id, Precondition::Available, held_by("u2", now), now).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let seat = store.get_seat(&id).await.unwrap().unwrap();
        assert_eq!(seat.state.holder(), Some(&HolderId::new("u1")));
    }

    #[tokio::test]
    async fn versions_increase_even_when_clock_stands_still() {
        let store = InMemorySeatStore::new();
        let game = GameId::new("g1");
        let now = Utc::now();
        store.initialize_seats(seats(&game, 1, now)).await.unwrap();
        let id = SeatId::new(&game, "VIP", "A", 1);

        let held = store.compare_and_set(&id, Precondition::Available, held_by("u1", now), now).await.unwrap().unwrap();
        let released = store
            .compare_and_set(&id, Precondition::HeldBy(HolderId::new("u1")), SeatState::Available, now)
            .await
            .unwrap()
            .unwrap();

        assert!(held.updated_at > now);
        assert!(released.updated_at > held.updated_at);
    }

    #[tokio::test]
    async fn sale_is_all_or_nothing() {
        let store = InMemorySeatStore::new();
        let game = GameId::new("g1");
        let now = Utc::now();
        store.initialize_seats(seats(&game, 2, now)).await.unwrap();
        let a = SeatId::new(&game, "VIP", "A", 1);
        let b = SeatId::new(&game, "VIP", "A", 2);
        store.compare_and_set(&a, Precondition::Available, held_by("u1", now), now).await.unwrap();
        store.compare_and_set(&b, Precondition::Available, held_by("u2", now), now).await.unwrap();

        let outcome = store
            .commit_sale(&[a.clone(), b.clone()], &HolderId::new("u1"), Uuid::new_v4(), SalePolicy::RequireHold, now)
            .await
            .unwrap();

        assert_eq!(outcome, SaleOutcome::Conflict(vec![b.clone()]));
        assert_eq!(store.get_seat(&a).await.unwrap().unwrap().status(), SeatStatus::Held);
    }

    #[tokio::test]
    async fn unknown_seats_conflict() {
        let store = InMemorySeatStore::new();
        let ghost = SeatId::from("g1:VIP-Z-99");
        let outcome = store
            .commit_sale(&[ghost.clone()], &HolderId::new("u1"), Uuid::new_v4(), SalePolicy::AllowAvailable, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, SaleOutcome::Conflict(vec![ghost]));
    }

    #[tokio::test]
    async fn writes_are_published_to_the_feed() {
        let feed = Arc::new(BroadcastChangeFeed::new(16));
        let store = InMemorySeatStore::with_feed(feed.clone());
        let game = GameId::new("g1");
        let mut sub = feed.subscribe(&game);
        let now = Utc::now();

        store.initialize_seats(seats(&game, 1, now)).await.unwrap();
        let id = SeatId::new(&game, "VIP", "A", 1);
        store.delete_seat(&id, now).await.unwrap();

        assert!(matches!(sub.try_recv(), Some(FeedMessage::Change(c)) if c.kind == turnstile_core::ChangeKind::Insert));
        assert!(matches!(sub.try_recv(), Some(FeedMessage::Change(c)) if c.kind == turnstile_core::ChangeKind::Delete));
    }

    #[tokio::test]
    async fn expired_holds_are_listed_oldest_first() {
        let store = InMemorySeatStore::new();
        let game = GameId::new("g1");
        let now = Utc::now();
        store.initialize_seats(seats(&game, 3, now)).await.unwrap();
        for (n, minutes) in [(1, 10), (2, 5), (3, 30)] {
            let id = SeatId::new(&game, "VIP", "A", n);
            let state = SeatState::Held {
                holder: HolderId::new("u1"),
                expires_at: now + Duration::minutes(minutes),
            };
            store.compare_and_set(&id, Precondition::Available, state, now).await.unwrap();
        }

        let expired = store.expired_holds(now + Duration::minutes(20), 10).await.unwrap();
        assert_eq!(expired, vec![SeatId::new(&game, "VIP", "A", 2), SeatId::new(&game, "VIP", "A", 1)]);
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable() {
        let store = InMemoryOrderStore::new();
        store.simulate_outage(true);
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn orders_are_listed_per_user_newest_first() {
        let store = InMemoryOrderStore::new();
        let game = GameId::new("g1");
        let now = Utc::now();
        let seat = Seat::new(game.clone(), "VIP", "A", 1, now);
        let older = Order::new(Uuid::new_v4(), HolderId::new("u1"), game.clone(), vec![SeatSnapshot::capture(&seat, 100)], "AOA", now - Duration::hours(1));
        let newer = Order::new(Uuid::new_v4(), HolderId::new("u1"), game.clone(), vec![], "AOA", now);
        let other = Order::new(Uuid::new_v4(), HolderId::new("u2"), game.clone(), vec![], "AOA", now);
        for order in [&older, &newer, &other] {
            store.insert(order).await.unwrap();
        }

        let mine = store.list_by_user(&HolderId::new("u1")).await.unwrap();
        assert_eq!(mine.iter().map(|o| o.id).collect::<Vec<_>>(), vec![newer.id, older.id]);
        assert!(store.insert(&older).await.is_err());
        assert_eq!(store.list_by_game(&game).await.unwrap().len(), 3);
    }
}
