use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{Order, PaymentStatus};
use crate::seat::{GameId, HolderId, Seat, SeatId, SeatState};
use crate::StoreResult;

/// Condition the current row must satisfy for a conditional write to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// `status = 'available'`
    Available,
    /// `status = 'held' AND holder_id = $holder`, expired or not.
    HeldBy(HolderId),
    /// `status = 'held' AND hold_expires_at <= now`
    HoldExpired,
    /// `status = 'sold' AND order_id = $order`
    SoldTo(Uuid),
}

impl Precondition {
    pub fn matches(&self, seat: &Seat, now: DateTime<Utc>) -> bool {
        match (self, &seat.state) {
            (Precondition::Available, SeatState::Available) => true,
            (Precondition::HeldBy(expected), SeatState::Held { holder, .. }) => holder == expected,
            (Precondition::HoldExpired, SeatState::Held { expires_at, .. }) => *expires_at <= now,
            (Precondition::SoldTo(expected), SeatState::Sold { order_id, .. }) => order_id == expected,
            _ => false,
        }
    }
}

/// Which seats a buyer may convert to sold at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalePolicy {
    /// Only seats the buyer holds with an unexpired hold.
    #[default]
    RequireHold,
    /// Seats the buyer holds, or seats that are available at commit time.
    AllowAvailable,
}

impl SalePolicy {
    pub fn accepts(&self, seat: &Seat, buyer: &HolderId, now: DateTime<Utc>) -> bool {
        if seat.is_held_by(buyer, now) {
            return true;
        }
        match self {
            SalePolicy::RequireHold => false,
            SalePolicy::AllowAvailable => {
                matches!(seat.state, SeatState::Available) || seat.hold_expired(now)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleOutcome {
    /// Every seat of the batch is now sold to the order.
    Committed(Vec<Seat>),
    /// Nothing was written; these seats failed the sale policy (or do not exist).
    Conflict(Vec<SeatId>),
}

/// Durable seat table. Every state change goes through a conditional write.
#[async_trait]
pub trait SeatStore: Send + Sync {
    async fn seats_for_game(&self, game_id: &GameId) -> StoreResult<Vec<Seat>>;

    async fn get_seat(&self, seat_id: &SeatId) -> StoreResult<Option<Seat>>;

    async fn get_seats(&self, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>>;

    /// Find-and-set: writes `next` only if the row satisfies `expected`.
    /// Returns the updated row, or `None` when zero rows matched.
    async fn compare_and_set(
        &self,
        seat_id: &SeatId,
        expected: Precondition,
        next: SeatState,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Seat>>;

    /// Sells every seat in `seat_ids` to `order_id`, or none of them.
    async fn commit_sale(
        &self,
        seat_ids: &[SeatId],
        buyer: &HolderId,
        order_id: Uuid,
        policy: SalePolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<SaleOutcome>;

    /// Inserts seats whose id is not present yet. Returns how many were created.
    async fn initialize_seats(&self, seats: Vec<Seat>) -> StoreResult<usize>;

    /// Held seats whose expiry is at or before `now`, oldest first.
    async fn expired_holds(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SeatId>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> StoreResult<()>;

    /// Returns false when no order had this id.
    async fn delete(&self, order_id: Uuid) -> StoreResult<bool>;

    async fn get(&self, order_id: Uuid) -> StoreResult<Option<Order>>;

    async fn list_by_user(&self, user_id: &HolderId) -> StoreResult<Vec<Order>>;

    async fn list_by_game(&self, game_id: &GameId) -> StoreResult<Vec<Order>>;

    async fn update_payment_status(&self, order_id: Uuid, status: PaymentStatus) -> StoreResult<bool>;
}
