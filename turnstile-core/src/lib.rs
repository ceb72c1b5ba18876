pub mod clock;
pub mod feed;
pub mod identity;
pub mod order;
pub mod payment;
pub mod repository;
pub mod retry;
pub mod seat;

pub use clock::{Clock, ManualClock, SystemClock};
pub use feed::{ChangeFeed, ChangeKind, FeedMessage, SeatChange, Subscription};
pub use identity::{AuthContext, Role};
pub use order::{BuyerContact, Order, PaymentStatus, SeatSnapshot};
pub use repository::{OrderStore, Precondition, SaleOutcome, SalePolicy, SeatStore};
pub use seat::{GameId, HolderId, Seat, SeatId, SeatState, SeatStatus};

use uuid::Uuid;

/// Failure talking to a seat or order backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReservationError {
    /// Lost the race for a hold.
    #[error("seat {0} is not available")]
    SeatUnavailable(SeatId),
    /// Local state is stale: the seat is not held by this session.
    #[error("seat {seat_id} is not held by {holder}")]
    NotHolder { seat_id: SeatId, holder: HolderId },
    /// One or more seats of a checkout batch are no longer valid. Nothing was sold.
    #[error("seats no longer available for checkout: {}", join_ids(.0))]
    SeatConflict(Vec<SeatId>),
    #[error("sign in required")]
    Unauthenticated,
    #[error("not allowed: {0}")]
    Forbidden(String),
    #[error("seat {0} not found")]
    SeatNotFound(SeatId),
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("payment declined: {0}")]
    PaymentDeclined(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl ReservationError {
    /// True when inventory may have changed under the caller and its local view must be refreshed.
    pub fn requires_reconcile(&self) -> bool {
        matches!(
            self,
            ReservationError::SeatUnavailable(_)
                | ReservationError::NotHolder { .. }
                | ReservationError::SeatConflict(_)
                | ReservationError::SeatNotFound(_)
                | ReservationError::StoreUnavailable(_)
        )
    }

    pub fn conflicting_seats(&self) -> &[SeatId] {
        match self {
            ReservationError::SeatConflict(ids) => ids,
            _ => &[],
        }
    }
}

fn join_ids(ids: &[SeatId]) -> String {
    ids.iter().map(SeatId::as_str).collect::<Vec<_>>().join(", ")
}

pub type ReservationResult<T> = Result<T, ReservationError>;
