use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use turnstile_core::retry::{retry_with_backoff, RetryPolicy};
use turnstile_core::{
    AuthContext, Clock, GameId, Precondition, ReservationError, ReservationResult, SaleOutcome, SalePolicy, Seat,
    SeatId, SeatState, SeatStore,
};

use crate::layout::StadiumLayout;

pub const DEFAULT_HOLD_TTL_MINUTES: i64 = 15;

/// Owns every seat state transition. All writes are conditional; the store is
/// the serialization point between concurrent buyers.
pub struct ReservationEngine {
    store: Arc<dyn SeatStore>,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
    sale_policy: SalePolicy,
    read_retry: RetryPolicy,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn SeatStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            hold_ttl: Duration::minutes(DEFAULT_HOLD_TTL_MINUTES),
            sale_policy: SalePolicy::default(),
            read_retry: RetryPolicy::default(),
        }
    }

    pub fn with_hold_ttl(mut self, ttl: Duration) -> Self {
        self.hold_ttl = ttl;
        self
    }

    pub fn with_sale_policy(mut self, policy: SalePolicy) -> Self {
        self.sale_policy = policy;
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    pub fn sale_policy(&self) -> SalePolicy {
        self.sale_policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn hold(&self, ctx: &AuthContext, seat_id: &SeatId) -> ReservationResult<Seat> {
        self.hold_for(ctx, seat_id, self.hold_ttl).await
    }

    /// available -> held. Takes over an expired hold, refreshes the caller's own hold.
    pub async fn hold_for(&self, ctx: &AuthContext, seat_id: &SeatId, ttl: Duration) -> ReservationResult<Seat> {
        let holder = ctx.require_user()?.clone();
        if ttl <= Duration::zero() {
            return Err(ReservationError::Validation("hold ttl must be positive".to_string()));
        }

        let now = self.clock.now();
        let next = SeatState::Held {
            holder: holder.clone(),
            expires_at: now + ttl,
        };

        if let Some(seat) = self.store.compare_and_set(seat_id, Precondition::Available, next.clone(), now).await? {
            info!("Seat {} held by {} until {}", seat_id, holder, now + ttl);
            return Ok(seat);
        }

        // Lost the fast path; the current row decides which conditional write may still apply.
        let current = self
            .store
            .get_seat(seat_id)
            .await?
            .ok_or_else(|| ReservationError::SeatNotFound(seat_id.clone()))?;

        let fallback = match &current.state {
            SeatState::Held { holder: h, .. } if *h == holder => Some(Precondition::HeldBy(holder.clone())),
            SeatState::Held { expires_at, .. } if *expires_at <= now => Some(Precondition::HoldExpired),
            _ => None,
        };

        if let Some(expected) = fallback {
            let refresh = expected == Precondition::HeldBy(holder.clone());
            if let Some(seat) = self.store.compare_and_set(seat_id, expected, next, now).await? {
                if refresh {
                    debug!("Seat {} hold refreshed by {}", seat_id, holder);
                } else {
                    info!("Seat {} taken over from an expired hold by {}", seat_id, holder);
                }
                return Ok(seat);
            }
        }

        warn!("Hold on {} by {} lost: seat is {}", seat_id, holder, current.status());
        Err(ReservationError::SeatUnavailable(seat_id.clone()))
    }

    /// held -> available, only for the current holder.
    pub async fn release(&self, ctx: &AuthContext, seat_id: &SeatId) -> ReservationResult<Seat> {
        let holder = ctx.require_user()?.clone();
        let now = self.clock.now();

        match self
            .store
            .compare_and_set(seat_id, Precondition::HeldBy(holder.clone()), SeatState::Available, now)
            .await?
        {
            Some(seat) => {
                info!("Seat {} released by {}", seat_id, holder);
                Ok(seat)
            }
            None => {
                if self.store.get_seat(seat_id).await?.is_none() {
                    return Err(ReservationError::SeatNotFound(seat_id.clone()));
                }
                warn!("Release of {} refused: not held by {}", seat_id, holder);
                Err(ReservationError::NotHolder {
                    seat_id: seat_id.clone(),
                    holder,
                })
            }
        }
    }

    /// held (expired) -> available. Returns whether anything changed.
    pub async fn expire(&self, seat_id: &SeatId) -> ReservationResult<bool> {
        let now = self.clock.now();
        let expired = self
            .store
            .compare_and_set(seat_id, Precondition::HoldExpired, SeatState::Available, now)
            .await?
            .is_some();
        if expired {
            debug!("Seat {} hold expired", seat_id);
        }
        Ok(expired)
    }

    /// Expires up to `limit` stale holds. Per-seat failures are logged and skipped.
    pub async fn sweep_expired(&self, limit: usize) -> ReservationResult<usize> {
        let now = self.clock.now();
        let store = &self.store;
        let candidates =
            retry_with_backoff(&self.read_retry, "list expired holds", || store.expired_holds(now, limit)).await?;

        let mut expired = 0;
        for seat_id in &candidates {
            match self.expire(seat_id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to expire hold on {}: {}", seat_id, e),
            }
        }
        if expired > 0 {
            info!("Expired {} stale hold(s)", expired);
        }
        Ok(expired)
    }

    /// All-or-nothing sale of `seat_ids` to the caller under the engine's sale policy.
    pub async fn mark_sold(&self, ctx: &AuthContext, seat_ids: &[SeatId], order_id: Uuid) -> ReservationResult<Vec<Seat>> {
        let buyer = ctx.require_user()?;
        let mut seen = HashSet::new();
        let batch: Vec<SeatId> = seat_ids.iter().filter(|id| seen.insert(*id)).cloned().collect();
        if batch.is_empty() {
            return Err(ReservationError::Validation("no seats to sell".to_string()));
        }

        let now = self.clock.now();
        match self.store.commit_sale(&batch, buyer, order_id, self.sale_policy, now).await? {
            SaleOutcome::Committed(seats) => Ok(seats),
            SaleOutcome::Conflict(conflicts) => {
                warn!("Sale {} for {} aborted, {} seat(s) lost", order_id, buyer, conflicts.len());
                Err(ReservationError::SeatConflict(conflicts))
            }
        }
    }

    /// Undoes a sale that could not be completed: each seat goes back to the state it had
    /// before `mark_sold`. Attempts every seat and reports the first failure.
    pub async fn restore_holds(&self, order_id: Uuid, prior: &[Seat]) -> ReservationResult<usize> {
        let now = self.clock.now();
        let mut restored = 0;
        let mut first_error = None;

        for seat in prior {
            let previous = match &seat.state {
                SeatState::Sold { .. } => continue,
                state => state.clone(),
            };
            match self.store.compare_and_set(&seat.id, Precondition::SoldTo(order_id), previous, now).await {
                Ok(Some(_)) => restored += 1,
                Ok(None) => warn!("Seat {} no longer sold to {}, not restored", seat.id, order_id),
                Err(e) => {
                    error!("Failed to restore seat {} after order {}: {}", seat.id, order_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(restored),
        }
    }

    /// sold -> available for every seat still sold to `order_id`. Safe to repeat.
    pub async fn cancel_sale(&self, order_id: Uuid, seat_ids: &[SeatId]) -> ReservationResult<usize> {
        let now = self.clock.now();
        let mut reverted = 0;
        for seat_id in seat_ids {
            if self
                .store
                .compare_and_set(seat_id, Precondition::SoldTo(order_id), SeatState::Available, now)
                .await?
                .is_some()
            {
                reverted += 1;
            }
        }
        info!("Order {} cancelled, {} seat(s) back on sale", order_id, reverted);
        Ok(reverted)
    }

    /// Creates the seats of `layout` for a game. Existing seats are left untouched.
    pub async fn initialize_game(
        &self,
        ctx: &AuthContext,
        game_id: &GameId,
        layout: &StadiumLayout,
    ) -> ReservationResult<usize> {
        ctx.require_admin()?;
        layout.validate().map_err(ReservationError::Validation)?;

        let seats = layout.seats_for(game_id, self.clock.now());
        let created = self.store.initialize_seats(seats).await?;
        info!("Game {} initialized: {} new seat(s) of {}", game_id, created, layout.capacity());
        Ok(created)
    }

    pub async fn seats_for_game(&self, game_id: &GameId) -> ReservationResult<Vec<Seat>> {
        let store = &self.store;
        let seats = retry_with_backoff(&self.read_retry, "load seats", || store.seats_for_game(game_id)).await?;
        Ok(seats)
    }

    pub async fn get_seats(&self, seat_ids: &[SeatId]) -> ReservationResult<Vec<Seat>> {
        let store = &self.store;
        Ok(retry_with_backoff(&self.read_retry, "load seats", || store.get_seats(seat_ids)).await?)
    }

    pub async fn get_seat(&self, seat_id: &SeatId) -> ReservationResult<Seat> {
        self.store
            .get_seat(seat_id)
            .await?
            .ok_or_else(|| ReservationError::SeatNotFound(seat_id.clone()))
    }
}
