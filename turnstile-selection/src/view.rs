use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use turnstile_catalog::{PricingEngine, ReservationEngine};
use turnstile_core::retry::{retry_with_backoff, RetryPolicy};
use turnstile_core::{
    AuthContext, ChangeFeed, Clock, FeedMessage, GameId, HolderId, OrderStore, ReservationError, ReservationResult,
    Seat, SeatChange, SeatId, SeatState, Subscription,
};

use crate::cache::SeatCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Available,
    SelectedByMe,
    Unavailable,
}

/// How `viewer` should see `seat` at `now`. Sold overlay wins over the row status.
pub fn display_status(seat: &Seat, sold_by_order: bool, viewer: Option<&HolderId>, now: DateTime<Utc>) -> DisplayStatus {
    if sold_by_order {
        return DisplayStatus::Unavailable;
    }
    match seat.effective_state(now) {
        SeatState::Available => DisplayStatus::Available,
        SeatState::Held { holder, .. } if Some(&holder) == viewer => DisplayStatus::SelectedByMe,
        SeatState::Held { .. } | SeatState::Sold { .. } => DisplayStatus::Unavailable,
    }
}

/// A seat row as the presentation layer renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    pub seat_id: SeatId,
    pub section: String,
    pub row: String,
    pub number: u32,
    pub price: i64,
    pub status: DisplayStatus,
    pub pending: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("seat {0} already has a request in flight")]
    InFlight(SeatId),
    #[error(transparent)]
    Reservation(#[from] ReservationError),
}

impl SelectionError {
    pub fn reservation(&self) -> Option<&ReservationError> {
        match self {
            SelectionError::Reservation(e) => Some(e),
            SelectionError::InFlight(_) => None,
        }
    }
}

#[derive(Default)]
struct ViewState {
    cache: SeatCache,
    sold_overlay: HashSet<SeatId>,
    selection: BTreeSet<SeatId>,
    in_flight: HashSet<SeatId>,
}

/// Marks a seat as having an intent in flight until dropped.
struct InFlightGuard<'a> {
    view: &'a SelectionView,
    seat_id: SeatId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.view.state().in_flight.remove(&self.seat_id);
    }
}

/// Per-session projection of one game's seats.
///
/// Never a source of truth: every write goes through the [`ReservationEngine`],
/// and local state only changes after the engine confirms. Feed changes are
/// queued on the subscription and merged on the caller's task by [`pump`](Self::pump)
/// or [`next_remote`](Self::next_remote).
pub struct SelectionView {
    game_id: GameId,
    ctx: AuthContext,
    engine: Arc<ReservationEngine>,
    orders: Arc<dyn OrderStore>,
    pricing: Arc<PricingEngine>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    state: Mutex<ViewState>,
    feed: tokio::sync::Mutex<Subscription>,
}

impl SelectionView {
    /// Subscribes first, then loads, so no change between the two is lost.
    pub async fn open(
        ctx: AuthContext,
        game_id: GameId,
        engine: Arc<ReservationEngine>,
        orders: Arc<dyn OrderStore>,
        feed: &dyn ChangeFeed,
        pricing: Arc<PricingEngine>,
    ) -> ReservationResult<Self> {
        let subscription = feed.subscribe(&game_id);
        let clock = engine.clock().clone();
        let view = Self {
            game_id,
            ctx,
            engine,
            orders,
            pricing,
            clock,
            retry: RetryPolicy::default(),
            state: Mutex::new(ViewState::default()),
            feed: tokio::sync::Mutex::new(subscription),
        };
        view.reconcile().await?;
        Ok(view)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub fn context(&self) -> &AuthContext {
        &self.ctx
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn project(&self, seat_id: &SeatId) -> DisplayStatus {
        let now = self.clock.now();
        let state = self.state();
        match state.cache.get(seat_id) {
            Some(seat) => display_status(seat, state.sold_overlay.contains(seat_id), self.ctx.user_id(), now),
            None => DisplayStatus::Unavailable,
        }
    }

    /// True while a hold or release for the seat awaits the engine.
    pub fn is_pending(&self, seat_id: &SeatId) -> bool {
        self.state().in_flight.contains(seat_id)
    }

    /// Every known seat with its price and display status, in seating order.
    pub fn snapshot(&self) -> Vec<SeatView> {
        let now = self.clock.now();
        let state = self.state();
        let mut seats: Vec<SeatView> = state
            .cache
            .iter()
            .map(|seat| SeatView {
                seat_id: seat.id.clone(),
                section: seat.section.clone(),
                row: seat.row.clone(),
                number: seat.number,
                price: self.pricing.price_of(seat),
                status: display_status(seat, state.sold_overlay.contains(&seat.id), self.ctx.user_id(), now),
                pending: state.in_flight.contains(&seat.id),
            })
            .collect();
        seats.sort_by(|a, b| (&a.section, &a.row, a.number).cmp(&(&b.section, &b.row, b.number)));
        seats
    }

    pub fn apply_remote_event(&self, change: SeatChange) -> bool {
        if change.game_id() != &self.game_id {
            return false;
        }
        let seat_id = change.seat.id.clone();
        let applied = self.state().cache.apply(change);
        if applied {
            debug!("Merged remote change for {}", seat_id);
        }
        applied
    }

    /// Merges every queued feed message without waiting. Returns how many changes applied.
    pub async fn pump(&self) -> ReservationResult<usize> {
        let mut applied = 0;
        let mut lagged = false;
        {
            let mut feed = self.feed.lock().await;
            while let Some(message) = feed.try_recv() {
                match message {
                    FeedMessage::Change(change) => {
                        if self.apply_remote_event(change) {
                            applied += 1;
                        }
                    }
                    FeedMessage::Lagged(missed) => {
                        warn!("Selection view for {} missed {} change(s)", self.game_id, missed);
                        lagged = true;
                    }
                }
            }
        }
        if lagged {
            self.reconcile().await?;
        }
        Ok(applied)
    }

    /// Waits for the next change of this game and merges it. `None` once the feed is closed.
    pub async fn next_remote(&self) -> ReservationResult<Option<SeatChange>> {
        loop {
            let message = self.feed.lock().await.recv().await;
            match message {
                Some(FeedMessage::Change(change)) => {
                    self.apply_remote_event(change.clone());
                    return Ok(Some(change));
                }
                Some(FeedMessage::Lagged(missed)) => {
                    warn!("Selection view for {} missed {} change(s)", self.game_id, missed);
                    self.reconcile().await?;
                }
                None => return Ok(None),
            }
        }
    }

    /// Re-reads seats and orders, then drops selected seats the session no longer holds.
    pub async fn reconcile(&self) -> ReservationResult<()> {
        let read_at = self.clock.now();
        let seats = self.engine.seats_for_game(&self.game_id).await?;
        let orders = &self.orders;
        let game_id = &self.game_id;
        let game_orders =
            retry_with_backoff(&self.retry, "load game orders", || orders.list_by_game(game_id)).await?;

        let now = self.clock.now();
        let mut state = self.state();
        state.cache.replace_all(seats, read_at);
        state.sold_overlay = game_orders.iter().flat_map(|o| o.seat_ids()).collect();

        let me = self.ctx.user_id();
        let ViewState { cache, sold_overlay, selection, .. } = &mut *state;
        let before = selection.len();
        selection.retain(|id| {
            !sold_overlay.contains(id)
                && me.is_some_and(|holder| cache.get(id).is_some_and(|seat| seat.is_held_by(holder, now)))
        });
        let pruned = before - selection.len();
        if pruned > 0 {
            info!("Reconcile dropped {} seat(s) from the selection for {}", pruned, self.game_id);
        }
        debug!("Reconciled {} seat(s) for {}", cache.len(), self.game_id);
        Ok(())
    }

    fn begin_intent(&self, seat_id: &SeatId) -> Result<InFlightGuard<'_>, SelectionError> {
        if !self.state().in_flight.insert(seat_id.clone()) {
            return Err(SelectionError::InFlight(seat_id.clone()));
        }
        Ok(InFlightGuard {
            view: self,
            seat_id: seat_id.clone(),
        })
    }

    /// Reconciles after any failure that may mean inventory moved. A failing
    /// reconcile is logged; the original error is what the caller sees.
    async fn resync_after(&self, err: &ReservationError) {
        if err.requires_reconcile() {
            if let Err(e) = self.reconcile().await {
                error!("Reconcile after '{}' failed: {}", err, e);
            }
        }
    }

    pub async fn hold(&self, seat_id: &SeatId) -> Result<Seat, SelectionError> {
        let _guard = self.begin_intent(seat_id)?;
        match self.engine.hold(&self.ctx, seat_id).await {
            Ok(seat) => {
                let mut state = self.state();
                state.cache.record(seat.clone());
                state.selection.insert(seat_id.clone());
                Ok(seat)
            }
            Err(e) => {
                self.resync_after(&e).await;
                Err(e.into())
            }
        }
    }

    pub async fn release(&self, seat_id: &SeatId) -> Result<Seat, SelectionError> {
        let _guard = self.begin_intent(seat_id)?;
        match self.engine.release(&self.ctx, seat_id).await {
            Ok(seat) => {
                let mut state = self.state();
                state.cache.record(seat.clone());
                state.selection.remove(seat_id);
                Ok(seat)
            }
            Err(e) => {
                self.resync_after(&e).await;
                Err(e.into())
            }
        }
    }

    /// Click on a seat: release it when selected, otherwise try to hold it.
    pub async fn toggle(&self, seat_id: &SeatId) -> Result<Seat, SelectionError> {
        let selected = self.state().selection.contains(seat_id);
        if selected {
            self.release(seat_id).await
        } else {
            self.hold(seat_id).await
        }
    }

    pub fn selected_seats(&self) -> Vec<SeatId> {
        self.state().selection.iter().cloned().collect()
    }

    pub fn is_selected(&self, seat_id: &SeatId) -> bool {
        self.state().selection.contains(seat_id)
    }

    pub fn selected_total(&self) -> i64 {
        let state = self.state();
        state
            .selection
            .iter()
            .filter_map(|id| state.cache.get(id))
            .map(|seat| self.pricing.price_of(seat))
            .sum()
    }

    pub fn remove_from_selection(&self, seat_ids: &[SeatId]) {
        let mut state = self.state();
        for id in seat_ids {
            state.selection.remove(id);
        }
    }

    /// Applies rows the caller got from the engine directly, e.g. after a sale.
    pub fn record_confirmed(&self, seats: &[Seat]) {
        let mut state = self.state();
        for seat in seats {
            state.cache.record(seat.clone());
        }
    }

    pub fn clear_selection(&self) {
        self.state().selection.clear();
    }

    pub fn close(self) {
        self.feed.into_inner().unsubscribe();
    }
}
