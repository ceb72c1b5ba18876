use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use turnstile_catalog::StadiumLayout;
use turnstile_core::{AuthContext, ChangeFeed, FeedMessage, GameId, ReservationError, Seat, SeatChange, SeatId};
use turnstile_selection::{display_status, DisplayStatus, SeatView};
use turnstile_shared::models::events::SeatChangedEvent;

use crate::{error::AppError, metrics::Metrics, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/games/{game_id}/seats", get(list_seats))
        .route("/v1/games/{game_id}/seats/init", post(initialize_seats))
        .route("/v1/games/{game_id}/stream", get(stream_changes))
        .route("/v1/seats/{seat_id}/hold", post(hold_seat).delete(release_seat))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeatMapResponse {
    pub game_id: GameId,
    pub available: usize,
    pub seats: Vec<SeatView>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InitializeRequest {
    /// Defaults to the standard stadium.
    #[serde(default)]
    pub layout: Option<StadiumLayout>,
}

#[derive(Debug, Serialize)]
struct InitializeResponse {
    game_id: GameId,
    created: usize,
}

async fn list_seats(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(game_id): Path<String>,
) -> Result<Json<SeatMapResponse>, AppError> {
    let game_id = GameId::new(game_id);
    let now = state.engine.clock().now();
    let seats = state.engine.seats_for_game(&game_id).await?;

    let views: Vec<SeatView> = seats
        .iter()
        .map(|seat| SeatView {
            seat_id: seat.id.clone(),
            section: seat.section.clone(),
            row: seat.row.clone(),
            number: seat.number,
            price: state.pricing.price_of(seat),
            status: display_status(seat, false, ctx.user_id(), now),
            pending: false,
        })
        .collect();
    let available = views.iter().filter(|v| v.status == DisplayStatus::Available).count();

    Ok(Json(SeatMapResponse {
        game_id,
        available,
        seats: views,
    }))
}

async fn initialize_seats(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(game_id): Path<String>,
    Json(req): Json<InitializeRequest>,
) -> Result<Json<InitializeResponse>, AppError> {
    let game_id = GameId::new(game_id);
    let layout = req.layout.unwrap_or_default();
    let created = state.engine.initialize_game(&ctx, &game_id, &layout).await?;

    Ok(Json(InitializeResponse { game_id, created }))
}

async fn hold_seat(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(seat_id): Path<String>,
) -> Result<Json<Seat>, AppError> {
    crate::middleware::enforce_hold_rate(&state, &ctx).await?;

    let seat_id = SeatId::from(seat_id.as_str());
    let result = state.engine.hold(&ctx, &seat_id).await;
    record_hold(&state.metrics, "held", &result);
    Ok(Json(result?))
}

async fn release_seat(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(seat_id): Path<String>,
) -> Result<Json<Seat>, AppError> {
    let seat_id = SeatId::from(seat_id.as_str());
    let result = state.engine.release(&ctx, &seat_id).await;
    record_hold(&state.metrics, "released", &result);
    Ok(Json(result?))
}

fn record_hold(metrics: &Metrics, success: &str, result: &Result<Seat, ReservationError>) {
    let outcome = match result {
        Ok(_) => success,
        Err(ReservationError::SeatUnavailable(_)) | Err(ReservationError::NotHolder { .. }) => "conflict",
        Err(_) => "rejected",
    };
    metrics.hold_outcome(outcome);
}

/// Wire shape of one seat change on the stream and the event bus.
pub fn seat_event(change: &SeatChange) -> SeatChangedEvent {
    SeatChangedEvent {
        game_id: change.game_id().to_string(),
        seat_id: change.seat.id.to_string(),
        change: change.kind.as_str().to_string(),
        status: change.seat.status().as_str().to_string(),
        holder_id: change.seat.state.holder().map(|h| h.to_string()),
        timestamp: change.committed_at.timestamp_millis(),
    }
}

/// Decrements the open-stream gauge when the client goes away.
struct StreamClient {
    metrics: std::sync::Arc<Metrics>,
}

impl StreamClient {
    fn connect(metrics: std::sync::Arc<Metrics>) -> Self {
        metrics.stream_clients.inc();
        Self { metrics }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.metrics.stream_clients.dec();
    }
}

/// Server-Sent Events for one game. `seat` events carry a [`SeatChangedEvent`];
/// a `resync` event tells the client it missed changes and must re-read the seat map.
async fn stream_changes(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let game_id = GameId::new(game_id);
    info!("Seat stream opened for game {}", game_id);

    let subscription = state.feed.subscribe(&game_id);
    let client = StreamClient::connect(state.metrics.clone());

    let events = stream::unfold((subscription, client), |(mut subscription, client)| async move {
        let event = match subscription.recv().await? {
            FeedMessage::Change(change) => Event::default().event("seat").json_data(seat_event(&change)),
            FeedMessage::Lagged(missed) => {
                warn!("Seat stream for {} lagged by {} changes", subscription.game_id(), missed);
                Ok(Event::default().event("resync").data(missed.to_string()))
            }
        };
        Some((event, (subscription, client)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
