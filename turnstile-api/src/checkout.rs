use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use serde::Deserialize;
use tracing::warn;

use turnstile_core::payment::PaymentDetails;
use turnstile_core::{AuthContext, BuyerContact, GameId, Order, ReservationError, SeatId};

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/games/{game_id}/checkout", post(checkout))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub seat_ids: Vec<SeatId>,
    #[serde(default)]
    pub contact: Option<BuyerContact>,
    #[serde(default)]
    pub payment: PaymentDetails,
}

async fn checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(game_id): Path<String>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let game_id = GameId::new(game_id);
    let result = state
        .finalizer
        .checkout(&ctx, &game_id, &req.seat_ids, req.contact, &req.payment)
        .await;

    let outcome = match &result {
        Ok(_) => "paid",
        Err(ReservationError::SeatConflict(lost)) => {
            warn!("Checkout for game {} lost {} seat(s)", game_id, lost.len());
            "conflict"
        }
        Err(ReservationError::PaymentDeclined(_)) => "declined",
        Err(_) => "failed",
    };
    state.metrics.checkout_outcome(outcome);

    Ok((StatusCode::CREATED, Json(result?)))
}
