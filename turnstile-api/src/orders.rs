use axum::{
    extract::{Path, State},
    routing::{get, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use turnstile_core::{AuthContext, GameId, Order, PaymentStatus};
use turnstile_order::Ticket;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", get(list_my_orders))
        .route("/v1/orders/{order_id}", get(get_order).delete(cancel_order))
        .route("/v1/orders/{order_id}/ticket", get(get_ticket))
        .route("/v1/orders/{order_id}/payment-status", put(update_payment_status))
        .route("/v1/games/{game_id}/orders", get(list_game_orders))
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    order_id: Uuid,
    released_seats: usize,
}

async fn list_my_orders(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.list_for_user(&ctx).await?))
}

async fn list_game_orders(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(game_id): Path<String>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.list_for_game(&ctx, &GameId::new(game_id)).await?))
}

async fn get_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get(&ctx, order_id).await?))
}

async fn get_ticket(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.orders.ticket(&ctx, order_id).await?))
}

async fn cancel_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let released_seats = state.orders.cancel(&ctx, order_id).await?;
    Ok(Json(CancelResponse {
        order_id,
        released_seats,
    }))
}

async fn update_payment_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<PaymentStatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.update_payment_status(&ctx, order_id, req.status).await?))
}
