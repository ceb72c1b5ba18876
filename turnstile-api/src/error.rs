use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use turnstile_core::ReservationError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    #[error("invalid credentials: {0}")]
    InvalidToken(String),
    #[error("too many hold attempts, try again shortly")]
    RateLimited,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Reservation(e) => match e {
                ReservationError::SeatUnavailable(_)
                | ReservationError::NotHolder { .. }
                | ReservationError::SeatConflict(_) => StatusCode::CONFLICT,
                ReservationError::Unauthenticated => StatusCode::UNAUTHORIZED,
                ReservationError::Forbidden(_) => StatusCode::FORBIDDEN,
                ReservationError::SeatNotFound(_) | ReservationError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                ReservationError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
                ReservationError::Validation(_) => StatusCode::BAD_REQUEST,
                ReservationError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            AppError::Internal(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                json!({ "error": "Internal Server Error" })
            }
            AppError::Reservation(ReservationError::StoreUnavailable(err)) => {
                tracing::error!("Store unavailable: {}", err);
                json!({ "error": self.to_string(), "retryable": true })
            }
            AppError::Reservation(ReservationError::SeatConflict(ids)) => {
                json!({ "error": self.to_string(), "conflicts": ids })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
