use axum::{http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod checkout;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod orders;
pub mod seats;
pub mod state;
pub mod worker;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let api = Router::new()
        .merge(auth::routes())
        .merge(seats::routes())
        .merge(checkout::routes())
        .merge(orders::routes())
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::identity_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(metrics::routes())
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
