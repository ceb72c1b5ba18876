use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::{error::AppError, state::AppState};

/// Prometheus registry for the storefront's seat traffic.
pub struct Metrics {
    registry: Registry,

    /// Hold attempts by outcome (`held`, `released`, `conflict`, `rejected`, `rate_limited`).
    pub holds: IntCounterVec,
    /// Checkouts by outcome (`paid`, `conflict`, `declined`, `failed`).
    pub checkouts: IntCounterVec,
    pub expired_holds: IntCounter,
    pub stream_clients: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let holds = IntCounterVec::new(
            Opts::new("turnstile_hold_requests_total", "Seat hold and release requests by outcome"),
            &["outcome"],
        )?;
        let checkouts = IntCounterVec::new(
            Opts::new("turnstile_checkouts_total", "Checkout attempts by outcome"),
            &["outcome"],
        )?;
        let expired_holds = IntCounter::with_opts(Opts::new(
            "turnstile_expired_holds_total",
            "Holds returned to sale by the expiry sweep",
        ))?;
        let stream_clients = IntGauge::with_opts(Opts::new(
            "turnstile_stream_clients",
            "Open seat change streams",
        ))?;

        registry.register(Box::new(holds.clone()))?;
        registry.register(Box::new(checkouts.clone()))?;
        registry.register(Box::new(expired_holds.clone()))?;
        registry.register(Box::new(stream_clients.clone()))?;

        Ok(Self {
            registry,
            holds,
            checkouts,
            expired_holds,
            stream_clients,
        })
    }

    pub fn hold_outcome(&self, outcome: &str) {
        self.holds.with_label_values(&[outcome]).inc();
    }

    pub fn checkout_outcome(&self, outcome: &str) {
        self.checkouts.with_label_values(&[outcome]).inc();
    }

    /// Text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(export))
}

async fn export(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.hold_outcome("held");
        metrics.hold_outcome("held");
        metrics.checkout_outcome("conflict");
        metrics.expired_holds.inc_by(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("turnstile_hold_requests_total{outcome=\"held\"} 2"));
        assert!(text.contains("turnstile_checkouts_total{outcome=\"conflict\"} 1"));
        assert!(text.contains("turnstile_expired_holds_total 3"));
    }
}
