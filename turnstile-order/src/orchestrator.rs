use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use turnstile_core::payment::{Charge, ChargeStatus, PaymentAdapter, PaymentDetails};
use turnstile_core::{Order, ReservationError, ReservationResult, StoreError};

pub struct PaymentOrchestrator {
    adapter: Arc<dyn PaymentAdapter>,
}

impl PaymentOrchestrator {
    pub fn new(adapter: Arc<dyn PaymentAdapter>) -> Self {
        Self { adapter }
    }

    /// Charges the order total. A declined charge becomes `PaymentDeclined`.
    pub async fn charge_order(&self, order: &Order, details: &PaymentDetails) -> ReservationResult<Charge> {
        let charge = self.adapter.charge(order.id, order.total, &order.currency, details).await?;
        match charge.status {
            ChargeStatus::Succeeded => {
                info!("Charge {} for order {}: {} {}", charge.id, order.id, order.total, order.currency);
                Ok(charge)
            }
            ChargeStatus::Declined => {
                let reason = charge.reason.unwrap_or_else(|| "declined by gateway".to_string());
                warn!("Charge for order {} declined: {}", order.id, reason);
                Err(ReservationError::PaymentDeclined(reason))
            }
        }
    }
}

/// Token that makes the simulated gateway decline.
pub const DECLINE_TOKEN: &str = "tok_decline";
/// Token that makes the simulated gateway unreachable.
pub const UNAVAILABLE_TOKEN: &str = "tok_unavailable";

/// Stand-in gateway: approves everything except the two test tokens above.
pub struct SimulatedGateway;

#[async_trait]
impl PaymentAdapter for SimulatedGateway {
    async fn charge(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
        details: &PaymentDetails,
    ) -> Result<Charge, StoreError> {
        if details.token == UNAVAILABLE_TOKEN {
            return Err(StoreError::Unavailable("payment gateway timeout".to_string()));
        }

        let (status, reason) = if details.token == DECLINE_TOKEN {
            (ChargeStatus::Declined, Some("card declined".to_string()))
        } else if amount <= 0 {
            (ChargeStatus::Declined, Some("invalid amount".to_string()))
        } else {
            (ChargeStatus::Succeeded, None)
        };

        Ok(Charge {
            id: format!("sim_ch_{}", order_id.simple()),
            order_id,
            amount,
            currency: currency.to_string(),
            status,
            reason,
            created_at: Utc::now(),
        })
    }
}
