use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Succeeded,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: ChargeStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentDetails {
    pub method: String,
    /// Card or wallet token collected by the checkout form.
    pub token: String,
}

/// Gateway boundary. The storefront only ships a simulated gateway.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    async fn charge(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
        details: &PaymentDetails,
    ) -> Result<Charge, StoreError>;
}
