use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use turnstile_shared::Masked;
use uuid::Uuid;

use crate::seat::{GameId, HolderId, Seat, SeatId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seat as it was at purchase time. Never updated after the order is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub seat_id: SeatId,
    pub section: String,
    pub row: String,
    pub number: u32,
    pub price: i64,
}

impl SeatSnapshot {
    pub fn capture(seat: &Seat, price: i64) -> Self {
        Self {
            seat_id: seat.id.clone(),
            section: seat.section.clone(),
            row: seat.row.clone(),
            number: seat.number,
            price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerContact {
    pub full_name: String,
    pub email: Masked<String>,
    pub phone: Option<String>,
}

/// The sale record (a ticket) for one checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: HolderId,
    pub game_id: GameId,
    pub seats: Vec<SeatSnapshot>,
    pub total: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub ticket_code: String,
    pub contact: Option<BuyerContact>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        id: Uuid,
        user_id: HolderId,
        game_id: GameId,
        seats: Vec<SeatSnapshot>,
        currency: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total = seats.iter().map(|s| s.price).sum();
        Self {
            id,
            user_id,
            game_id,
            seats,
            total,
            currency: currency.to_string(),
            payment_status: PaymentStatus::Pending,
            ticket_code: ticket_code_for(id),
            contact: None,
            created_at,
        }
    }

    pub fn seat_ids(&self) -> Vec<SeatId> {
        self.seats.iter().map(|s| s.seat_id.clone()).collect()
    }

    pub fn contains(&self, seat_id: &SeatId) -> bool {
        self.seats.iter().any(|s| &s.seat_id == seat_id)
    }
}

/// Ticket code printed on the ticket: `TKT-` plus the first 12 hex digits of the order id.
pub fn ticket_code_for(order_id: Uuid) -> String {
    let simple = order_id.simple().to_string();
    format!("TKT-{}", simple[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_sum_of_snapshots() {
        let game = GameId::new("g1");
        let now = Utc::now();
        let a = Seat::new(game.clone(), "VIP", "A", 1, now);
        let b = Seat::new(game.clone(), "VIP", "B", 1, now);

        let order = Order::new(
            Uuid::new_v4(),
            HolderId::new("u1"),
            game,
            vec![SeatSnapshot::capture(&a, 10000), SeatSnapshot::capture(&b, 9800)],
            "AOA",
            now,
        );

        assert_eq!(order.total, 19800);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(order.contains(&a.id));
        assert!(order.ticket_code.starts_with("TKT-"));
        assert_eq!(order.ticket_code.len(), 16);
    }
}
