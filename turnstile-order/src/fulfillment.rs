use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use turnstile_core::{Order, PaymentStatus, ReservationError, ReservationResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSeat {
    pub seat_id: String,
    pub label: String,
    pub price: i64,
}

/// What the rendering service needs to print a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub code: String,
    pub order_id: Uuid,
    pub game_id: String,
    pub holder_name: Option<String>,
    pub seats: Vec<TicketSeat>,
    pub total: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub purchased_at: DateTime<Utc>,
    pub qr_payload: String,
}

pub struct TicketIssuer;

impl TicketIssuer {
    /// Cancelled orders get no ticket.
    pub fn issue(order: &Order) -> ReservationResult<Ticket> {
        if order.payment_status == PaymentStatus::Cancelled {
            return Err(ReservationError::Validation(format!("order {} is cancelled", order.id)));
        }

        let seats = order
            .seats
            .iter()
            .map(|s| TicketSeat {
                seat_id: s.seat_id.to_string(),
                label: format!("{} - Row {}, Seat {}", s.section, s.row, s.number),
                price: s.price,
            })
            .collect();

        Ok(Ticket {
            code: order.ticket_code.clone(),
            order_id: order.id,
            game_id: order.game_id.to_string(),
            holder_name: order.contact.as_ref().map(|c| c.full_name.clone()),
            seats,
            total: order.total,
            currency: order.currency.clone(),
            payment_status: order.payment_status,
            purchased_at: order.created_at,
            qr_payload: Self::qr_payload(order),
        })
    }

    /// Compact JSON encoded into the ticket's QR code.
    pub fn qr_payload(order: &Order) -> String {
        serde_json::json!({
            "ticket": order.ticket_code,
            "order_id": order.id,
            "game_id": order.game_id,
            "seats": order.seat_ids(),
        })
        .to_string()
    }
}
