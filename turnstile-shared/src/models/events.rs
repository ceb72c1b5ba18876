use uuid::Uuid;

/// Published on `seats.changed` whenever a seat row is written.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct SeatChangedEvent {
    pub game_id: String,
    pub seat_id: String,
    pub change: String, // INSERT, UPDATE, DELETE
    pub status: String,
    pub holder_id: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub game_id: String,
    pub customer_id: String,
    pub seat_ids: Vec<String>,
    pub total: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub game_id: String,
    pub released_seats: usize,
    pub cancelled_by: String,
    pub timestamp: i64,
}

/// Published on `order.events`.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
    Paid(OrderPaidEvent),
    Cancelled(OrderCancelledEvent),
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Paid(e) => e.order_id,
            OrderEvent::Cancelled(e) => e.order_id,
        }
    }
}
