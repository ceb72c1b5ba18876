use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use turnstile_core::{
    BuyerContact, GameId, HolderId, Order, OrderStore, PaymentStatus, SeatSnapshot, StoreError, StoreResult,
};

use crate::database::db_err;

const ORDER_COLUMNS: &str = "id, user_id, game_id, seats, total, currency, payment_status, ticket_code, contact, created_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    game_id: String,
    seats: Json<Vec<SeatSnapshot>>,
    total: i64,
    currency: String,
    payment_status: String,
    ticket_code: String,
    contact: Option<Json<BuyerContact>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let payment_status = PaymentStatus::parse(&row.payment_status)
            .ok_or_else(|| StoreError::Corrupt(format!("order {}: unknown payment status", row.id)))?;
        Ok(Order {
            id: row.id,
            user_id: HolderId(row.user_id),
            game_id: GameId(row.game_id),
            seats: row.seats.0,
            total: row.total,
            currency: row.currency,
            payment_status,
            ticket_code: row.ticket_code,
            contact: row.contact.map(|c| c.0),
            created_at: row.created_at,
        })
    }
}

fn to_orders(rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, game_id, seats, total, currency, payment_status, ticket_code, contact, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(order.id)
        .bind(order.user_id.as_str())
        .bind(order.game_id.as_str())
        .bind(Json(&order.seats))
        .bind(order.total)
        .bind(&order.currency)
        .bind(order.payment_status.as_str())
        .bind(&order.ticket_code)
        .bind(order.contact.as_ref().map(Json))
        .bind(order.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        info!("Order {} stored ({} seats, total {})", order.id, order.seats.len(), order.total);
        Ok(())
    }

    async fn delete(&self, order_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Order::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: &HolderId) -> StoreResult<Vec<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC", ORDER_COLUMNS);
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        to_orders(rows)
    }

    async fn list_by_game(&self, game_id: &GameId) -> StoreResult<Vec<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE game_id = $1 ORDER BY created_at DESC", ORDER_COLUMNS);
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(game_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        to_orders(rows)
    }

    async fn update_payment_status(&self, order_id: Uuid, status: PaymentStatus) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE orders SET payment_status = $2 WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
