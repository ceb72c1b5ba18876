use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use turnstile_core::{
    ChangeFeed, GameId, HolderId, Precondition, SaleOutcome, SalePolicy, Seat, SeatChange, SeatId, SeatState,
    SeatStatus, SeatStore, StoreError, StoreResult,
};

use crate::database::db_err;

const SEAT_COLUMNS: &str = "id, game_id, section, row_label, number, status, holder_id, hold_expires_at, order_id, updated_at";

/// Bumps the row version past the previous one even when the clock has not moved.
const NEXT_VERSION: &str = "GREATEST($6, updated_at + interval '1 microsecond')";

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: String,
    game_id: String,
    section: String,
    row_label: String,
    number: i32,
    status: String,
    holder_id: Option<String>,
    hold_expires_at: Option<DateTime<Utc>>,
    order_id: Option<Uuid>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("seat {}: {}", row.id, what));
        let status = SeatStatus::parse(&row.status).ok_or_else(|| corrupt("unknown status"))?;
        let state = match status {
            SeatStatus::Available => SeatState::Available,
            SeatStatus::Held => SeatState::Held {
                holder: HolderId::new(row.holder_id.clone().ok_or_else(|| corrupt("held without holder"))?),
                expires_at: row.hold_expires_at.ok_or_else(|| corrupt("held without expiry"))?,
            },
            SeatStatus::Sold => SeatState::Sold {
                holder: HolderId::new(row.holder_id.clone().ok_or_else(|| corrupt("sold without holder"))?),
                order_id: row.order_id.ok_or_else(|| corrupt("sold without order"))?,
            },
        };
        let number = u32::try_from(row.number).map_err(|_| corrupt("negative seat number"))?;

        Ok(Seat {
            id: SeatId(row.id),
            game_id: GameId(row.game_id),
            section: row.section,
            row: row.row_label,
            number,
            state,
            updated_at: row.updated_at,
        })
    }
}

fn to_seats(rows: Vec<SeatRow>) -> StoreResult<Vec<Seat>> {
    rows.into_iter().map(Seat::try_from).collect()
}

/// Column values for a state: (status, holder_id, hold_expires_at, order_id).
fn state_columns(state: &SeatState) -> (&'static str, Option<&str>, Option<DateTime<Utc>>, Option<Uuid>) {
    match state {
        SeatState::Available => ("available", None, None, None),
        SeatState::Held { holder, expires_at } => ("held", Some(holder.as_str()), Some(*expires_at), None),
        SeatState::Sold { holder, order_id } => ("sold", Some(holder.as_str()), None, Some(*order_id)),
    }
}

/// SQL guard for a precondition. `$6` is `now`, `$7` the holder or order id.
fn precondition_clause(expected: &Precondition) -> &'static str {
    match expected {
        Precondition::Available => "status = 'available'",
        Precondition::HeldBy(_) => "status = 'held' AND holder_id = $7",
        Precondition::HoldExpired => "status = 'held' AND hold_expires_at <= $6",
        Precondition::SoldTo(_) => "status = 'sold' AND order_id = $7",
    }
}

/// Seat table in Postgres. Publishes every committed change to the in-process feed.
pub struct PgSeatStore {
    pool: PgPool,
    feed: Option<Arc<dyn ChangeFeed>>,
}

impl PgSeatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, feed: None }
    }

    pub fn with_feed(pool: PgPool, feed: Arc<dyn ChangeFeed>) -> Self {
        Self { pool, feed: Some(feed) }
    }

    fn publish(&self, change: SeatChange) {
        if let Some(feed) = &self.feed {
            feed.publish(change);
        }
    }
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn seats_for_game(&self, game_id: &GameId) -> StoreResult<Vec<Seat>> {
        let sql = format!(
            "SELECT {} FROM seats WHERE game_id = $1 ORDER BY section, row_label, number",
            SEAT_COLUMNS
        );
        let rows: Vec<SeatRow> = sqlx::query_as(&sql)
            .bind(game_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        to_seats(rows)
    }

    async fn get_seat(&self, seat_id: &SeatId) -> StoreResult<Option<Seat>> {
        let sql = format!("SELECT {} FROM seats WHERE id = $1", SEAT_COLUMNS);
        let row: Option<SeatRow> = sqlx::query_as(&sql)
            .bind(seat_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Seat::try_from).transpose()
    }

    async fn get_seats(&self, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        let ids: Vec<String> = seat_ids.iter().map(|id| id.0.clone()).collect();
        let sql = format!("SELECT {} FROM seats WHERE id = ANY($1)", SEAT_COLUMNS);
        let rows: Vec<SeatRow> = sqlx::query_as(&sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        to_seats(rows)
    }

    async fn compare_and_set(
        &self,
        seat_id: &SeatId,
        expected: Precondition,
        next: SeatState,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Seat>> {
        let (status, holder, expires_at, order_id) = state_columns(&next);
        let sql = format!(
            "UPDATE seats SET status = $2, holder_id = $3, hold_expires_at = $4, order_id = $5, updated_at = {} \
             WHERE id = $1 AND {} RETURNING {}",
            NEXT_VERSION,
            precondition_clause(&expected),
            SEAT_COLUMNS
        );

        let query = sqlx::query_as::<_, SeatRow>(&sql)
            .bind(seat_id.as_str())
            .bind(status)
            .bind(holder)
            .bind(expires_at)
            .bind(order_id)
            .bind(now);
        let query = match &expected {
            Precondition::HeldBy(h) => query.bind(h.as_str()),
            Precondition::SoldTo(o) => query.bind(*o),
            Precondition::Available | Precondition::HoldExpired => query,
        };

        let row = query.fetch_optional(&self.pool).await.map_err(db_err)?;
        match row {
            Some(row) => {
                let seat = Seat::try_from(row)?;
                debug!("Seat {} -> {}", seat.id, seat.status());
                self.publish(SeatChange::update(seat.clone()));
                Ok(Some(seat))
            }
            None => Ok(None),
        }
    }

    async fn commit_sale(
        &self,
        seat_ids: &[SeatId],
        buyer: &HolderId,
        order_id: Uuid,
        policy: SalePolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<SaleOutcome> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = seat_ids.iter().filter(|id| seen.insert(*id)).map(|id| id.0.clone()).collect();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lock the batch so the policy check and the write see the same rows.
        let lock_sql = format!("SELECT {} FROM seats WHERE id = ANY($1) FOR UPDATE", SEAT_COLUMNS);
        let locked: Vec<SeatRow> = sqlx::query_as(&lock_sql)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        let locked = to_seats(locked)?;

        let conflicts: Vec<SeatId> = ids
            .iter()
            .filter(|id| {
                !locked
                    .iter()
                    .any(|seat| seat.id.as_str() == id.as_str() && policy.accepts(seat, buyer, now))
            })
            .map(|id| SeatId(id.clone()))
            .collect();
        if !conflicts.is_empty() {
            tx.rollback().await.map_err(db_err)?;
            warn!("Sale for order {} rejected, {} seat(s) in conflict", order_id, conflicts.len());
            return Ok(SaleOutcome::Conflict(conflicts));
        }

        let update_sql = format!(
            "UPDATE seats SET status = 'sold', holder_id = $2, hold_expires_at = NULL, order_id = $3, \
             updated_at = GREATEST($4, updated_at + interval '1 microsecond') WHERE id = ANY($1) RETURNING {}",
            SEAT_COLUMNS
        );
        let rows: Vec<SeatRow> = sqlx::query_as(&update_sql)
            .bind(&ids)
            .bind(buyer.as_str())
            .bind(order_id)
            .bind(now)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        let sold = to_seats(rows)?;

        tx.commit().await.map_err(db_err)?;
        info!("Order {} sold {} seat(s)", order_id, sold.len());

        for seat in &sold {
            self.publish(SeatChange::update(seat.clone()));
        }
        Ok(SaleOutcome::Committed(sold))
    }

    async fn initialize_seats(&self, seats: Vec<Seat>) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let sql = format!(
            "INSERT INTO seats (id, game_id, section, row_label, number, status, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 'available', $6) ON CONFLICT DO NOTHING RETURNING {}",
            SEAT_COLUMNS
        );

        let mut created = Vec::new();
        for seat in &seats {
            let number = i32::try_from(seat.number)
                .map_err(|_| StoreError::Corrupt(format!("seat number {} out of range", seat.number)))?;
            let row: Option<SeatRow> = sqlx::query_as(&sql)
                .bind(seat.id.as_str())
                .bind(seat.game_id.as_str())
                .bind(&seat.section)
                .bind(&seat.row)
                .bind(number)
                .bind(seat.updated_at)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            if let Some(row) = row {
                created.push(Seat::try_from(row)?);
            }
        }
        tx.commit().await.map_err(db_err)?;

        for seat in &created {
            self.publish(SeatChange::insert(seat.clone()));
        }
        Ok(created.len())
    }

    async fn expired_holds(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SeatId>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM seats WHERE status = 'held' AND hold_expires_at <= $1 ORDER BY hold_expires_at LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(ids.into_iter().map(|(id,)| SeatId(id)).collect())
    }
}
