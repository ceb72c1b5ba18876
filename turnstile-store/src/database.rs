use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};
use turnstile_core::{SalePolicy, StoreError};

use crate::app_config::BusinessRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlays rows of the `business_rules` table on top of the file config.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for (key, value) in rows {
            apply_rule(&mut rules, &key, &value);
        }
        Ok(rules)
    }
}

/// Expected format: `{"value": <number/string>}`. Unknown keys and bad values are skipped.
fn apply_rule(rules: &mut BusinessRules, key: &str, value: &Value) {
    let Some(v) = value.get("value") else {
        warn!("Business rule {} has no value", key);
        return;
    };
    match key {
        "seat_hold_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.seat_hold_seconds = u;
            }
        }
        "sweep_interval_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.sweep_interval_seconds = u;
            }
        }
        "hold_rate_limit" => {
            if let Some(i) = v.as_i64() {
                rules.hold_rate_limit = i;
            }
        }
        "sale_policy" => match v.as_str() {
            Some("require_hold") => rules.sale_policy = SalePolicy::RequireHold,
            Some("allow_available") => rules.sale_policy = SalePolicy::AllowAvailable,
            other => warn!("Ignoring unknown sale policy {:?}", other),
        },
        _ => {}
    }
}

/// Maps driver errors onto the store taxonomy.
pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(e.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}
