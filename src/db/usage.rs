use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};

use crate::error::{CredentialError, CredentialResult};
use crate::usage::{UsageSnapshot, UsageStore, UsageWindow, WindowUsage};

/// key: usage-pg-store
/// One row per key, window kind and window start. Increments are a single
/// upsert so concurrent writers add rather than overwrite.
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const KEY_CONSTRAINT: &str = "api_key_usage_key_id_fkey";

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn increment(
        &self,
        key_id: &str,
        at: DateTime<Utc>,
        requests: i64,
        cost_minor: i64,
    ) -> CredentialResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO api_key_usage (key_id, window_kind, window_start, requests, cost_minor)
            VALUES
                ($1, 'daily', $2, $5, $6),
                ($1, 'weekly', $3, $5, $6),
                ($1, 'monthly', $4, $5, $6)
            ON CONFLICT (key_id, window_kind, window_start) DO UPDATE
            SET requests = api_key_usage.requests + EXCLUDED.requests,
                cost_minor = api_key_usage.cost_minor + EXCLUDED.cost_minor
            "#,
        )
        .bind(key_id)
        .bind(UsageWindow::Daily.window_start(at))
        .bind(UsageWindow::Weekly.window_start(at))
        .bind(UsageWindow::Monthly.window_start(at))
        .bind(requests)
        .bind(cost_minor)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.constraint() == Some(KEY_CONSTRAINT) => {
                Err(CredentialError::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn snapshot(&self, key_id: &str, at: DateTime<Utc>) -> CredentialResult<UsageSnapshot> {
        let rows = sqlx::query(
            r#"
            SELECT window_kind, requests, cost_minor
            FROM api_key_usage
            WHERE key_id = $1
              AND (
                (window_kind = 'daily' AND window_start = $2)
                OR (window_kind = 'weekly' AND window_start = $3)
                OR (window_kind = 'monthly' AND window_start = $4)
              )
            "#,
        )
        .bind(key_id)
        .bind(UsageWindow::Daily.window_start(at))
        .bind(UsageWindow::Weekly.window_start(at))
        .bind(UsageWindow::Monthly.window_start(at))
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = UsageSnapshot::default();
        for row in rows {
            let kind: String = row.get("window_kind");
            if let Some(window) = UsageWindow::from_str(&kind) {
                snapshot.set_window(
                    window,
                    WindowUsage {
                        requests: row.get("requests"),
                        cost_minor: row.get("cost_minor"),
                    },
                );
            }
        }
        Ok(snapshot)
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> CredentialResult<u64> {
        let result = sqlx::query("DELETE FROM api_key_usage WHERE window_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
