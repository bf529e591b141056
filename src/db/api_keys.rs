use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};

use crate::audit::{insert_events, AuditEvent, AuditFn};
use crate::error::{CredentialError, CredentialResult};
use crate::keys::{ApiKeyStore, GatewayApiKey, KeyLimits, KeyStatus, LimitsUpdate, RevokeOutcome};

const KEY_COLUMNS: &str = r#"
    key_id,
    secret_hash,
    status,
    display_prefix,
    name,
    owner_id,
    scopes,
    created_by,
    daily_requests,
    weekly_requests,
    monthly_requests,
    daily_cost_minor,
    weekly_cost_minor,
    monthly_cost_minor,
    soft_blocked,
    created_at,
    updated_at,
    revoked_at
"#;

/// key: gateway-keys-pg-store
/// Every mutation runs in one transaction: lock the row, write it, insert the
/// audit events, commit.
#[derive(Clone)]
pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_row(conn: &mut PgConnection, key_id: &str) -> CredentialResult<Option<GatewayApiKey>> {
    let row = sqlx::query(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE key_id = $1 FOR UPDATE"
    ))
    .bind(key_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|row| map_row(&row)))
}

async fn lock_live(conn: &mut PgConnection, key_id: &str) -> CredentialResult<GatewayApiKey> {
    match lock_row(conn, key_id).await? {
        None => Err(CredentialError::NotFound),
        Some(record) if record.status == KeyStatus::Revoked => Err(CredentialError::KeyInactive),
        Some(record) => Ok(record),
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn insert_key(&self, record: &GatewayApiKey, events: &[AuditEvent]) -> CredentialResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO api_keys (
                key_id, secret_hash, status, display_prefix, name, owner_id, scopes, created_by,
                daily_requests, weekly_requests, monthly_requests,
                daily_cost_minor, weekly_cost_minor, monthly_cost_minor,
                soft_blocked, created_at, updated_at, revoked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(&record.key_id)
        .bind(&record.secret_hash)
        .bind(record.status.as_str())
        .bind(&record.display_prefix)
        .bind(&record.name)
        .bind(&record.owner_id)
        .bind(&record.scopes)
        .bind(&record.created_by)
        .bind(record.limits.daily_requests)
        .bind(record.limits.weekly_requests)
        .bind(record.limits.monthly_requests)
        .bind(record.limits.daily_cost_minor)
        .bind(record.limits.weekly_cost_minor)
        .bind(record.limits.monthly_cost_minor)
        .bind(record.limits.soft_blocked)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.revoked_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.constraint() == Some("api_keys_pkey") => {
                return Err(CredentialError::InvalidInput("key id already exists".into()));
            }
            Err(err) => return Err(err.into()),
        }
        insert_events(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_key(&self, key_id: &str) -> CredentialResult<Option<GatewayApiKey>> {
        let row = sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key_id = $1"))
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| map_row(&row)))
    }

    async fn list_keys(&self, owner_id: &str) -> CredentialResult<Vec<GatewayApiKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_row).collect())
    }

    async fn update_profile(
        &self,
        key_id: &str,
        name: Option<&str>,
        status: Option<KeyStatus>,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey> {
        if status == Some(KeyStatus::Revoked) {
            return Err(CredentialError::InvalidInput(
                "revocation goes through revoke".into(),
            ));
        }
        let mut tx = self.pool.begin().await?;
        let previous = lock_live(&mut *tx, key_id).await?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE api_keys
            SET name = COALESCE($2, name),
                status = COALESCE($3, status),
                updated_at = NOW()
            WHERE key_id = $1
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(key_id)
        .bind(name)
        .bind(status.map(|status| status.as_str()))
        .fetch_one(&mut *tx)
        .await?;

        let updated = map_row(&row);
        insert_events(&mut *tx, &audit(&previous, &updated)).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn replace_secret_hash(
        &self,
        key_id: &str,
        secret_hash: &str,
        display_prefix: &str,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey> {
        let mut tx = self.pool.begin().await?;
        let previous = lock_live(&mut *tx, key_id).await?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE api_keys
            SET secret_hash = $2,
                display_prefix = $3,
                updated_at = NOW()
            WHERE key_id = $1
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(key_id)
        .bind(secret_hash)
        .bind(display_prefix)
        .fetch_one(&mut *tx)
        .await?;

        let updated = map_row(&row);
        insert_events(&mut *tx, &audit(&previous, &updated)).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn update_limits(
        &self,
        key_id: &str,
        update: &LimitsUpdate,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<GatewayApiKey> {
        let query = format!(
            r#"
            UPDATE api_keys
            SET daily_requests = CASE WHEN $2::boolean THEN daily_requests ELSE $3::bigint END,
                weekly_requests = CASE WHEN $4::boolean THEN weekly_requests ELSE $5::bigint END,
                monthly_requests = CASE WHEN $6::boolean THEN monthly_requests ELSE $7::bigint END,
                daily_cost_minor = CASE WHEN $8::boolean THEN daily_cost_minor ELSE $9::bigint END,
                weekly_cost_minor = CASE WHEN $10::boolean THEN weekly_cost_minor ELSE $11::bigint END,
                monthly_cost_minor = CASE WHEN $12::boolean THEN monthly_cost_minor ELSE $13::bigint END,
                soft_blocked = COALESCE($14, soft_blocked),
                updated_at = NOW()
            WHERE key_id = $1
            RETURNING {KEY_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await?;
        let previous = lock_live(&mut *tx, key_id).await?;
        let mut statement = sqlx::query(&query).bind(key_id);
        for change in update.changes() {
            statement = statement.bind(change.is_keep()).bind(change.target());
        }
        let row = statement
            .bind(update.soft_blocked)
            .fetch_one(&mut *tx)
            .await?;

        let updated = map_row(&row);
        insert_events(&mut *tx, &audit(&previous, &updated)).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn revoke_key(
        &self,
        key_id: &str,
        confirmation: Option<&str>,
        audit: AuditFn<'_, GatewayApiKey>,
    ) -> CredentialResult<RevokeOutcome> {
        let mut tx = self.pool.begin().await?;
        let previous = match lock_row(&mut *tx, key_id).await? {
            None => return Err(CredentialError::NotFound),
            Some(record) if record.status == KeyStatus::Revoked => {
                return Ok(RevokeOutcome::AlreadyRevoked(record));
            }
            Some(record) => record,
        };
        if confirmation.map_or(false, |name| name != previous.name) {
            return Err(CredentialError::ConfirmationMismatch);
        }
        let row = sqlx::query(&format!(
            r#"
            UPDATE api_keys
            SET status = 'revoked',
                revoked_at = NOW(),
                updated_at = NOW()
            WHERE key_id = $1
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(key_id)
        .fetch_one(&mut *tx)
        .await?;

        let revoked = map_row(&row);
        insert_events(&mut *tx, &audit(&previous, &revoked)).await?;
        tx.commit().await?;
        Ok(RevokeOutcome::Revoked(revoked))
    }
}

fn map_row(row: &PgRow) -> GatewayApiKey {
    let status: String = row.get("status");
    GatewayApiKey {
        key_id: row.get("key_id"),
        secret_hash: row.get("secret_hash"),
        // Unknown states never authenticate.
        status: KeyStatus::from_str(&status).unwrap_or(KeyStatus::Revoked),
        display_prefix: row.get("display_prefix"),
        name: row.get("name"),
        owner_id: row.get("owner_id"),
        scopes: row.get("scopes"),
        created_by: row.get("created_by"),
        limits: KeyLimits {
            daily_requests: row.get("daily_requests"),
            weekly_requests: row.get("weekly_requests"),
            monthly_requests: row.get("monthly_requests"),
            daily_cost_minor: row.get("daily_cost_minor"),
            weekly_cost_minor: row.get("weekly_cost_minor"),
            monthly_cost_minor: row.get("monthly_cost_minor"),
            soft_blocked: row.get("soft_blocked"),
        },
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        revoked_at: row.get("revoked_at"),
    }
}
