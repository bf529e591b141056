use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::audit::{insert_events, AuditEvent, AuditFn};
use crate::byok::{CredentialFlagsUpdate, ProviderCredential, ProviderCredentialStore, VerificationStatus};
use crate::crypto::EncryptedSecret;
use crate::error::{CredentialError, CredentialResult};

pub const FINGERPRINT_CONSTRAINT: &str = "provider_credentials_owner_fingerprint_key";

const CREDENTIAL_COLUMNS: &str = r#"
    id,
    owner_id,
    provider,
    ciphertext,
    nonce,
    tag,
    key_version,
    fingerprint,
    display_prefix,
    display_suffix,
    enabled,
    always_use,
    verification_status,
    error_message,
    created_at,
    updated_at
"#;

/// key: provider-credential-pg-store
#[derive(Clone)]
pub struct PgProviderCredentialStore {
    pool: PgPool,
}

impl PgProviderCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_write_error(err: sqlx::Error) -> CredentialError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint() == Some(FINGERPRINT_CONSTRAINT) {
            return CredentialError::DuplicateSecret;
        }
    }
    err.into()
}

async fn lock_row(
    conn: &mut PgConnection,
    owner_id: &str,
    id: Uuid,
) -> CredentialResult<ProviderCredential> {
    let row = sqlx::query(&format!(
        "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials WHERE owner_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(owner_id)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|row| map_row(&row)).ok_or(CredentialError::NotFound)
}

#[async_trait]
impl ProviderCredentialStore for PgProviderCredentialStore {
    async fn insert_credential(
        &self,
        record: &ProviderCredential,
        events: &[AuditEvent],
    ) -> CredentialResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO provider_credentials (
                id, owner_id, provider, ciphertext, nonce, tag, key_version, fingerprint,
                display_prefix, display_suffix, enabled, always_use, verification_status,
                error_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(&record.owner_id)
        .bind(&record.provider)
        .bind(&record.secret.ciphertext)
        .bind(&record.secret.nonce)
        .bind(&record.secret.tag)
        .bind(record.secret.key_version)
        .bind(&record.secret.fingerprint)
        .bind(&record.secret.display_prefix)
        .bind(&record.secret.display_suffix)
        .bind(record.enabled)
        .bind(record.always_use)
        .bind(record.verification_status.as_str())
        .bind(&record.error_message)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        insert_events(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_credential(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> CredentialResult<Option<ProviderCredential>> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials WHERE owner_id = $1 AND id = $2"
        ))
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| map_row(&row)))
    }

    async fn list_credentials(&self, owner_id: &str) -> CredentialResult<Vec<ProviderCredential>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_row).collect())
    }

    async fn replace_secret(
        &self,
        owner_id: &str,
        id: Uuid,
        secret: &EncryptedSecret,
        previous_nonce: Option<&[u8]>,
        reset_verification: bool,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<Option<ProviderCredential>> {
        let mut tx = self.pool.begin().await?;
        let previous = lock_row(&mut *tx, owner_id, id).await?;
        if previous_nonce.map_or(false, |nonce| previous.secret.nonce != nonce) {
            return Ok(None);
        }
        let row = sqlx::query(&format!(
            r#"
            UPDATE provider_credentials
            SET ciphertext = $3,
                nonce = $4,
                tag = $5,
                key_version = $6,
                fingerprint = $7,
                display_prefix = $8,
                display_suffix = $9,
                verification_status = CASE WHEN $10::boolean THEN 'unverified' ELSE verification_status END,
                error_message = CASE WHEN $10::boolean THEN NULL ELSE error_message END,
                updated_at = NOW()
            WHERE owner_id = $1 AND id = $2
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(id)
        .bind(&secret.ciphertext)
        .bind(&secret.nonce)
        .bind(&secret.tag)
        .bind(secret.key_version)
        .bind(&secret.fingerprint)
        .bind(&secret.display_prefix)
        .bind(&secret.display_suffix)
        .bind(reset_verification)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_write_error)?;

        let updated = map_row(&row);
        insert_events(&mut *tx, &audit(&previous, &updated)).await?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn update_flags(
        &self,
        owner_id: &str,
        id: Uuid,
        flags: &CredentialFlagsUpdate,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential> {
        let mut tx = self.pool.begin().await?;
        let previous = lock_row(&mut *tx, owner_id, id).await?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE provider_credentials
            SET enabled = COALESCE($3, enabled),
                always_use = COALESCE($4, always_use),
                updated_at = NOW()
            WHERE owner_id = $1 AND id = $2
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(id)
        .bind(flags.enabled)
        .bind(flags.always_use)
        .fetch_one(&mut *tx)
        .await?;

        let updated = map_row(&row);
        insert_events(&mut *tx, &audit(&previous, &updated)).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn record_verification(
        &self,
        owner_id: &str,
        id: Uuid,
        status: VerificationStatus,
        error_message: Option<&str>,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential> {
        let mut tx = self.pool.begin().await?;
        let previous = lock_row(&mut *tx, owner_id, id).await?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE provider_credentials
            SET verification_status = $3,
                error_message = $4,
                updated_at = NOW()
            WHERE owner_id = $1 AND id = $2
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await?;

        let updated = map_row(&row);
        insert_events(&mut *tx, &audit(&previous, &updated)).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_credential(
        &self,
        owner_id: &str,
        id: Uuid,
        audit: AuditFn<'_, ProviderCredential>,
    ) -> CredentialResult<ProviderCredential> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "DELETE FROM provider_credentials WHERE owner_id = $1 AND id = $2 RETURNING {CREDENTIAL_COLUMNS}"
        ))
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let removed = row.map(|row| map_row(&row)).ok_or(CredentialError::NotFound)?;

        insert_events(&mut *tx, &audit(&removed, &removed)).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn list_stale_versions(
        &self,
        active_version: i32,
        after: Option<Uuid>,
        limit: i64,
    ) -> CredentialResult<Vec<ProviderCredential>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CREDENTIAL_COLUMNS}
            FROM provider_credentials
            WHERE key_version <> $1
              AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#
        ))
        .bind(active_version)
        .bind(after)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_row).collect())
    }
}

fn map_row(row: &PgRow) -> ProviderCredential {
    let verification_status: String = row.get("verification_status");
    ProviderCredential {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        provider: row.get("provider"),
        secret: EncryptedSecret {
            ciphertext: row.get("ciphertext"),
            nonce: row.get("nonce"),
            tag: row.get("tag"),
            key_version: row.get("key_version"),
            fingerprint: row.get("fingerprint"),
            display_prefix: row.get("display_prefix"),
            display_suffix: row.get("display_suffix"),
        },
        enabled: row.get("enabled"),
        always_use: row.get("always_use"),
        verification_status: VerificationStatus::from_str(&verification_status)
            .unwrap_or_default(),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
