use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::CredentialResult;

/// key: audit-subject
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditSubject {
    ApiKey,
    ProviderCredential,
}

impl AuditSubject {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSubject::ApiKey => "api_key",
            AuditSubject::ProviderCredential => "provider_credential",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "api_key" => Some(Self::ApiKey),
            "provider_credential" => Some(Self::ProviderCredential),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    KeyIssued,
    KeyRenamed,
    KeyPaused,
    KeyResumed,
    KeySecretRotated,
    KeyRevoked,
    KeyLimitsUpdated,
    CredentialSubmitted,
    CredentialRotated,
    CredentialRewrapped,
    CredentialFlagsChanged,
    CredentialVerified,
    CredentialRemoved,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::KeyIssued => "key_issued",
            AuditEventType::KeyRenamed => "key_renamed",
            AuditEventType::KeyPaused => "key_paused",
            AuditEventType::KeyResumed => "key_resumed",
            AuditEventType::KeySecretRotated => "key_secret_rotated",
            AuditEventType::KeyRevoked => "key_revoked",
            AuditEventType::KeyLimitsUpdated => "key_limits_updated",
            AuditEventType::CredentialSubmitted => "credential_submitted",
            AuditEventType::CredentialRotated => "credential_rotated",
            AuditEventType::CredentialRewrapped => "credential_rewrapped",
            AuditEventType::CredentialFlagsChanged => "credential_flags_changed",
            AuditEventType::CredentialVerified => "credential_verified",
            AuditEventType::CredentialRemoved => "credential_removed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "key_issued" => Some(Self::KeyIssued),
            "key_renamed" => Some(Self::KeyRenamed),
            "key_paused" => Some(Self::KeyPaused),
            "key_resumed" => Some(Self::KeyResumed),
            "key_secret_rotated" => Some(Self::KeySecretRotated),
            "key_revoked" => Some(Self::KeyRevoked),
            "key_limits_updated" => Some(Self::KeyLimitsUpdated),
            "credential_submitted" => Some(Self::CredentialSubmitted),
            "credential_rotated" => Some(Self::CredentialRotated),
            "credential_rewrapped" => Some(Self::CredentialRewrapped),
            "credential_flags_changed" => Some(Self::CredentialFlagsChanged),
            "credential_verified" => Some(Self::CredentialVerified),
            "credential_removed" => Some(Self::CredentialRemoved),
            _ => None,
        }
    }
}

/// key: audit-event
/// Lifecycle event for an API key or provider credential. Payloads carry ids,
/// names and display fragments only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub subject: AuditSubject,
    pub subject_id: String,
    pub owner_id: String,
    pub event_type: AuditEventType,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        subject: AuditSubject,
        subject_id: impl Into<String>,
        owner_id: impl Into<String>,
        event_type: AuditEventType,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            subject_id: subject_id.into(),
            owner_id: owner_id.into(),
            event_type,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// Destination for audit events written by the in-memory stores. It runs while
/// the mutated entry is still locked; an error aborts the mutation.
pub trait AuditSink: Send + Sync {
    fn append(&self, events: &[AuditEvent]) -> CredentialResult<()>;
}

/// Derives the audit events for a mutation from the record before and after
/// it. Stores persist them in the same unit of work as the mutation itself.
pub type AuditFn<'a, T> = &'a (dyn Fn(&T, &T) -> Vec<AuditEvent> + Send + Sync);

/// Read side of the audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn query(&self, filter: &AuditFilter) -> CredentialResult<Vec<AuditEvent>>;
}

/// Inserts `events` on the caller's connection, normally an open transaction.
pub(crate) async fn insert_events(
    conn: &mut PgConnection,
    events: &[AuditEvent],
) -> CredentialResult<()> {
    for event in events {
        sqlx::query(
            "INSERT INTO credential_audit_events(id, subject, subject_id, owner_id, event_type, payload, occurred_at) VALUES($1,$2,$3,$4,$5,$6,$7)"
        )
        .bind(event.id)
        .bind(event.subject.as_str())
        .bind(&event.subject_id)
        .bind(&event.owner_id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.occurred_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// key: audit-filter
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub owner_id: String,
    pub subject: Option<AuditSubject>,
    pub subject_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        event.owner_id == self.owner_id
            && self.subject.map_or(true, |subject| subject == event.subject)
            && self
                .subject_id
                .as_ref()
                .map_or(true, |id| *id == event.subject_id)
            && self.start.map_or(true, |start| event.occurred_at >= start)
            && self.end.map_or(true, |end| event.occurred_at <= end)
    }
}

#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn query(&self, filter: &AuditFilter) -> CredentialResult<Vec<AuditEvent>> {
        let mut builder = QueryBuilder::new(
            "SELECT id, subject, subject_id, owner_id, event_type, payload, occurred_at \
             FROM credential_audit_events ",
        );
        builder.push("WHERE owner_id = ");
        builder.push_bind(filter.owner_id.clone());

        if let Some(subject) = filter.subject {
            builder.push(" AND subject = ");
            builder.push_bind(subject.as_str());
        }
        if let Some(subject_id) = &filter.subject_id {
            builder.push(" AND subject_id = ");
            builder.push_bind(subject_id.clone());
        }
        if let Some(start) = filter.start {
            builder.push(" AND occurred_at >= ");
            builder.push_bind(start);
        }
        if let Some(end) = filter.end {
            builder.push(" AND occurred_at <= ");
            builder.push_bind(end);
        }
        builder.push(" ORDER BY occurred_at DESC LIMIT ");
        builder.push_bind(filter.limit.unwrap_or(100).clamp(1, 1_000));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let events = rows
            .into_iter()
            .filter_map(|row| {
                let subject: String = row.get("subject");
                let event_type: String = row.get("event_type");
                Some(AuditEvent {
                    id: row.get("id"),
                    subject: AuditSubject::from_str(&subject)?,
                    subject_id: row.get("subject_id"),
                    owner_id: row.get("owner_id"),
                    event_type: AuditEventType::from_str(&event_type)?,
                    payload: row.get("payload"),
                    occurred_at: row.get("occurred_at"),
                })
            })
            .collect();
        Ok(events)
    }
}
