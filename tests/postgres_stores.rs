use std::sync::Arc;

use chrono::{TimeZone, Utc};
use gateway_credentials::audit::{AuditFilter, AuditLog, AuditSubject, PgAuditLog};
use gateway_credentials::byok::{ProviderCredentialService, SubmitCredential};
use gateway_credentials::crypto::{MasterKey, MasterKeyRing, Pepper, SecretCipher};
use gateway_credentials::db::{PgApiKeyStore, PgProviderCredentialStore, PgUsageStore};
use gateway_credentials::keys::{
    IssueKeyRequest, KeyIssuer, KeyLimits, KeyStatus, KeyUpdate, KeyVerifier, RevokeOutcome,
};
use gateway_credentials::usage::{UsageStore, UsageWindow};
use gateway_credentials::CredentialError;
use sqlx::PgPool;

fn pepper() -> Arc<Pepper> {
    Arc::new(Pepper::new(vec![7u8; 32]).unwrap())
}

fn ring(active: i32) -> Arc<MasterKeyRing> {
    Arc::new(
        MasterKeyRing::new(
            vec![
                MasterKey::new(1, [0x31; 32]).unwrap(),
                MasterKey::new(2, [0x32; 32]).unwrap(),
            ],
            active,
        )
        .unwrap(),
    )
}

fn request(name: &str) -> IssueKeyRequest {
    IssueKeyRequest {
        name: name.to_string(),
        scopes: vec!["chat".into(), "embeddings".into()],
        created_by: None,
        limits: KeyLimits::default(),
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn key_lifecycle_persists(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let store = Arc::new(PgApiKeyStore::new(pool.clone()));
    let audit = Arc::new(PgAuditLog::new(pool.clone()));
    let issuer = KeyIssuer::new(store.clone(), pepper());
    let verifier = KeyVerifier::new(store, Arc::new(PgUsageStore::new(pool.clone())), pepper());

    let issued = issuer.issue("owner-a", request("prod-key")).await.unwrap();
    let record = verifier
        .verify(&issued.key_id, issued.secret.expose())
        .await
        .unwrap();
    assert_eq!(record.scopes, vec!["chat".to_string(), "embeddings".to_string()]);

    let paused = issuer
        .update(
            &issued.key_id,
            KeyUpdate {
                name: Some("prod-key-2".into()),
                paused: Some(true),
            },
        )
        .await
        .unwrap();
    assert_eq!(paused.status, KeyStatus::Paused);
    assert_eq!(paused.name, "prod-key-2");

    assert!(matches!(
        issuer.revoke(&issued.key_id, Some("prod-key")).await,
        Err(CredentialError::ConfirmationMismatch)
    ));
    let outcome = issuer
        .revoke(&issued.key_id, Some("prod-key-2"))
        .await
        .unwrap();
    assert!(matches!(outcome, RevokeOutcome::Revoked(_)));
    let again = issuer.revoke(&issued.key_id, None).await.unwrap();
    assert!(matches!(again, RevokeOutcome::AlreadyRevoked(_)));

    assert!(matches!(
        issuer.rotate_secret(&issued.key_id).await,
        Err(CredentialError::KeyInactive)
    ));

    let events = audit
        .query(&AuditFilter {
            owner_id: "owner-a".into(),
            subject: Some(AuditSubject::ApiKey),
            subject_id: Some(issued.key_id.clone()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert!(events.len() >= 3);
    assert!(events
        .windows(2)
        .all(|pair| pair[0].occurred_at >= pair[1].occurred_at));
    let rendered = serde_json::to_string(&events).unwrap();
    assert!(!rendered.contains(issued.secret.expose()));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn usage_counters_accumulate_per_window(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let issuer = KeyIssuer::new(Arc::new(PgApiKeyStore::new(pool.clone())), pepper());
    let metered = issuer.issue("owner-u", request("metered")).await.unwrap();
    let idle = issuer.issue("owner-u", request("idle")).await.unwrap();

    let usage = PgUsageStore::new(pool);
    let monday = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap();
    let wednesday = Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap();

    usage.increment(&metered.key_id, monday, 1, 150).await.unwrap();
    usage.increment(&metered.key_id, wednesday, 1, 250).await.unwrap();
    usage.increment(&metered.key_id, wednesday, 1, 0).await.unwrap();

    let snapshot = usage.snapshot(&metered.key_id, wednesday).await.unwrap();
    let daily = snapshot.window(UsageWindow::Daily);
    assert_eq!((daily.requests, daily.cost_minor), (2, 250));
    let weekly = snapshot.window(UsageWindow::Weekly);
    assert_eq!((weekly.requests, weekly.cost_minor), (3, 400));
    let monthly = snapshot.window(UsageWindow::Monthly);
    assert_eq!((monthly.requests, monthly.cost_minor), (3, 400));

    let untouched = usage.snapshot(&idle.key_id, wednesday).await.unwrap();
    assert_eq!(untouched.window(UsageWindow::Weekly).requests, 0);

    assert!(matches!(
        usage.increment("gk_ffffffffffffffff", wednesday, 1, 0).await,
        Err(CredentialError::NotFound)
    ));

    let november = Utc.with_ymd_and_hms(2026, 11, 18, 9, 0, 0).unwrap();
    let removed = usage
        .prune_before(UsageWindow::retention_cutoff(november))
        .await
        .unwrap();
    assert_eq!(removed, 4);
    let pruned = usage.snapshot(&metered.key_id, wednesday).await.unwrap();
    assert_eq!(pruned.window(UsageWindow::Monthly).requests, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn duplicate_provider_secret_hits_unique_constraint(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let store = Arc::new(PgProviderCredentialStore::new(pool));
    let service = ProviderCredentialService::new(store, SecretCipher::new(ring(1)));

    let submission = || SubmitCredential {
        provider: "anthropic".into(),
        secret: "sk-ant-api03-0123456789".into(),
        enabled: true,
        always_use: false,
    };
    service.submit("owner-c", submission()).await.unwrap();
    assert!(matches!(
        service.submit("owner-c", submission()).await,
        Err(CredentialError::DuplicateSecret)
    ));
    // Fingerprints are scoped per owner.
    service.submit("owner-d", submission()).await.unwrap();
    assert_eq!(service.list("owner-c").await.unwrap().len(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn rewrap_moves_rows_to_active_version(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let store = Arc::new(PgProviderCredentialStore::new(pool.clone()));
    let old = ProviderCredentialService::new(store.clone(), SecretCipher::new(ring(1)));
    old.submit(
        "owner-c",
        SubmitCredential {
            provider: "openai".into(),
            secret: "sk-proj-rewrap-me-please".into(),
            enabled: true,
            always_use: false,
        },
    )
    .await
    .unwrap();

    let current = ProviderCredentialService::new(store, SecretCipher::new(ring(2)));
    let report = current.rewrap_retired().await.unwrap();
    assert_eq!(report.rewrapped.len(), 1);
    assert!(report.failed.is_empty());

    let events = PgAuditLog::new(pool)
        .query(&AuditFilter {
            owner_id: "owner-c".into(),
            subject: Some(AuditSubject::ProviderCredential),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 2);

    let second = current.rewrap_retired().await.unwrap();
    assert!(second.rewrapped.is_empty());

    let revealed = current.reveal_for_upstream("owner-c", "openai").await.unwrap();
    assert_eq!(revealed.secret.expose(), "sk-proj-rewrap-me-please");
    assert_eq!(current.list("owner-c").await.unwrap()[0].key_version, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn failed_audit_write_rolls_back_rotation(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let store = Arc::new(PgApiKeyStore::new(pool.clone()));
    let issuer = KeyIssuer::new(store.clone(), pepper());
    let verifier = KeyVerifier::new(store, Arc::new(PgUsageStore::new(pool.clone())), pepper());
    let issued = issuer.issue("owner-r", request("prod-key")).await.unwrap();

    sqlx::query("DROP TABLE credential_audit_events")
        .execute(&pool)
        .await
        .unwrap();

    assert!(matches!(
        issuer.rotate_secret(&issued.key_id).await,
        Err(CredentialError::Storage(_))
    ));
    assert!(issuer.revoke(&issued.key_id, None).await.is_err());

    let record = verifier
        .verify(&issued.key_id, issued.secret.expose())
        .await
        .unwrap();
    assert_eq!(record.status, KeyStatus::Active);
    assert_eq!(record.secret_hash, issued.record.secret_hash);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn rewrap_pages_past_undecryptable_rows(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let store = Arc::new(PgProviderCredentialStore::new(pool));
    let lost_key = Arc::new(MasterKeyRing::new(vec![MasterKey::new(3, [0x33; 32]).unwrap()], 3).unwrap());
    let orphaned = ProviderCredentialService::new(store.clone(), SecretCipher::new(lost_key));
    for owner in ["owner-x", "owner-y"] {
        orphaned
            .submit(
                owner,
                SubmitCredential {
                    provider: "openai".into(),
                    secret: format!("sk-proj-orphan-{owner}"),
                    enabled: true,
                    always_use: false,
                },
            )
            .await
            .unwrap();
    }
    let legacy = ProviderCredentialService::new(store.clone(), SecretCipher::new(ring(1)))
        .submit(
            "owner-z",
            SubmitCredential {
                provider: "openai".into(),
                secret: "sk-proj-legacy-000003".into(),
                enabled: true,
                always_use: false,
            },
        )
        .await
        .unwrap();

    let current = ProviderCredentialService::new(store, SecretCipher::new(ring(2)));
    let report = current.rewrap_retired_paged(2).await.unwrap();
    assert_eq!(report.rewrapped, vec![legacy.id]);
    assert_eq!(report.failed.len(), 2);
}
