use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use gateway_credentials::crypto::{MasterKey, MasterKeyRing, Pepper};
use gateway_credentials::{app, AdminToken, AppServices, KeyMaterial};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

const ADMIN: &str = "operator-token-0123456789";

fn test_app() -> Router {
    let material = KeyMaterial {
        ring: Arc::new(MasterKeyRing::new(vec![MasterKey::new(1, [9u8; 32]).unwrap()], 1).unwrap()),
        pepper: Arc::new(Pepper::new(vec![4u8; 32]).unwrap()),
    };
    let services = AppServices::in_memory(&material, AdminToken::new(ADMIN).unwrap());
    app(Arc::new(services))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

fn as_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

async fn issue(app: &Router, name: &str) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/owners/owner-a/keys",
        Some(ADMIN),
        Some(json!({"name": name})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    as_json(&body)
}

#[tokio::test]
async fn root_and_health_respond_ok() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Gateway Credentials API");
    let (status, _) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_require_the_admin_token() {
    let app = test_app();
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/owners/owner-a/keys",
        None,
        Some(json!({"name": "prod-key"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/owners/owner-a/keys",
        Some("operator-token-0123456780"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn issued_secret_is_shown_once() {
    let app = test_app();
    let issued = issue(&app, "prod-key").await;
    let secret = issued["secret"].as_str().unwrap().to_string();
    assert!(secret.starts_with("sk_live_"));
    assert!(issued["key"].get("secret_hash").is_none());

    let (status, body) = send(&app, Method::GET, "/api/owners/owner-a/keys", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    let listing = String::from_utf8(body).unwrap();
    assert!(listing.contains(issued["key_id"].as_str().unwrap()));
    assert!(!listing.contains(&secret));
}

#[tokio::test]
async fn verification_failures_are_indistinguishable() {
    let app = test_app();
    let issued = issue(&app, "prod-key").await;
    let key_id = issued["key_id"].as_str().unwrap();
    let bearer = issued["bearer_token"].as_str().unwrap();

    let (status, body) = send(&app, Method::POST, "/api/gateway/authorize", Some(bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["owner_id"], "owner-a");

    let wrong_secret = format!("{key_id}.sk_live_{}", "0".repeat(64));
    let unknown_key = format!("gk_ffffffffffffffff.{}", issued["secret"].as_str().unwrap());
    let (_, update_body) = send(
        &app,
        Method::PATCH,
        &format!("/api/keys/{key_id}"),
        Some(ADMIN),
        Some(json!({"paused": true})),
    )
    .await;
    assert_eq!(as_json(&update_body)["status"], "paused");

    let mut bodies = Vec::new();
    for token in [wrong_secret.as_str(), unknown_key.as_str(), bearer, "garbage"] {
        let (status, body) =
            send(&app, Method::POST, "/api/gateway/authorize", Some(token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        bodies.push(body);
    }
    assert!(bodies.iter().all(|body| body == b"unauthorized"));
}

#[tokio::test]
async fn exhausted_cap_returns_generic_rate_limit() {
    let app = test_app();
    let issued = issue(&app, "metered").await;
    let key_id = issued["key_id"].as_str().unwrap();
    let bearer = issued["bearer_token"].as_str().unwrap();

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/keys/{key_id}/limits"),
        Some(ADMIN),
        Some(json!({"daily_requests": {"set": 1}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["limits"]["daily_requests"], 1);

    let (status, _) = send(&app, Method::POST, "/api/gateway/authorize", Some(bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/gateway/usage",
        Some(ADMIN),
        Some(json!({"key_id": key_id, "cost_minor": 25})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::POST, "/api/gateway/authorize", Some(bearer), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, b"rate limited");
}

#[tokio::test]
async fn revoke_requires_matching_confirmation() {
    let app = test_app();
    let issued = issue(&app, "prod-key").await;
    let key_id = issued["key_id"].as_str().unwrap();
    let uri = format!("/api/keys/{key_id}/revoke");

    let (status, _) = send(
        &app,
        Method::POST,
        &uri,
        Some(ADMIN),
        Some(json!({"confirmation_name": "prod"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        Method::POST,
        &uri,
        Some(ADMIN),
        Some(json!({"confirmation_name": "prod-key"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = as_json(&body);
    assert_eq!(body["key"]["status"], "revoked");
    assert_eq!(body["already_revoked"], false);

    let (status, body) = send(&app, Method::POST, &uri, Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["already_revoked"], true);
}

#[tokio::test]
async fn duplicate_provider_credential_conflicts() {
    let app = test_app();
    let uri = "/api/owners/owner-b/provider-credentials";
    let payload = json!({"provider": "openai", "secret": "sk-proj-abcdef123456"});

    let (status, body) = send(&app, Method::POST, uri, Some(ADMIN), Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let created = as_json(&body);
    assert_eq!(created["verification_status"], "unverified");

    let (status, body) = send(&app, Method::POST, uri, Some(ADMIN), Some(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, b"duplicate key");

    let (status, body) = send(&app, Method::GET, uri, Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    let listing = String::from_utf8(body).unwrap();
    assert!(!listing.contains("abcdef123456"));
    assert!(!listing.contains("ciphertext"));

    let id = created["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("{uri}/{id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("{uri}/{id}"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn audit_trail_is_listed_per_owner() {
    let app = test_app();
    let issued = issue(&app, "prod-key").await;
    let key_id = issued["key_id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/keys/{key_id}/rotate"),
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::GET, "/api/owners/owner-a/audit", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = format!("/api/owners/owner-a/audit?subject=api_key&subject_id={key_id}");
    let (status, body) = send(&app, Method::GET, &uri, Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    let events = as_json(&body);
    let types: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["key_secret_rotated", "key_issued"]);
    assert!(!String::from_utf8(body).unwrap().contains(issued["secret"].as_str().unwrap()));

    let (status, body) = send(&app, Method::GET, "/api/owners/owner-b/audit", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body), json!([]));
}

#[tokio::test]
async fn usage_for_unknown_key_is_not_found() {
    let app = test_app();
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/gateway/usage",
        Some(ADMIN),
        Some(json!({"key_id": "gk_ffffffffffffffff", "cost_minor": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
