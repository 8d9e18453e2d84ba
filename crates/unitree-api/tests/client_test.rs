#![allow(clippy::unwrap_used)]
// Integration tests for `ApiClient` using wiremock.

use chrono::{NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{bearer_token, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unitree_api::{ApiClient, Error, SessionUpload, TransactionUpload, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let token = SecretString::from("test-token".to_string());
    let client = ApiClient::from_token(&server.uri(), &token, &TransportConfig::default()).unwrap();
    (server, client)
}

fn session(id: Uuid) -> SessionUpload {
    SessionUpload {
        id,
        user_id: "student-1".into(),
        device_id: "phone-a".into(),
        start_time: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        end_time: Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 45, 0).unwrap()),
        ip_address: "10.22.5.9".into(),
        is_active: false,
        duration_seconds: Some(2700),
        points_earned: Some(90),
        ip_valid: true,
        location_valid: true,
        campus_name: Some("Main".into()),
        distance_meters: Some(42.0),
        end_reason: Some("validation_failed".into()),
    }
}

// ── Session upload ──────────────────────────────────────────────────

#[tokio::test]
async fn upload_session_sends_idempotency_key_and_token() {
    let (server, client) = setup().await;
    let id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/wifi-sessions"))
        .and(bearer_token("test-token"))
        .and(header("Idempotency-Key", id.to_string().as_str()))
        .and(body_partial_json(json!({
            "userId": "student-1",
            "durationSeconds": 2700,
            "pointsEarned": 90
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": id })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client.upload_session(&session(id)).await.unwrap();
    assert_eq!(ack.id, id);
    assert!(!ack.duplicate);
}

#[tokio::test]
async fn replayed_upload_is_acknowledged_as_duplicate() {
    let (server, client) = setup().await;
    let id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/wifi-sessions"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "message": "session already recorded"
        })))
        .mount(&server)
        .await;

    let ack = client.upload_session(&session(id)).await.unwrap();
    assert_eq!(ack.id, id);
    assert!(ack.duplicate);
}

// ── Transaction upload ──────────────────────────────────────────────

#[tokio::test]
async fn upload_transaction_is_keyed_by_source_session() {
    let (server, client) = setup().await;
    let session_id = Uuid::new_v4();
    let tx = TransactionUpload {
        id: Uuid::new_v4(),
        user_id: "student-1".into(),
        amount: 90,
        kind: "WIFI_SESSION".into(),
        source_session_id: Some(session_id),
        created_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 45, 0).unwrap(),
    };

    Mock::given(method("POST"))
        .and(path("/api/points/transactions"))
        .and(header("Idempotency-Key", session_id.to_string().as_str()))
        .and(body_partial_json(json!({ "type": "WIFI_SESSION", "amount": 90 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": tx.id })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client.upload_transaction(&tx).await.unwrap();
    assert_eq!(ack.id, tx.id);
}

// ── Ledger balance ──────────────────────────────────────────────────

#[tokio::test]
async fn wifi_points_total_queries_by_date() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/points/users/student-1/wifi-total"))
        .and(query_param("date", "2026-03-02"))
        .and(query_param("utcOffsetMinutes", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "date": "2026-03-02",
            "total": 450
        })))
        .mount(&server)
        .await;

    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let total = client.wifi_points_total("student-1", date, 0).await.unwrap();
    assert_eq!(total.total, 450);
    assert_eq!(total.date, date);
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_maps_to_invalid_token() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/points/users/student-1/wifi-total"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let result = client.wifi_points_total("student-1", date, 0).await;
    assert!(
        matches!(result, Err(Error::InvalidToken)),
        "expected InvalidToken, got: {result:?}"
    );
}

#[tokio::test]
async fn server_error_is_structured_and_transient() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/wifi-sessions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "message": "database unavailable",
            "code": "db.down"
        })))
        .mount(&server)
        .await;

    let err = client
        .upload_session(&session(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.api_error_code(), Some("db.down"));
}

#[tokio::test]
async fn rate_limit_reads_retry_after() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/wifi-sessions"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
        .mount(&server)
        .await;

    let result = client.upload_session(&session(Uuid::new_v4())).await;
    assert!(matches!(
        result,
        Err(Error::RateLimited {
            retry_after_secs: 12
        })
    ));
}

#[tokio::test]
async fn malformed_body_is_a_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/points/users/student-1/wifi-total"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let result = client.wifi_points_total("student-1", date, 0).await;
    assert!(matches!(result, Err(Error::Deserialization { .. })));
}
