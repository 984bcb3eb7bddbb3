//! REST API integration tests.
//!
//! Ignored by default; run with `DATABASE_URL` set. Requests go through the
//! full router via `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use loyalty_ledger::infra::{
    PgAuditLogger, PgDirectoryStore, PgLedgerStore, PgLoyaltyService, PgRuleStore,
};
use loyalty_ledger::server::AppState;

async fn test_app() -> Option<(axum::Router, AppState)> {
    let pool = connect_db().await?;
    loyalty_ledger::migrations::run_postgres(&pool).await.ok()?;

    let state = AppState {
        loyalty: Arc::new(PgLoyaltyService::new(pool.clone())),
        ledger: Arc::new(PgLedgerStore::new(pool.clone())),
        rules: Arc::new(PgRuleStore::new(pool.clone())),
        directory: Arc::new(PgDirectoryStore::new(pool.clone())),
        audit: Arc::new(PgAuditLogger::new(pool)),
    };

    let router = axum::Router::new()
        .nest("/api", loyalty_ledger::api::router())
        .with_state(state.clone());
    Some((router, state))
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
#[ignore]
async fn earn_and_redeem_through_the_rest_surface() {
    let Some((app, _state)) = test_app().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };

    // Merchant
    let (status, merchant) = post_json(
        &app,
        "/api/v1/merchants",
        json!({"slug": unique_slug("api"), "display_name": "API Test Shop"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let merchant_id = merchant["id"].as_str().unwrap().to_string();

    // Rule version
    let (status, rule) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/rules"),
        json!({
            "points_per_unit": "1",
            "rounding": "floor",
            "actor": "owner-1",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(rule["version"], 1);

    // Customer
    let (status, customer) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/customers"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let customer_id = customer["id"].as_str().unwrap().to_string();

    // Earn 12.99 -> 12 points under the floor rule.
    let earn_key = key("api-earn");
    let (status, receipt) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/earn"),
        json!({
            "customer_id": customer_id,
            "amount": "12.99",
            "idempotency_key": earn_key.as_str(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["points_delta"], 12);
    assert_eq!(receipt["balance"], 12);
    assert_eq!(receipt["idempotent"], false);

    // Replaying the same request reports idempotent=true.
    let (status, replay) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/earn"),
        json!({
            "customer_id": customer_id,
            "amount": "12.99",
            "idempotency_key": earn_key.as_str(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["idempotent"], true);
    assert_eq!(replay["balance"], 12);

    // Balance endpoint agrees.
    let (status, balance) = get_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/customers/{customer_id}/balance"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["balance"], 12);

    // A reward costing more than the balance is rejected with a stable code.
    let (status, reward) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/rewards"),
        json!({"name": "Big Reward", "points_cost": 500}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let reward_id = reward["id"].as_str().unwrap().to_string();

    let (status, error) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/redeem"),
        json!({
            "customer_id": customer_id,
            "reward_id": reward_id,
            "idempotency_key": key("api-redeem").as_str(),
            "actor": "staff-1",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "INSUFFICIENT_POINTS");
    assert_eq!(error["error"]["details"]["balance"], 12);

    // Ledger listing is newest-first and holds the single earn entry.
    let (status, ledger) = get_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/customers/{customer_id}/ledger"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = ledger.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["entry_type"], "earn");
}

#[tokio::test]
#[ignore]
async fn malformed_input_is_rejected_before_any_write() {
    let Some((app, _state)) = test_app().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };

    let (status, merchant) = post_json(
        &app,
        "/api/v1/merchants",
        json!({"slug": unique_slug("api-bad"), "display_name": "Bad Input Shop"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let merchant_id = merchant["id"].as_str().unwrap().to_string();

    let (_, customer) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/customers"),
        json!({}),
    )
    .await;
    let customer_id = customer["id"].as_str().unwrap().to_string();

    // Non-positive amount.
    let (status, error) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/earn"),
        json!({
            "customer_id": customer_id,
            "amount": "-3.50",
            "idempotency_key": key("bad").as_str(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "INVALID_FIELD_VALUE");

    // Empty idempotency key.
    let (status, error) = post_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/earn"),
        json!({
            "customer_id": customer_id,
            "amount": "10.00",
            "idempotency_key": "",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "INVALID_FIELD_VALUE");

    // Invalid merchant slug.
    let (status, error) = post_json(
        &app,
        "/api/v1/merchants",
        json!({"slug": "Not A Slug!", "display_name": "Nope"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "INVALID_FIELD_VALUE");

    // No ledger rows were written for the failed earns.
    let (_, ledger) = get_json(
        &app,
        &format!("/api/v1/merchants/{merchant_id}/customers/{customer_id}/ledger"),
    )
    .await;
    assert_eq!(ledger.as_array().unwrap().len(), 0);
}
