//! Payment reconciliation over the HTTP surface: top-up initiation, webhook
//! crediting, dedupe and the unmatched bucket.

mod common;

use std::time::Duration;

use common::{balance_of, create_account, spawn_app};
use reqwest::StatusCode;
use serde_json::json;

async fn webhook(app: &common::TestApp, payload: serde_json::Value) -> serde_json::Value {
    let resp = app
        .client
        .post(format!("{}/payments/confirmation", app.base))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_webhook_topup_credits_account() {
    let app = spawn_app("").await;
    let account = create_account(&app, 0).await;

    // 500 KES at 100 cents per credit -> 500 credits.
    let ack = webhook(
        &app,
        json!({
            "TransID": "WBK1",
            "TransAmount": "500.00",
            "BillRefNumber": format!("USER-{}", account.trim_start_matches("acc_")),
            "MSISDN": "254712345678",
        }),
    )
    .await;
    assert_eq!(ack["ResultCode"], 0);
    assert_eq!(balance_of(&app, &account).await, 500);
}

#[tokio::test]
async fn test_duplicate_webhook_credits_once() {
    let app = spawn_app("").await;
    let account = create_account(&app, 0).await;

    let payload = json!({
        "TransID": "WBK2",
        "TransAmount": 250,
        "BillRefNumber": format!("USER-{}", account.trim_start_matches("acc_")),
        "MSISDN": "254712345678",
    });

    webhook(&app, payload.clone()).await;
    webhook(&app, payload.clone()).await;
    webhook(&app, payload).await;

    assert_eq!(balance_of(&app, &account).await, 250);
}

#[tokio::test]
async fn test_unmatched_payment_held_for_review() {
    let app = spawn_app("").await;
    let account = create_account(&app, 0).await;

    webhook(
        &app,
        json!({
            "TransID": "WBK3",
            "TransAmount": 100,
            "BillRefNumber": "who is this",
            "MSISDN": "254700999888",
        }),
    )
    .await;

    // No account was credited.
    assert_eq!(balance_of(&app, &account).await, 0);

    let unmatched: serde_json::Value = app
        .client
        .get(format!("{}/admin/payments/unmatched", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let unmatched = unmatched.as_array().unwrap();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0]["transaction_id"], "WBK3");
    assert_eq!(unmatched[0]["reference"], "who is this");
}

#[tokio::test]
async fn test_push_topup_lifecycle() {
    let app = spawn_app("").await;
    let account = create_account(&app, 0).await;

    let resp = app
        .client
        .post(format!("{}/v1/topup/initiate", app.base))
        .json(&json!({
            "account_id": account,
            "amount": 100_000,
            "phone": "254712345678",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = resp.json().await.unwrap();
    let intent_id = body["intent_id"].as_str().unwrap().to_string();
    let checkout_id = body["checkout_id"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "pending");

    // The payer completes; the gateway reports it via callback.
    let ack = webhook(
        &app,
        json!({
            "CheckoutRequestID": checkout_id,
            "ResultCode": 0,
            "MpesaReceiptNumber": "PUSH1",
            "Amount": 1000,
        }),
    )
    .await;
    assert_eq!(ack["ResultCode"], 0);

    let status: serde_json::Value = app
        .client
        .get(format!("{}/v1/topup/status?id={intent_id}", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "success");
    assert_eq!(status["credits"], 1000);
    assert_eq!(balance_of(&app, &account).await, 1000);
}

#[tokio::test]
async fn test_push_cancelled_by_payer() {
    let app = spawn_app("").await;
    let account = create_account(&app, 0).await;

    let body: serde_json::Value = app
        .client
        .post(format!("{}/v1/topup/initiate", app.base))
        .json(&json!({
            "account_id": account,
            "amount": 100_000,
            "phone": "254712345678",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let intent_id = body["intent_id"].as_str().unwrap().to_string();
    let checkout_id = body["checkout_id"].as_str().unwrap().to_string();

    webhook(
        &app,
        json!({
            "CheckoutRequestID": checkout_id,
            "ResultCode": 1032,
        }),
    )
    .await;

    let status: serde_json::Value = app
        .client
        .get(format!("{}/v1/topup/status?id={intent_id}", app.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "cancelled");
    assert_eq!(balance_of(&app, &account).await, 0);
}

#[tokio::test]
async fn test_push_times_out_without_resolution() {
    let app = spawn_app("").await;
    let account = create_account(&app, 0).await;

    let body: serde_json::Value = app
        .client
        .post(format!("{}/v1/topup/initiate", app.base))
        .json(&json!({
            "account_id": account,
            "amount": 100_000,
            "phone": "254712345678",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let intent_id = body["intent_id"].as_str().unwrap().to_string();

    // Nobody completes the checkout; 5 polls at 20ms each, then timeout.
    let mut status = String::new();
    for _ in 0..100 {
        let body: serde_json::Value = app
            .client
            .get(format!("{}/v1/topup/status?id={intent_id}", app.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = body["status"].as_str().unwrap().to_string();
        if status != "pending" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "timeout");
    assert_eq!(balance_of(&app, &account).await, 0);
}

#[tokio::test]
async fn test_topup_initiate_validation() {
    let app = spawn_app("").await;
    let account = create_account(&app, 0).await;

    let resp = app
        .client
        .post(format!("{}/v1/topup/initiate", app.base))
        .json(&json!({"account_id": account, "amount": 0, "phone": "254712345678"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .client
        .post(format!("{}/v1/topup/initiate", app.base))
        .json(&json!({"account_id": "acc_999999", "amount": 100, "phone": "254712345678"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
