//! HTTP surface tests driving the full router with `oneshot`.

mod common;

use axum::body::Body;
use common::{charge_event, harness, sign, AuthorizeScript, VerifyScript};
use http::{Request, StatusCode};
use serde_json::{json, Value};
use ticketpay_backend::build_router;
use ticketpay_backend::payments::GatewayStatus;
use tower::util::ServiceExt;

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, headers, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn webhook(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payment/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-paystack-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn initialize_body() -> Value {
    json!({
        "amount": 50000,
        "currency": "NGN",
        "email": "fan@example.com",
        "metadata": {"eventId": "evt_concert_42", "tier": "VIP"},
        "channels": ["card"]
    })
}

#[tokio::test]
async fn initialize_webhook_verify_flow() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let (status, headers, body) =
        send(app.clone(), post_json("/payment/initialize", initialize_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(body["status"], "authorizing");
    let reference = body["reference"].as_str().unwrap().to_string();
    assert!(body["authorizationUrl"]
        .as_str()
        .unwrap()
        .ends_with(&reference));

    let event = charge_event("charge.success", &reference, 901, "success", 50_000);
    let signature = sign(&event);
    let (status, _, body) = send(app.clone(), webhook(event.clone(), Some(signature.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "applied");

    let (status, _, body) = send(app.clone(), webhook(event, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "duplicate");

    let (status, _, body) = send(
        app.clone(),
        post_json("/payment/verify", json!({ "reference": reference })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["amount"], 50000);
    assert_eq!(body["currency"], "NGN");
    assert_eq!(body["gatewayTransactionId"], "901");

    let (status, _, body) = send(app, get(&format!("/payment/intents/{}", reference))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "SUCCEEDED");
    assert!(body.get("reconciledEventIds").is_none());
}

#[tokio::test]
async fn initialize_rejects_invalid_input_with_error_body() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let mut bad_amount = initialize_body();
    bad_amount["amount"] = json!(0);
    let (status, _, body) = send(app.clone(), post_json("/payment/initialize", bad_amount)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_AMOUNT");
    assert!(body["request_id"].is_string());

    let mut bad_email = initialize_body();
    bad_email["email"] = json!("not-an-email");
    let (status, _, body) = send(app.clone(), post_json("/payment/initialize", bad_email)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let mut bad_currency = initialize_body();
    bad_currency["currency"] = json!("BTC");
    let (status, _, body) = send(app.clone(), post_json("/payment/initialize", bad_currency)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_CURRENCY");

    let (status, _, _) = send(
        app,
        Request::builder()
            .method("POST")
            .uri("/payment/initialize")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.store.len().await, 0);
}

#[tokio::test]
async fn gateway_timeout_is_reported_as_pending() {
    let h = harness();
    h.gateway.script_authorize(AuthorizeScript::Hang);
    h.gateway.script_verify(VerifyScript::Unreachable);
    let app = build_router(h.lifecycle.clone());

    let (status, _, body) =
        send(app.clone(), post_json("/payment/initialize", initialize_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert!(body["authorizationUrl"].is_null());
    let reference = body["reference"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        app,
        post_json("/payment/verify", json!({ "reference": reference })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn definitive_gateway_rejection_is_bad_gateway() {
    let h = harness();
    h.gateway
        .script_authorize(AuthorizeScript::Reject("Invalid key".to_string()));
    let app = build_router(h.lifecycle.clone());

    let (status, _, body) = send(app, post_json("/payment/initialize", initialize_body())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "PAYMENT_PROVIDER_ERROR");
}

#[tokio::test]
async fn callback_verifies_by_trxref() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let (_, _, body) = send(app.clone(), post_json("/payment/initialize", initialize_body())).await;
    let reference = body["reference"].as_str().unwrap().to_string();

    h.gateway
        .script_verify(VerifyScript::Status(GatewayStatus::Failed));
    let (status, _, body) = send(
        app.clone(),
        get(&format!("/payment/callback?trxref={}", reference)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");

    let (status, _, body) = send(app, get("/payment/callback")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert!(body["message"].as_str().unwrap().contains("reference"));
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let (status, _, body) = send(
        app.clone(),
        post_json("/payment/verify", json!({ "reference": "TKT-missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "INTENT_NOT_FOUND");

    let (status, _, _) = send(app, get("/payment/intents/TKT-missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_signature_failures_are_rejected_without_mutation() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let (_, _, body) = send(app.clone(), post_json("/payment/initialize", initialize_body())).await;
    let reference = body["reference"].as_str().unwrap().to_string();
    let event = charge_event("charge.success", &reference, 5, "success", 50_000);

    let (status, _, body) = send(app.clone(), webhook(event.clone(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_SIGNATURE");

    let (status, _, _) = send(app.clone(), webhook(event.clone(), Some("00".repeat(64)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signature over different bytes
    let tampered = charge_event("charge.success", &reference, 5, "success", 1);
    let (status, _, _) = send(app.clone(), webhook(tampered, Some(sign(&event)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, _, body) = send(app, get(&format!("/payment/intents/{}", reference))).await;
    assert_eq!(body["state"], "AUTHORIZING");
}

#[tokio::test]
async fn authentic_but_unusable_webhooks_are_acknowledged() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let unknown = charge_event("charge.success", "TKT-unknown", 6, "success", 50_000);
    let (status, _, body) = send(app.clone(), webhook(unknown.clone(), Some(sign(&unknown)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "ignored");

    let transfer = serde_json::to_vec(&json!({
        "event": "transfer.success",
        "data": {"id": 7, "reference": "TKT-unknown", "status": "success"}
    }))
    .unwrap();
    let (status, _, body) = send(app.clone(), webhook(transfer.clone(), Some(sign(&transfer)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "ignored");

    let garbage = b"not json".to_vec();
    let (status, _, _) = send(app, webhook(garbage.clone(), Some(sign(&garbage)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_amount_webhook_is_rejected_but_acknowledged() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let (_, _, body) = send(app.clone(), post_json("/payment/initialize", initialize_body())).await;
    let reference = body["reference"].as_str().unwrap().to_string();

    let event = charge_event("charge.success", &reference, 8, "success", 100);
    let (status, _, body) = send(app.clone(), webhook(event.clone(), Some(sign(&event)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "rejected");

    let (_, _, body) = send(app, get(&format!("/payment/intents/{}", reference))).await;
    assert_eq!(body["state"], "AUTHORIZING");
}

#[tokio::test]
async fn capability_endpoints() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    let (status, _, body) = send(app.clone(), get("/payment/methods")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider"], "paystack");
    assert!(body["channels"]
        .as_array()
        .unwrap()
        .contains(&json!("card")));

    let (_, _, body) = send(app.clone(), get("/payment/currencies")).await;
    let currencies: Vec<&str> = body["currencies"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c.as_str())
        .collect();
    assert_eq!(currencies, vec!["NGN", "GHS", "ZAR", "USD"]);

    let (_, _, body) = send(app.clone(), get("/payment/verify-config")).await;
    assert_eq!(body["publicKeyConfigured"], true);
    assert_eq!(body["webhookSecretConfigured"], true);
    assert_eq!(body["intentTtlSecs"], 1800);
    assert!(body.to_string().find("sk_test").is_none());

    let (status, _, body) = send(app.clone(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Healthy");

    let (status, _, _) = send(app, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn metadata_comes_back_verbatim_from_verification() {
    let h = harness();
    let app = build_router(h.lifecycle.clone());

    // Raw text so the key order on the wire is exactly what a client sent
    let raw = r#"{"amount":50000,"currency":"NGN","email":"fan@example.com","metadata":{"zeta":"last-alphabetically","tier":"VIP","alpha":{"row":"K","block":"A"}}}"#;
    let (status, _, body) = send(
        app.clone(),
        Request::builder()
            .method("POST")
            .uri("/payment/initialize")
            .header("content-type", "application/json")
            .body(Body::from(raw))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reference = body["reference"].as_str().unwrap().to_string();

    h.gateway
        .script_verify(VerifyScript::Status(GatewayStatus::Success));
    let response = app
        .clone()
        .oneshot(post_json("/payment/verify", json!({ "reference": reference })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();
    assert!(text.contains(
        r#""metadata":{"zeta":"last-alphabetically","tier":"VIP","alpha":{"row":"K","block":"A"}}"#
    ));

    let (_, _, body) = send(app, get(&format!("/payment/intents/{}", reference))).await;
    let keys: Vec<&str> = body["metadata"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["zeta", "tier", "alpha"]);
}
