//! PayPal order creation, capture and webhook reconciliation.

mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use common::{response_json, shipping_address, Caller, MockGateway, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::clients::{
    CaptureResult, GatewayError, PaymentOrderCreated, PaymentOrderDetails,
};
use storefront_api::entities::{OrderStatus, PaymentStatus};
use storefront_api::webhooks::{sign_payload, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "whsec_integration";

fn gateway_creating(external_id: &'static str) -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_create_order().returning(move |request| {
        assert_eq!(request.currency, "USD");
        Ok(PaymentOrderCreated {
            external_id: external_id.to_string(),
            approval_url: Some(format!(
                "https://www.sandbox.paypal.com/checkoutnow?token={}",
                external_id
            )),
        })
    });
    gateway
}

async fn place_paypal_order(app: &TestApp, caller: &Caller, product_id: Uuid) -> Value {
    let response = app
        .request(
            Method::POST,
            "/orders",
            Some(json!({
                "shippingAddress": shipping_address(),
                "paymentMethod": "paypal",
                "items": [{ "productId": product_id, "quantity": 1 }]
            })),
            caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["data"].clone()
}

fn webhook_request(body: &Value, signature: Option<(String, String)>) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/payments/paypal/webhook")
        .header("content-type", "application/json");
    if let Some((ts, sig)) = signature {
        builder = builder
            .header(TIMESTAMP_HEADER, ts)
            .header(SIGNATURE_HEADER, sig);
    }
    builder.body(Body::from(bytes)).unwrap()
}

fn signed(body: &Value) -> Request<Body> {
    let ts = chrono::Utc::now().timestamp().to_string();
    let sig = sign_payload(WEBHOOK_SECRET, &ts, &serde_json::to_vec(body).unwrap()).unwrap();
    webhook_request(body, Some((ts, sig)))
}

fn capture_completed(paypal_order_id: &str, capture_id: &str) -> Value {
    json!({
        "id": format!("WH-{}", capture_id),
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": capture_id,
            "status": "COMPLETED",
            "supplementary_data": { "related_ids": { "order_id": paypal_order_id } }
        }
    })
}

#[tokio::test]
async fn paypal_checkout_returns_approval_url_and_defers_confirmation() {
    let app = TestApp::with_gateway(gateway_creating("PP-100")).await;
    let (_, caller) = app.customer("payer@example.com");
    let lens = app.seed_product("Lens", dec!(300.00), 2).await;

    let order = place_paypal_order(&app, &caller, lens.id).await;
    assert_eq!(order["paymentMethod"], "paypal");
    assert_eq!(order["paypalOrderId"], "PP-100");
    assert_eq!(
        order["approvalUrl"],
        "https://www.sandbox.paypal.com/checkoutnow?token=PP-100"
    );
    assert_eq!(order["paymentOrderFailed"], false);
    assert!(app.notifier.order_numbers().is_empty());
}

#[tokio::test]
async fn gateway_outage_keeps_the_order() {
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_order()
        .times(1)
        .returning(|_| Err(GatewayError::NotConfigured));
    let app = TestApp::with_gateway(gateway).await;
    let (_, caller) = app.customer("outage@example.com");
    let tripod = app.seed_product("Tripod", dec!(45.00), 2).await;

    let order = place_paypal_order(&app, &caller, tripod.id).await;
    assert_eq!(order["paymentOrderFailed"], true);
    assert!(order["approvalUrl"].is_null());
    assert!(order["paypalOrderId"].is_null());
    assert_eq!(app.product_stock(tripod.id).await, 1);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn capture_marks_order_paid_once() {
    let mut gateway = gateway_creating("PP-200");
    gateway
        .expect_capture_order()
        .withf(|id| id.to_string() == "PP-200")
        .times(1)
        .returning(|_| {
            Ok(CaptureResult {
                capture_id: Some("CAP-200".to_string()),
                status: "COMPLETED".to_string(),
            })
        });
    let app = TestApp::with_gateway(gateway).await;
    let (_, caller) = app.customer("capture@example.com");
    let drone = app.seed_product("Drone", dec!(499.00), 1).await;
    let order = place_paypal_order(&app, &caller, drone.id).await;
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    let first = app
        .request(
            Method::POST,
            "/payments/paypal/capture/PP-200",
            None,
            &Caller::Anonymous,
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let body = response_json(first).await;
    assert_eq!(body["data"]["paymentStatus"], "paid");
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["captureId"], "CAP-200");
    assert_eq!(body["data"]["alreadyCaptured"], false);

    let second = app
        .request(
            Method::POST,
            "/payments/paypal/capture/PP-200",
            None,
            &Caller::Anonymous,
        )
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    let body = response_json(second).await;
    assert_eq!(body["data"]["alreadyCaptured"], true);
    assert_eq!(body["message"], "Payment already captured");

    let stored = app.load_order(order_id).await;
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.status, OrderStatus::Processing);
    assert!(stored.paid_at.is_some());
    assert_eq!(app.notifier.order_numbers(), vec![stored.order_number]);
}

#[tokio::test]
async fn pending_capture_keeps_order_unpaid() {
    let mut gateway = gateway_creating("PP-250");
    gateway.expect_capture_order().times(1).returning(|_| {
        Ok(CaptureResult {
            capture_id: Some("CAP-250".to_string()),
            status: "PENDING".to_string(),
        })
    });
    let app = TestApp::with_gateway(gateway).await;
    let (_, caller) = app.customer("pending@example.com");
    let phone = app.seed_product("Phone", dec!(650.00), 1).await;
    let order = place_paypal_order(&app, &caller, phone.id).await;
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    let response = app
        .request(
            Method::POST,
            "/payments/paypal/capture/PP-250",
            None,
            &Caller::Anonymous,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["captureStatus"], "PENDING");

    let stored = app.load_order(order_id).await;
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.paypal_capture_id.as_deref(), Some("CAP-250"));

    // The completion webhook later finds the order through its capture id
    let outcome = app.send(webhook_request(&capture_completed("unknown", "CAP-250"), None)).await;
    assert_eq!(response_json(outcome).await["data"]["outcome"], "applied");
    assert_eq!(app.load_order(order_id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn capture_of_unknown_order_never_reaches_paypal() {
    // No expectations: any gateway call fails the test
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/payments/paypal/capture/PP-MISSING",
            None,
            &Caller::Anonymous,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["code"], "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn duplicate_capture_webhook_is_applied_once() {
    let app = TestApp::build(gateway_creating("PP-300"), |cfg| {
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await;
    let (_, caller) = app.customer("webhook@example.com");
    let amp = app.seed_product("Amp", dec!(220.00), 3).await;
    let order = place_paypal_order(&app, &caller, amp.id).await;
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    let event = capture_completed("PP-300", "CAP-300");
    let first = app.send(signed(&event)).await;
    assert_eq!(first.status(), StatusCode::OK);
    let body = response_json(first).await;
    assert_eq!(body["data"]["outcome"], "applied");
    assert_eq!(body["data"]["eventType"], "PAYMENT.CAPTURE.COMPLETED");

    let paid_at = app.load_order(order_id).await.paid_at;
    assert!(paid_at.is_some());

    let second = app.send(signed(&event)).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(response_json(second).await["data"]["outcome"], "already_applied");

    let stored = app.load_order(order_id).await;
    assert_eq!(stored.paid_at, paid_at);
    assert_eq!(stored.paypal_capture_id.as_deref(), Some("CAP-300"));
    assert_eq!(app.notifier.order_numbers().len(), 1);
}

#[tokio::test]
async fn refund_webhook_marks_order_refunded() {
    let app = TestApp::with_gateway(gateway_creating("PP-400")).await;
    let (_, caller) = app.customer("refund@example.com");
    let synth = app.seed_product("Synth", dec!(900.00), 1).await;
    let order = place_paypal_order(&app, &caller, synth.id).await;
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    app.send(webhook_request(&capture_completed("PP-400", "CAP-400"), None))
        .await;

    let refund = json!({
        "id": "WH-REF-400",
        "event_type": "PAYMENT.CAPTURE.REFUNDED",
        "resource": {
            "id": "REF-400",
            "links": [
                { "rel": "up", "href": "https://api.sandbox.paypal.com/v2/payments/captures/CAP-400" }
            ]
        }
    });
    let response = app.send(webhook_request(&refund, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["outcome"], "applied");

    let stored = app.load_order(order_id).await;
    assert_eq!(stored.status, OrderStatus::Refunded);
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    assert!(stored.refunded_at.is_some());

    let replay = app.send(webhook_request(&refund, None)).await;
    assert_eq!(response_json(replay).await["data"]["outcome"], "already_applied");
}

#[tokio::test]
async fn capture_redelivered_after_refund_keeps_the_refund() {
    let app = TestApp::with_gateway(gateway_creating("PP-450")).await;
    let (_, caller) = app.customer("redeliver@example.com");
    let piano = app.seed_product("Piano", dec!(1500.00), 1).await;
    let order = place_paypal_order(&app, &caller, piano.id).await;
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    let capture = capture_completed("PP-450", "CAP-450");
    app.send(webhook_request(&capture, None)).await;
    let paid_at = app.load_order(order_id).await.paid_at;
    assert!(paid_at.is_some());

    let refund = json!({
        "id": "WH-REF-450",
        "event_type": "PAYMENT.CAPTURE.REFUNDED",
        "resource": {
            "id": "REF-450",
            "links": [
                { "rel": "up", "href": "https://api.sandbox.paypal.com/v2/payments/captures/CAP-450" }
            ]
        }
    });
    app.send(webhook_request(&refund, None)).await;

    let replay = app.send(webhook_request(&capture, None)).await;
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(response_json(replay).await["data"]["outcome"], "already_applied");

    let stored = app.load_order(order_id).await;
    assert_eq!(stored.status, OrderStatus::Refunded);
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    assert_eq!(stored.paid_at, paid_at);
    assert_eq!(app.notifier.order_numbers().len(), 1);
}

#[tokio::test]
async fn canceled_orders_are_never_captured() {
    // No capture expectation: a gateway capture call fails the test
    let app = TestApp::with_gateway(gateway_creating("PP-800")).await;
    let (_, caller) = app.customer("changed-mind@example.com");
    let bike = app.seed_product("Bike", dec!(640.00), 2).await;
    let order = place_paypal_order(&app, &caller, bike.id).await;
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    let cancel = app
        .request(
            Method::POST,
            &format!("/orders/cancel/{}", order_id),
            None,
            &caller,
        )
        .await;
    assert_eq!(cancel.status(), StatusCode::OK);
    assert_eq!(app.product_stock(bike.id).await, 2);

    let capture = app
        .request(
            Method::POST,
            "/payments/paypal/capture/PP-800",
            None,
            &Caller::Anonymous,
        )
        .await;
    assert_eq!(capture.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(capture).await["code"], "ORDER_ALREADY_CANCELED");

    // A capture that settled on PayPal's side anyway is flagged, not applied
    let webhook = app
        .send(webhook_request(&capture_completed("PP-800", "CAP-800"), None))
        .await;
    assert_eq!(webhook.status(), StatusCode::OK);
    assert_eq!(response_json(webhook).await["data"]["outcome"], "mismatch");

    let stored = app.load_order(order_id).await;
    assert_eq!(stored.status, OrderStatus::Canceled);
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.paid_at.is_none());
    assert!(app.notifier.order_numbers().is_empty());
}

#[tokio::test]
async fn unknown_webhook_events_are_acknowledged() {
    let app = TestApp::new().await;
    let event = json!({
        "id": "WH-X",
        "event_type": "CHECKOUT.ORDER.APPROVED",
        "resource": { "id": "PP-X" }
    });

    let response = app.send(webhook_request(&event, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["outcome"], "ignored");
    assert_eq!(body["data"]["eventId"], "WH-X");
}

#[tokio::test]
async fn webhook_signature_is_enforced_when_configured() {
    let app = TestApp::build(MockGateway::new(), |cfg| {
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await;
    let event = capture_completed("PP-500", "CAP-500");

    let unsigned = app.send(webhook_request(&event, None)).await;
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let ts = chrono::Utc::now().timestamp().to_string();
    let forged = app
        .send(webhook_request(&event, Some((ts, "00ff".to_string()))))
        .await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(forged).await["code"], "UNAUTHORIZED");

    let garbage = {
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = sign_payload(WEBHOOK_SECRET, &ts, b"not json").unwrap();
        Request::builder()
            .method(Method::POST)
            .uri("/payments/paypal/webhook")
            .header(TIMESTAMP_HEADER, ts)
            .header(SIGNATURE_HEADER, sig)
            .body(Body::from("not json"))
            .unwrap()
    };
    assert_eq!(app.send(garbage).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payment_status_asks_provider_while_unpaid() {
    let mut gateway = gateway_creating("PP-600");
    gateway
        .expect_get_order_details()
        .withf(|id| id.to_string() == "PP-600")
        .times(1)
        .returning(|_| {
            Ok(PaymentOrderDetails {
                status: "APPROVED".to_string(),
                payer_email: Some("buyer@paypal.example".to_string()),
            })
        });
    let app = TestApp::with_gateway(gateway).await;
    let (_, caller) = app.customer("status@example.com");
    let dock = app.seed_product("Dock", dec!(120.00), 2).await;
    let order = place_paypal_order(&app, &caller, dock.id).await;

    let response = app
        .request(
            Method::GET,
            &format!("/payments/status/{}", order["id"].as_str().unwrap()),
            None,
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["paymentStatus"], "pending");
    assert_eq!(body["data"]["providerStatus"], "APPROVED");
    assert_eq!(body["data"]["payerEmail"], "buyer@paypal.example");
}

#[tokio::test]
async fn paypal_order_can_be_recreated_for_unpaid_orders() {
    let mut gateway = MockGateway::new();
    let mut seq = mockall::Sequence::new();
    for external in ["PP-700", "PP-701"] {
        gateway
            .expect_create_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| {
                Ok(PaymentOrderCreated {
                    external_id: external.to_string(),
                    approval_url: None,
                })
            });
    }
    let app = TestApp::with_gateway(gateway).await;
    let (_, caller) = app.customer("retry@example.com");
    let board = app.seed_product("Board", dec!(75.00), 2).await;
    let order = place_paypal_order(&app, &caller, board.id).await;
    // No approve link from PayPal, the stored reference is still reported
    assert!(order["approvalUrl"].is_null());
    assert_eq!(order["paypalOrderId"], "PP-700");

    let response = app
        .request(
            Method::POST,
            &format!("/payments/paypal/create/{}", order["id"].as_str().unwrap()),
            None,
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response_json(response).await["data"]["paypalOrderId"], "PP-701");

    // Cash orders have nothing to create
    let cash = app
        .request(
            Method::POST,
            "/orders",
            Some(json!({
                "shippingAddress": shipping_address(),
                "paymentMethod": "cash_on_delivery",
                "items": [{ "productId": board.id, "quantity": 1 }]
            })),
            &caller,
        )
        .await;
    let cash = response_json(cash).await["data"].clone();
    let response = app
        .request(
            Method::POST,
            &format!("/payments/paypal/create/{}", cash["id"].as_str().unwrap()),
            None,
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(response).await["code"], "INVALID_STATUS");
}
