//! Order number collisions during checkout.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::http::{Method, StatusCode};
use common::{response_json, shipping_address, Caller, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::services::order_number::OrderNumberFn;
use uuid::Uuid;

fn scripted(numbers: &[&str]) -> OrderNumberFn {
    let queue = Arc::new(Mutex::new(
        numbers.iter().map(|n| n.to_string()).collect::<VecDeque<_>>(),
    ));
    Arc::new(move || {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("order number script exhausted")
    })
}

fn order_body(product_id: Uuid) -> Value {
    json!({
        "shippingAddress": shipping_address(),
        "items": [{ "productId": product_id, "quantity": 1 }]
    })
}

async fn place(app: &TestApp, caller: &Caller, product_id: Uuid) -> axum::response::Response {
    app.request(Method::POST, "/orders", Some(order_body(product_id)), caller)
        .await
}

#[tokio::test]
async fn taken_number_is_replaced_with_a_fresh_one() {
    let app = TestApp::new().await.with_order_numbers(scripted(&[
        "ORD-20260101000000-AAAAAA",
        "ORD-20260101000000-AAAAAA",
        "ORD-20260101000000-BBBBBB",
    ]));
    let (_, caller) = app.customer("numbers@example.com");
    let cup = app.seed_product("Cup", dec!(9.00), 5).await;

    let first = place(&app, &caller, cup.id).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(
        response_json(first).await["data"]["orderNumber"],
        "ORD-20260101000000-AAAAAA"
    );

    let second = place(&app, &caller, cup.id).await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        response_json(second).await["data"]["orderNumber"],
        "ORD-20260101000000-BBBBBB"
    );

    assert_eq!(app.order_count().await, 2);
    assert_eq!(app.product_stock(cup.id).await, 3);
}

#[tokio::test]
async fn checkout_gives_up_when_every_number_is_taken() {
    let app = TestApp::new()
        .await
        .with_order_numbers(Arc::new(|| "ORD-20260101000000-SAMESS".to_string()));
    let (_, caller) = app.customer("unlucky@example.com");
    let plate = app.seed_product("Plate", dec!(12.00), 4).await;

    assert_eq!(place(&app, &caller, plate.id).await.status(), StatusCode::CREATED);

    let response = place(&app, &caller, plate.id).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(response).await["code"], "ORDER_NUMBER_CONFLICT");

    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.product_stock(plate.id).await, 3);
}
