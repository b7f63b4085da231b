//! Competing checkouts for the same units.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, shipping_address, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::repositories::{CatalogStore, StockRef};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_unit_is_sold_exactly_once() {
    let app = TestApp::new().await;
    let (_, first) = app.customer("first@example.com");
    let (_, second) = app.customer("second@example.com");
    let clock = app.seed_product("Clock", dec!(55.00), 1).await;

    let body = json!({
        "shippingAddress": shipping_address(),
        "paymentMethod": "cash_on_delivery",
        "items": [{ "productId": clock.id, "quantity": 1 }]
    });

    let (a, b) = tokio::join!(
        app.request(Method::POST, "/orders", Some(body.clone()), &first),
        app.request(Method::POST, "/orders", Some(body.clone()), &second),
    );

    let mut statuses = vec![a.status(), b.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);

    let loser = if a.status() == StatusCode::CONFLICT { a } else { b };
    assert_eq!(response_json(loser).await["code"], "INSUFFICIENT_STOCK");

    assert_eq!(app.product_stock(clock.id).await, 0);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stock_never_goes_negative_under_load() {
    let app = TestApp::new().await;
    let radio = app.seed_product("Radio", dec!(10.00), 3).await;

    let callers: Vec<_> = (0..6)
        .map(|i| app.customer(&format!("buyer{}@example.com", i)).1)
        .collect();
    let body = json!({
        "shippingAddress": shipping_address(),
        "items": [{ "productId": radio.id, "quantity": 1 }]
    });

    let responses = futures::future::join_all(
        callers
            .iter()
            .map(|caller| app.request(Method::POST, "/orders", Some(body.clone()), caller)),
    )
    .await;

    let placed = responses
        .iter()
        .filter(|r| r.status() == StatusCode::CREATED)
        .count();
    let rejected = responses
        .iter()
        .filter(|r| r.status() == StatusCode::CONFLICT)
        .count();

    assert_eq!(placed, 3);
    assert_eq!(rejected, 3);
    assert_eq!(app.product_stock(radio.id).await, 0);
    assert_eq!(app.order_count().await, 3);
}

#[tokio::test]
async fn guarded_decrement_leaves_short_rows_untouched() {
    let app = TestApp::new().await;
    let kettle = app.seed_product("Kettle", dec!(28.00), 3).await;
    let blue = app.seed_variant(kettle.id, "KETTLE-BLUE", None, 1).await;
    let db = &*app.state.db;
    let product = StockRef::Product(kettle.id);

    assert!(!CatalogStore::decrement_stock(db, product, 4).await.unwrap());
    assert_eq!(app.product_stock(kettle.id).await, 3);

    assert!(CatalogStore::decrement_stock(db, product, 3).await.unwrap());
    assert_eq!(app.product_stock(kettle.id).await, 0);
    assert!(!CatalogStore::decrement_stock(db, product, 1).await.unwrap());
    assert_eq!(app.product_stock(kettle.id).await, 0);

    assert!(!CatalogStore::decrement_stock(db, StockRef::Variant(blue.id), 2)
        .await
        .unwrap());
    assert_eq!(app.variant_stock(blue.id).await, 1);
}
