#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use mockall::mock;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    auth::{Claims, SESSION_HEADER},
    clients::{
        CaptureResult, GatewayError, PaymentGateway, PaymentOrderCreated, PaymentOrderDetails,
        PaymentOrderRequest,
    },
    config::AppConfig,
    db,
    entities::{order, product, product_variant, OrderStatus},
    events::{self, EventSender},
    notifications::{Notifier, NotifyError, OrderConfirmation},
    services::order_number::OrderNumberFn,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "storefront_integration_signing_key_5c4b3a2f1e0d_plmokn_ijbuhv_56473829";

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
        async fn create_order(
            &self,
            request: &PaymentOrderRequest,
        ) -> Result<PaymentOrderCreated, GatewayError>;

        async fn capture_order(&self, external_id: &str) -> Result<CaptureResult, GatewayError>;

        async fn get_order_details(
            &self,
            external_id: &str,
        ) -> Result<PaymentOrderDetails, GatewayError>;
    }
}

/// Keeps every confirmation instead of queueing it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OrderConfirmation>>,
}

impl RecordingNotifier {
    pub fn order_numbers(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.order_number.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(confirmation);
        Ok(())
    }
}

/// Who a test request is sent as
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    Guest(String),
    Bearer(String),
}

/// Application router over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// App whose gateway fails the test on any call
    pub async fn new() -> Self {
        Self::with_gateway(MockGateway::new()).await
    }

    pub async fn with_gateway(gateway: MockGateway) -> Self {
        Self::build(gateway, |_| {}).await
    }

    pub async fn build(gateway: MockGateway, configure: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            Arc::new(gateway),
            notifier.clone(),
        );
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            notifier,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Replaces the source of candidate order numbers
    pub fn with_order_numbers(mut self, numbers: OrderNumberFn) -> Self {
        let checkout = self.state.checkout.clone().with_order_numbers(numbers);
        self.state = self.state.clone().with_checkout(checkout);
        self.router = storefront_api::build_router(self.state.clone());
        self
    }

    /// Bearer token for a fresh customer
    pub fn customer(&self, email: &str) -> (Uuid, Caller) {
        let user_id = Uuid::new_v4();
        (user_id, Caller::Bearer(token_for(user_id, email, &[])))
    }

    pub fn admin(&self) -> Caller {
        Caller::Bearer(token_for(Uuid::new_v4(), "admin@example.com", &["admin"]))
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        caller: &Caller,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        match caller {
            Caller::Anonymous => {}
            Caller::Guest(session) => builder = builder.header(SESSION_HEADER, session.as_str()),
            Caller::Bearer(token) => {
                builder = builder.header("authorization", format!("Bearer {}", token))
            }
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(format!(
                "{}-{}",
                name.to_lowercase().replace(' ', "-"),
                Uuid::new_v4().simple()
            )),
            description: Set(None),
            image_url: Set(None),
            price: Set(price),
            stock_quantity: Set(stock),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        sku: &str,
        price: Option<Decimal>,
        stock: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            sku: Set(sku.to_string()),
            name: Set(format!("Variant {}", sku)),
            price: Set(price),
            stock_quantity: Set(stock),
            attributes: Set(Some(json!({ "size": "M" }))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product variant")
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
            .stock_quantity
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock_quantity
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    pub async fn load_order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    /// Moves an order along the fulfilment pipeline
    pub async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) {
        let mut active: order::ActiveModel = self.load_order(order_id).await.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        active
            .update(&*self.state.db)
            .await
            .expect("update order status");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn token_for(user_id: Uuid, email: &str, roles: &[&str]) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        email: Some(email.to_string()),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        exp: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode access token")
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Reads a money field rendered as a decimal string
pub fn money_at(value: &Value, pointer: &str) -> Decimal {
    let raw = value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("no money string at {pointer} in {value}"));
    Decimal::from_str(raw).expect("decimal money value")
}

pub fn shipping_address() -> Value {
    json!({
        "name": "Ada Lovelace",
        "phone": "+44 20 7946 0000",
        "line1": "12 Analytical Row",
        "city": "London",
        "postalCode": "N1 9GU",
        "country": "gb"
    })
}

pub fn checkout_body(payment_method: Option<&str>, coupon: Option<&str>) -> Value {
    json!({
        "shippingAddress": shipping_address(),
        "shippingMethod": "standard",
        "paymentMethod": payment_method,
        "couponCode": coupon,
    })
}
