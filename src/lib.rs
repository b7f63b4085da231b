//! Storefront API
//!
//! Checkout core of the storefront: cart conversion, stock reservation,
//! PayPal payment reconciliation and order cancellation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod clients;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod repositories;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer};

use crate::clients::PaymentGateway;
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::middleware_helpers::RetryConfig;
use crate::notifications::Notifier;
use crate::services::{
    cart::CartService, checkout::CheckoutService, orders::OrderService,
    payments::PaymentService, post_commit::PostCommitRunner, pricing::PricingPolicy,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub carts: CartService,
}

impl AppState {
    /// Wires the services around injected payment and notification clients
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let policy = PricingPolicy::from(&config.pricing);
        let runner = PostCommitRunner::new(db.clone(), gateway.clone(), notifier.clone());

        let checkout = CheckoutService::new(
            db.clone(),
            policy.clone(),
            config.checkout.clone(),
            config.default_currency.clone(),
            event_sender.clone(),
            runner,
        );
        let orders = OrderService::new(
            db.clone(),
            event_sender.clone(),
            RetryConfig::with_max_attempts(config.checkout.transaction_max_attempts),
        );
        let payments = PaymentService::new(db.clone(), gateway, notifier, event_sender.clone());
        let carts = CartService::new(db.clone(), policy, config.checkout.cart_ttl_days);

        Self {
            db,
            config: Arc::new(config),
            event_sender,
            checkout,
            orders,
            payments,
            carts,
        }
    }

    pub fn with_checkout(mut self, checkout: CheckoutService) -> Self {
        self.checkout = checkout;
        self
    }
}

/// Response envelope shared by every endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    pub data: Option<T>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn with_status(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            status_code: status.as_u16(),
            message: message.into(),
            data: Some(data),
            timestamp: Utc::now().to_rfc3339(),
            code: None,
            request_id: None,
        }
    }

    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self::with_status(StatusCode::OK, message, data)
    }

    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: status.as_u16(),
            message: message.into(),
            data: None,
            timestamp: Utc::now().to_rfc3339(),
            code: None,
            request_id: None,
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), errors::ServiceError>;

async fn health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<Value>>) {
    match db::check_connection(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                "Service healthy",
                json!({ "status": "up", "database": "up" }),
            )),
        ),
        Err(_) => {
            let status = StatusCode::SERVICE_UNAVAILABLE;
            let mut body = ApiResponse::with_status(
                status,
                "Database unavailable",
                json!({ "status": "degraded", "database": "down" }),
            );
            body.success = false;
            (status, Json(body))
        }
    }
}

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/cart", get(handlers::cart::get_cart))
        .route("/cart/items", post(handlers::cart::add_item))
        .route("/cart/checkout", post(handlers::checkout::checkout_cart))
        .route(
            "/orders",
            post(handlers::checkout::place_order).get(handlers::orders::list_orders),
        )
        .route("/orders/:order_id", get(handlers::orders::get_order))
        .route(
            "/orders/status/:order_id",
            get(handlers::orders::get_order_status),
        )
        .route(
            "/orders/cancel/:order_id",
            post(handlers::orders::cancel_order),
        )
        .route(
            "/payments/paypal/create/:order_id",
            post(handlers::payments::create_paypal_order),
        )
        .route(
            "/payments/paypal/capture/:paypal_order_id",
            post(handlers::payments::capture_paypal_order),
        )
        .route(
            "/payments/paypal/webhook",
            post(handlers::payments::paypal_webhook),
        )
        .route(
            "/payments/status/:order_id",
            get(handlers::payments::payment_status),
        )
}

fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
            .allow_credentials(cfg.cors_allow_credentials)
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!("Using permissive CORS because explicit origins were not configured");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// Full HTTP stack: routes, tracing, compression, CORS, body limit and request ids
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let body_limit = state.config.max_body_size;

    api_routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
