//! Outbound integrations.

pub mod paypal;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use paypal::PayPalClient;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    NotConfigured,

    #[error("payment gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("payment gateway returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected payment gateway response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLineItem {
    pub name: String,
    pub sku: Option<String>,
    pub quantity: i32,
    pub unit_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentShipping {
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country_code: String,
}

/// Amount breakdown and line items for an external payment order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentOrderRequest {
    pub order_id: Uuid,
    pub reference: String,
    pub currency: String,
    pub item_total: Decimal,
    pub tax_total: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub items: Vec<PaymentLineItem>,
    pub ship_to: Option<PaymentShipping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrderCreated {
    pub external_id: String,
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub capture_id: Option<String>,
    pub status: String,
}

impl CaptureResult {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("COMPLETED")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentOrderDetails {
    pub status: String,
    pub payer_email: Option<String>,
}

/// External payment processor used for redirect-based payment methods
#[async_trait]
pub trait PaymentGateway: Send + Sync {
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

/// Stand-in used when no processor credentials are configured
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_order(
        &self,
        _request: &PaymentOrderRequest,
    ) -> Result<PaymentOrderCreated, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn capture_order(&self, _external_id: &str) -> Result<CaptureResult, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn get_order_details(
        &self,
        _external_id: &str,
    ) -> Result<PaymentOrderDetails, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}
