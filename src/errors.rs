use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use uuid::Uuid;

use crate::services::pricing::PricingError;
use crate::ApiResponse;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cart is empty")]
    CartEmpty,

    #[error("Cart not found: {0}")]
    CartNotFound(String),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Variant {variant_id} does not belong to product {product_id}")]
    InvalidVariant { variant_id: Uuid, product_id: Uuid },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {0} has already shipped")]
    OrderAlreadyShipped(String),

    #[error("Order {0} is already canceled")]
    OrderAlreadyCanceled(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Could not allocate a unique order number after {0} attempts")]
    OrderNumberConflict(u32),

    #[error("Payment {capture_id} was captured for PayPal order {paypal_order_id} but no open order can take it")]
    PaymentMismatch {
        paypal_order_id: String,
        capture_id: String,
    },

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<crate::clients::GatewayError> for ServiceError {
    fn from(err: crate::clients::GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_)
            | Self::CartNotFound(_)
            | Self::ProductNotFound(_)
            | Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::CartEmpty
            | Self::InvalidVariant { .. }
            | Self::Pricing(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InsufficientStock(_)
            | Self::OrderAlreadyShipped(_)
            | Self::OrderAlreadyCanceled(_)
            | Self::InvalidStatus(_)
            | Self::OrderNumberConflict(_)
            | Self::PaymentMismatch { .. } => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable reason code carried in error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::CartEmpty => "CART_EMPTY",
            Self::CartNotFound(_) => "CART_NOT_FOUND",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::InvalidVariant { .. } => "INVALID_VARIANT",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::OrderAlreadyShipped(_) => "ORDER_ALREADY_SHIPPED",
            Self::OrderAlreadyCanceled(_) => "ORDER_ALREADY_CANCELED",
            Self::InvalidStatus(_) => "INVALID_STATUS",
            Self::OrderNumberConflict(_) => "ORDER_NUMBER_CONFLICT",
            Self::PaymentMismatch { .. } => "PAYMENT_MISMATCH",
            Self::Pricing(_) => "PRICING_ERROR",
            Self::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => "Payment provider request failed".to_string(),
            _ => self.to_string(),
        }
    }

    /// Message including internals, for non-production diagnostics
    pub fn diagnostic_message(&self) -> String {
        self.to_string()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let message = if status.is_server_error() && crate::tracing::diagnostics_enabled() {
            self.diagnostic_message()
        } else {
            self.response_message()
        };

        let mut body = ApiResponse::<()>::failure(status, message);
        body.code = Some(self.code().to_string());
        body.request_id = current_request_id();

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[tokio::test]
    async fn service_error_response_uses_envelope_with_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::OrderNotFound("ORD-1".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["success"], false);
        assert_eq!(payload["statusCode"], 404);
        assert_eq!(payload["code"], "ORDER_NOT_FOUND");
        assert_eq!(payload["requestId"], "req-123");
        assert!(payload["data"].is_null());
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(ServiceError::CartEmpty.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::ProductNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::OrderAlreadyShipped("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::ExternalServiceError("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ServiceError::DatabaseError(DbErr::Custom("relation orders missing".into()));
        assert_eq!(err.response_message(), "Database error");
        assert!(err.diagnostic_message().contains("relation orders missing"));

        let err = ServiceError::InsufficientStock("SKU-1".into());
        assert_eq!(err.response_message(), "Insufficient stock: SKU-1");
    }
}
