use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::auth::Actor;
use crate::entities::order::{OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::payments::{PaymentStatusView, WebhookOutcome};
use crate::webhooks::{verify_signature, WebhookEvent};
use crate::{ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub paypal_order_id: Option<String>,
    pub approval_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub capture_status: String,
    pub capture_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub already_captured: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub event_id: Option<String>,
    pub event_type: String,
    pub outcome: WebhookOutcome,
}

/// (Re)create the PayPal order for an unpaid order
pub async fn create_paypal_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentOrderResponse> {
    let outcome = state.payments.create_payment_order(&actor, order_id).await?;
    created_response(
        "PayPal order created",
        PaymentOrderResponse {
            order_id: outcome.order.id,
            order_number: outcome.order.order_number,
            paypal_order_id: outcome.order.paypal_order_id,
            approval_url: outcome.approval_url,
        },
    )
}

/// Capture an approved PayPal order; the PayPal order id acts as the credential
pub async fn capture_paypal_order(
    State(state): State<AppState>,
    Path(paypal_order_id): Path<String>,
) -> ApiResult<CaptureResponse> {
    let outcome = state.payments.capture(&paypal_order_id).await?;
    let message = if outcome.already_captured {
        "Payment already captured"
    } else {
        "Payment captured"
    };
    success_response(
        message,
        CaptureResponse {
            order_id: outcome.order.id,
            order_number: outcome.order.order_number,
            status: outcome.order.status,
            payment_status: outcome.order.payment_status,
            capture_status: outcome.capture_status,
            capture_id: outcome.order.paypal_capture_id,
            paid_at: outcome.order.paid_at,
            already_captured: outcome.already_captured,
        },
    )
}

/// PayPal webhook receiver. Unknown events are acknowledged so PayPal stops retrying.
pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    if let Some(secret) = state.config.payment_webhook_secret.as_deref() {
        let tolerance = state.config.webhook_tolerance().as_secs();
        if let Err(e) = verify_signature(&headers, &body, secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(e);
        }
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid webhook payload: {}", e)))?;
    let outcome = state.payments.handle_webhook(&event).await?;

    success_response(
        "Webhook processed",
        WebhookAck {
            event_id: event.id,
            event_type: event.event_type,
            outcome,
        },
    )
}

pub async fn payment_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentStatusView> {
    let view = state.payments.payment_status(&actor, order_id).await?;
    success_response("Payment status retrieved", view)
}
