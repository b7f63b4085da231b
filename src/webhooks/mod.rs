//! Inbound PayPal webhook deliveries.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

pub const CAPTURE_COMPLETED: &str = "PAYMENT.CAPTURE.COMPLETED";
pub const CAPTURE_REFUNDED: &str = "PAYMENT.CAPTURE.REFUNDED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub resource: Value,
}

/// What a delivery asks the ledger to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    CaptureCompleted {
        paypal_order_id: Option<String>,
        capture_id: Option<String>,
    },
    CaptureRefunded {
        capture_id: Option<String>,
    },
    Unhandled(String),
}

impl WebhookEvent {
    pub fn action(&self) -> WebhookAction {
        match self.event_type.as_str() {
            CAPTURE_COMPLETED => WebhookAction::CaptureCompleted {
                paypal_order_id: self
                    .str_at("/supplementary_data/related_ids/order_id")
                    .map(str::to_string),
                capture_id: self.str_at("/id").map(str::to_string),
            },
            CAPTURE_REFUNDED => WebhookAction::CaptureRefunded {
                capture_id: self.refunded_capture_id(),
            },
            other => WebhookAction::Unhandled(other.to_string()),
        }
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.resource.pointer(pointer).and_then(Value::as_str)
    }

    /// Refund resources link back to their capture with `rel = "up"`
    fn refunded_capture_id(&self) -> Option<String> {
        let from_links = self
            .resource
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| {
                links.iter().find(|link| link.get("rel").and_then(Value::as_str) == Some("up"))
            })
            .and_then(|link| link.get("href").and_then(Value::as_str))
            .and_then(|href| href.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        from_links.or_else(|| self.str_at("/capture_id").map(str::to_string))
    }
}

fn signed_mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Hex HMAC-SHA256 over `"<timestamp>.<body>"`
pub fn sign_payload(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, ServiceError> {
    let mac = signed_mac(secret, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    let invalid = || ServiceError::Unauthorized("invalid webhook signature".to_string());

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (timestamp, signature) = match (header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER)) {
        (Some(ts), Some(sig)) => (ts, sig),
        _ => return Err(invalid()),
    };

    let sent_at: i64 = timestamp.parse().map_err(|_| invalid())?;
    if chrono::Utc::now().timestamp().abs_diff(sent_at) > tolerance_secs {
        return Err(invalid());
    }

    let expected = hex::decode(signature.trim()).map_err(|_| invalid())?;
    signed_mac(secret, timestamp, body)?
        .verify_slice(&expected)
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn headers(ts: &str, sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(ts).unwrap());
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(sig).unwrap());
        headers
    }

    #[test]
    fn signed_delivery_verifies() {
        let body = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED"}"#;
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = sign_payload(SECRET, &ts, body).unwrap();
        assert!(verify_signature(&headers(&ts, &sig), body, SECRET, 300).is_ok());
    }

    #[test]
    fn tampered_or_stale_deliveries_are_rejected() {
        let body = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED"}"#;
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = sign_payload(SECRET, &ts, body).unwrap();

        assert_matches!(
            verify_signature(&headers(&ts, &sig), b"{}", SECRET, 300),
            Err(ServiceError::Unauthorized(_))
        );
        assert!(verify_signature(&headers(&ts, &sig), body, "other", 300).is_err());
        assert!(verify_signature(&headers(&ts, "zz"), body, SECRET, 300).is_err());
        assert!(verify_signature(&HeaderMap::new(), body, SECRET, 300).is_err());

        let old = (chrono::Utc::now().timestamp() - 3_600).to_string();
        let old_sig = sign_payload(SECRET, &old, body).unwrap();
        assert!(verify_signature(&headers(&old, &old_sig), body, SECRET, 300).is_err());
    }

    #[test]
    fn extreme_timestamps_are_rejected() {
        let body = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED"}"#;
        for ts in [i64::MIN.to_string(), i64::MAX.to_string()] {
            let sig = sign_payload(SECRET, &ts, body).unwrap();
            assert_matches!(
                verify_signature(&headers(&ts, &sig), body, SECRET, 300),
                Err(ServiceError::Unauthorized(_))
            );
        }
    }

    #[test]
    fn capture_completed_reads_related_order() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "WH-1",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-1",
                "status": "COMPLETED",
                "supplementary_data": { "related_ids": { "order_id": "PP-1" } }
            }
        }))
        .unwrap();

        assert_eq!(
            event.action(),
            WebhookAction::CaptureCompleted {
                paypal_order_id: Some("PP-1".into()),
                capture_id: Some("CAP-1".into()),
            }
        );
    }

    #[test]
    fn refund_resolves_capture_from_up_link() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "event_type": "PAYMENT.CAPTURE.REFUNDED",
            "resource": {
                "id": "REF-1",
                "links": [
                    { "rel": "self", "href": "https://api.paypal.com/v2/payments/refunds/REF-1" },
                    { "rel": "up", "href": "https://api.paypal.com/v2/payments/captures/CAP-9" }
                ]
            }
        }))
        .unwrap();

        assert_eq!(
            event.action(),
            WebhookAction::CaptureRefunded {
                capture_id: Some("CAP-9".into())
            }
        );
    }

    #[test]
    fn other_event_types_are_unhandled() {
        let event: WebhookEvent =
            serde_json::from_value(json!({ "event_type": "CHECKOUT.ORDER.APPROVED" })).unwrap();
        assert_eq!(
            event.action(),
            WebhookAction::Unhandled("CHECKOUT.ORDER.APPROVED".into())
        );
    }
}
