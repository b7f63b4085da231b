use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{
    CaptureResult, GatewayError, PaymentGateway, PaymentOrderCreated, PaymentOrderDetails,
    PaymentOrderRequest,
};
use crate::config::PayPalConfig;
use crate::services::pricing::round_money;

/// Refresh tokens a minute before PayPal says they expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<Value>,
    #[serde(default)]
    payer: Option<Value>,
}

/// PayPal Orders v2 client authenticated with OAuth2 client credentials
pub struct PayPalClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    return_url: String,
    cancel_url: String,
    brand_name: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalClient {
    pub fn new(config: &PayPalConfig) -> Result<Self, GatewayError> {
        let (client_id, client_secret) = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) if config.is_configured() => (id.clone(), secret.clone()),
            _ => return Err(GatewayError::NotConfigured),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            return_url: config.return_url.clone(),
            cancel_url: config.cancel_url.clone(),
            brand_name: config.brand_name.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting PayPal access token");
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let lifetime = (token.expires_in - TOKEN_REFRESH_MARGIN_SECS).max(0);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        });
        Ok(token.access_token)
    }

    fn order_body(&self, request: &PaymentOrderRequest) -> Value {
        let money = |value: Decimal| {
            json!({ "currency_code": request.currency, "value": format_amount(value) })
        };

        let items: Vec<Value> = request
            .items
            .iter()
            .map(|item| {
                let mut line = json!({
                    "name": truncate(&item.name, 127),
                    "quantity": item.quantity.to_string(),
                    "unit_amount": money(item.unit_amount),
                });
                if let Some(sku) = &item.sku {
                    line["sku"] = json!(sku);
                }
                line
            })
            .collect();

        let mut unit = json!({
            "reference_id": request.reference,
            "custom_id": request.order_id.to_string(),
            "amount": {
                "currency_code": request.currency,
                "value": format_amount(request.total),
                "breakdown": {
                    "item_total": money(request.item_total),
                    "tax_total": money(request.tax_total),
                    "shipping": money(request.shipping),
                    "discount": money(request.discount),
                }
            },
            "items": items,
        });

        if let Some(ship_to) = &request.ship_to {
            unit["shipping"] = json!({
                "name": { "full_name": ship_to.full_name },
                "address": {
                    "address_line_1": ship_to.line1,
                    "address_line_2": ship_to.line2,
                    "admin_area_2": ship_to.city,
                    "admin_area_1": ship_to.state,
                    "postal_code": ship_to.postal_code,
                    "country_code": ship_to.country_code,
                }
            });
        }

        let mut context = json!({
            "return_url": self.return_url,
            "cancel_url": self.cancel_url,
            "user_action": "PAY_NOW",
            "shipping_preference": "SET_PROVIDED_ADDRESS",
        });
        if let Some(brand) = &self.brand_name {
            context["brand_name"] = json!(brand);
        }

        json!({
            "intent": "CAPTURE",
            "purchase_units": [unit],
            "application_context": context,
        })
    }
}

/// Fixed-point string with exactly two fraction digits
pub fn format_amount(value: Decimal) -> String {
    round_money(value).to_string()
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error_description"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);

    warn!(status = status.as_u16(), %message, "PayPal request failed");
    Err(GatewayError::Api {
        status: status.as_u16(),
        message,
    })
}

fn first_capture(purchase_units: &[Value]) -> Option<&Value> {
    purchase_units
        .first()
        .and_then(|unit| unit.pointer("/payments/captures/0"))
}

#[async_trait]
impl PaymentGateway for PayPalClient {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn create_order(
        &self,
        request: &PaymentOrderRequest,
    ) -> Result<PaymentOrderCreated, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(token)
            .header("PayPal-Request-Id", request.order_id.to_string())
            .json(&self.order_body(request))
            .send()
            .await?;

        let order: OrderResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let approval_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone());

        info!(paypal_order_id = %order.id, "PayPal order created");
        Ok(PaymentOrderCreated {
            external_id: order.id,
            approval_url,
        })
    }

    #[instrument(skip(self))]
    async fn capture_order(&self, external_id: &str) -> Result<CaptureResult, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.base_url, external_id
            ))
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;

        let order: OrderResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let capture = first_capture(&order.purchase_units);
        let capture_id = capture
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let status = capture
            .and_then(|c| c.get("status"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(order.status)
            .ok_or_else(|| GatewayError::Decode("capture response has no status".into()))?;

        info!(paypal_order_id = %external_id, %status, "PayPal order captured");
        Ok(CaptureResult { capture_id, status })
    }

    #[instrument(skip(self))]
    async fn get_order_details(
        &self,
        external_id: &str,
    ) -> Result<PaymentOrderDetails, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/v2/checkout/orders/{}", self.base_url, external_id))
            .bearer_auth(token)
            .send()
            .await?;

        let order: OrderResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(PaymentOrderDetails {
            status: order
                .status
                .ok_or_else(|| GatewayError::Decode("order response has no status".into()))?,
            payer_email: order
                .payer
                .as_ref()
                .and_then(|p| p.get("email_address"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{PaymentLineItem, PaymentShipping};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn client() -> PayPalClient {
        PayPalClient::new(&PayPalConfig {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            brand_name: Some("Storefront".into()),
            ..PayPalConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn new_requires_credentials() {
        assert!(matches!(
            PayPalClient::new(&PayPalConfig::default()),
            Err(GatewayError::NotConfigured)
        ));
    }

    #[test]
    fn amounts_have_two_fraction_digits() {
        assert_eq!(format_amount(dec!(95)), "95.00");
        assert_eq!(format_amount(dec!(12.345)), "12.35");
        assert_eq!(format_amount(dec!(0.1)), "0.10");
    }

    #[test]
    fn order_body_carries_breakdown_and_shipping() {
        let request = PaymentOrderRequest {
            order_id: Uuid::nil(),
            reference: "ORD-1".into(),
            currency: "USD".into(),
            item_total: dec!(25),
            tax_total: dec!(0),
            shipping: dec!(70),
            discount: dec!(0),
            total: dec!(95),
            items: vec![PaymentLineItem {
                name: "Mug".into(),
                sku: Some("MUG-1".into()),
                quantity: 1,
                unit_amount: dec!(25),
            }],
            ship_to: Some(PaymentShipping {
                full_name: "Ada Lovelace".into(),
                line1: "1 Analytical Way".into(),
                line2: None,
                city: "London".into(),
                state: None,
                postal_code: "N1".into(),
                country_code: "GB".into(),
            }),
        };

        let body = client().order_body(&request);
        let unit = &body["purchase_units"][0];
        assert_eq!(body["intent"], "CAPTURE");
        assert_eq!(unit["amount"]["value"], "95.00");
        assert_eq!(unit["amount"]["breakdown"]["shipping"]["value"], "70.00");
        assert_eq!(unit["items"][0]["quantity"], "1");
        assert_eq!(unit["items"][0]["sku"], "MUG-1");
        assert_eq!(unit["shipping"]["address"]["country_code"], "GB");
        assert_eq!(body["application_context"]["brand_name"], "Storefront");
    }
}
