//! Caller identity.
//!
//! Tokens are issued elsewhere; this module only verifies HS256 bearer tokens
//! signed with the shared `jwt_secret` and falls back to a guest identity
//! keyed by the `x-session-id` header when no token is sent.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::repositories::CartOwner;
use crate::AppState;

pub const SESSION_HEADER: &str = "x-session-id";
pub const ADMIN_ROLE: &str = "admin";

/// JWT claims accepted by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Customer {
        user_id: Uuid,
        email: Option<String>,
        roles: Vec<String>,
    },
    Guest {
        session_id: Option<String>,
    },
}

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::Customer { user_id, .. } => Some(*user_id),
            Actor::Guest { .. } => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Actor::Customer { email, .. } => email.as_deref(),
            Actor::Guest { .. } => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        match self {
            Actor::Customer { roles, .. } => roles.iter().any(|r| r.eq_ignore_ascii_case(ADMIN_ROLE)),
            Actor::Guest { .. } => false,
        }
    }

    /// Cart lookup key; guests must present a session token
    pub fn cart_owner(&self) -> Result<CartOwner, ServiceError> {
        match self {
            Actor::Customer { user_id, .. } => Ok(CartOwner::User(*user_id)),
            Actor::Guest {
                session_id: Some(session),
            } => Ok(CartOwner::Session(session.clone())),
            Actor::Guest { session_id: None } => Err(ServiceError::ValidationError(format!(
                "guest carts require the {} header",
                SESSION_HEADER
            ))),
        }
    }

    /// Owner filter for order reads and writes: `None` lets admins see every order
    pub fn order_scope(&self) -> Result<Option<Uuid>, ServiceError> {
        match self {
            _ if self.is_admin() => Ok(None),
            Actor::Customer { user_id, .. } => Ok(Some(*user_id)),
            Actor::Guest { .. } => Err(ServiceError::Unauthorized(
                "authentication required".to_string(),
            )),
        }
    }
}

/// Verifies a bearer token and maps its claims to a customer identity
pub fn decode_token(token: &str, secret: &str) -> Result<Actor, ServiceError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => ServiceError::Unauthorized("token expired".to_string()),
        _ => ServiceError::Unauthorized("invalid token".to_string()),
    })?
    .claims;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ServiceError::Unauthorized("invalid token subject".to_string()))?;

    Ok(Actor::Customer {
        user_id,
        email: claims.email,
        roles: claims.roles,
    })
}

fn session_from(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match bearer {
            Some(token) => decode_token(token, &state.config.jwt_secret),
            None => Ok(Actor::Guest {
                session_id: session_from(parts),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "storefront_unit_test_signing_key_9f8e7d6c5b4a_qwerty_zxcvbn_10293847";

    fn token(sub: &str, roles: &[&str], exp: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            email: Some("ada@example.com".into()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn valid_token_yields_customer() {
        let user_id = Uuid::new_v4();
        let actor = decode_token(&token(&user_id.to_string(), &[], in_an_hour()), SECRET).unwrap();
        assert_eq!(actor.user_id(), Some(user_id));
        assert_eq!(actor.email(), Some("ada@example.com"));
        assert!(!actor.is_admin());
        assert_eq!(actor.order_scope().unwrap(), Some(user_id));
    }

    #[test]
    fn admin_scope_is_unrestricted() {
        let actor = decode_token(
            &token(&Uuid::new_v4().to_string(), &["Admin"], in_an_hour()),
            SECRET,
        )
        .unwrap();
        assert!(actor.is_admin());
        assert_eq!(actor.order_scope().unwrap(), None);
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let expired = token(&Uuid::new_v4().to_string(), &[], 1_000);
        assert!(matches!(
            decode_token(&expired, SECRET),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            decode_token(&token("not-a-uuid", &[], in_an_hour()), SECRET),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            decode_token("garbage", SECRET),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn guests_need_a_session_for_carts() {
        let guest = Actor::Guest { session_id: None };
        assert!(matches!(
            guest.cart_owner(),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            guest.order_scope(),
            Err(ServiceError::Unauthorized(_))
        ));

        let guest = Actor::Guest {
            session_id: Some("sess-1".into()),
        };
        assert_eq!(
            guest.cart_owner().unwrap(),
            CartOwner::Session("sess-1".into())
        );
    }
}
