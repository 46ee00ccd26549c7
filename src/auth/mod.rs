//! Bearer-token authentication and permission gating.
//!
//! Tokens are HS256 JWTs. The `admin` role implies every permission; other
//! callers need the explicit permission string in their claims.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AppConfig;

pub mod consts {
    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_CREATE: &str = "orders:create";
    /// Manual orders and status transitions
    pub const ORDERS_MANAGE: &str = "orders:manage";

    pub const ROLE_ADMIN: &str = "admin";
    pub const ROLE_CUSTOMER: &str = "customer";
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub token_id: String,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.has_role(consts::ROLE_ADMIN) || self.permissions.iter().any(|p| p == permission)
    }

    /// Subject as a user id, when it is one.
    pub fn owner_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.user_id).ok()
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            roles: claims.roles,
            permissions: claims.permissions,
            token_id: claims.jti,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
        )
    }
}

/// Issues and validates bearer tokens
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Signs an access token for `subject`
    pub fn issue_token(
        &self,
        subject: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| AuthError::TokenCreation("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: subject.to_string(),
            roles,
            permissions,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => {
                debug!(error = %e, "Rejected bearer token");
                AuthError::InvalidToken
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Authentication service not configured")]
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message) = match &self {
            Self::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Authentication required",
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_TOKEN",
                "Invalid authentication token",
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "AUTH_TOKEN_EXPIRED",
                "Token has expired",
            ),
            Self::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "AUTH_INSUFFICIENT_PERMISSIONS",
                "Insufficient permissions",
            ),
            Self::TokenCreation(_) | Self::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_INTERNAL_ERROR",
                "Authentication is unavailable",
            ),
        };

        if status.is_server_error() {
            warn!(error = %self, "Authentication failure");
        }

        let body = json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "code": error_code,
            "message": error_message,
            "request_id": crate::tracing::current_request_id().map(|rid| rid.0),
            "timestamp": Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validates the bearer token and stores the [`AuthUser`] in request extensions
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => return AuthError::NotConfigured.into_response(),
    };

    let token = match bearer_token(request.headers()) {
        Some(token) => token.to_string(),
        None => return AuthError::MissingAuth.into_response(),
    };

    match auth_service.validate_token(&token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthUser::from(claims));
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Rejects callers that lack `required_permission`
pub async fn permission_middleware(
    State(required_permission): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.has_permission(&required_permission) {
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_permission(self, permission: &str) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_permission(self, permission: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission.to_string(),
            permission_middleware,
        ))
        .with_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(AuthConfig::new(
            "k3y-for-unit-tests-0123456789-abcdefghijklmnopqrstuvwxyz-ABCDEFGHIJ".into(),
            "storefront".into(),
            "storefront-orders".into(),
            Duration::from_secs(600),
        ))
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let auth = service();
        let subject = Uuid::new_v4().to_string();
        let token = auth
            .issue_token(&subject, vec!["customer".into()], vec!["orders:create".into()])
            .unwrap();

        let user = AuthUser::from(auth.validate_token(&token).unwrap());
        assert_eq!(user.owner_id(), Uuid::parse_str(&subject).ok());
        assert!(user.has_permission(consts::ORDERS_CREATE));
        assert!(!user.has_permission(consts::ORDERS_MANAGE));
    }

    #[test]
    fn admin_role_implies_every_permission() {
        let user = AuthUser {
            user_id: "ops".into(),
            roles: vec![consts::ROLE_ADMIN.into()],
            permissions: vec![],
            token_id: "t".into(),
        };
        assert!(user.has_permission(consts::ORDERS_MANAGE));
        assert_eq!(user.owner_id(), None);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let other = AuthService::new(AuthConfig::new(
            "another-secret-for-tests-zyxwvutsrqponmlkjihgfedcba-9876543210-QWERTY".into(),
            "storefront".into(),
            "storefront-orders".into(),
            Duration::from_secs(600),
        ));
        let token = other.issue_token("someone", vec![], vec![]).unwrap();
        assert!(matches!(
            service().validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Token abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
