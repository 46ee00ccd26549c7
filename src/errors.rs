use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use validator::{ValidationErrors, ValidationErrorsKind};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// A single validation problem attached to a request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    /// Dotted path of the offending field (e.g. `email`, `items[0].quantity`)
    #[schema(example = "email")]
    pub field: String,
    #[schema(example = "must be a valid email address")]
    pub message: String,
}

/// Ordered collection of field errors. Never constructed empty by the services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: FieldErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was collected, otherwise `ValidationFailed`.
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::ValidationFailed(self))
        }
    }

    /// Flattens validator output into field errors, prefixing every path with `prefix`.
    pub fn from_validation(errors: &ValidationErrors, prefix: &str) -> Self {
        let mut out = Self::new();
        collect_validation_errors(errors, prefix, &mut out);
        out.0.sort_by(|a, b| a.field.cmp(&b.field));
        out
    }

    pub fn into_vec(self) -> Vec<FieldError> {
        self.0
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

fn collect_validation_errors(errors: &ValidationErrors, prefix: &str, out: &mut FieldErrors) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, field);
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for error in field_errors {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed `{}` check", error.code));
                    out.push(path.clone(), message);
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_validation_errors(nested, &path, out),
            ValidationErrorsKind::List(entries) => {
                for (index, nested) in entries {
                    collect_validation_errors(nested, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "code": "validation_failed",
    "message": "Validation failed",
    "field_errors": [{"field": "email", "message": "must be a valid email address"}],
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Machine-readable error kind
    pub code: String,
    /// Human-readable, user-safe description
    pub message: String,
    /// Structured context (offending line and quantities for stock errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Per-field validation messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    ValidationFailed(FieldErrors),

    #[error(
        "Insufficient stock for {product} (items[{line}]): requested {requested}, available {available}"
    )]
    InsufficientStock {
        line: usize,
        product: String,
        requested: i32,
        available: i32,
    },

    #[error("Could not allocate a unique order number after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    #[error("Database error: {0}")]
    PersistenceFailure(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::ValidationFailed(FieldErrors::from_validation(&err, ""))
    }
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::ValidationFailed(FieldErrors::single(field, message))
    }

    /// Stable identifier used in error bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation_failed",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::GenerationExhausted { .. } => "generation_exhausted",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Whether the caller may safely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailure(_))
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_) | Self::InsufficientStock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::GenerationExhausted { .. } | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::ValidationFailed(_) => "Validation failed".to_string(),
            Self::PersistenceFailure(_) => {
                "The order could not be saved, please try again".to_string()
            }
            Self::GenerationExhausted { .. } | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock {
                line,
                product,
                requested,
                available,
            } => Some(json!({
                "line": line,
                "field": format!("items[{}].quantity", line),
                "product": product,
                "requested": requested,
                "available": available,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "request failed");
        }

        let field_errors = match &self {
            ServiceError::ValidationFailed(errors) => Some(errors.clone().into_vec()),
            _ => None,
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.kind().to_string(),
            message: self.response_message(),
            details: self.details(),
            field_errors,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use validator::Validate;

    #[derive(Validate)]
    struct Contact {
        #[validate(email(message = "must be a valid email address"))]
        email: String,
        #[validate(length(min = 1))]
        city: String,
    }

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "not_found");
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::validation("email", "bad").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                line: 0,
                product: "Mug".into(),
                requested: 5,
                available: 3,
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::PersistenceFailure(DbErr::Custom("boom".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::GenerationExhausted { attempts: 5 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn service_error_response_message_hides_internal_details() {
        let db = ServiceError::PersistenceFailure(DbErr::Custom("relation orders".into()));
        assert!(!db.response_message().contains("relation"));
        assert!(db.is_retryable());

        assert_eq!(
            ServiceError::InternalError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("Order ORD-1 not found".into()).response_message(),
            "Not found: Order ORD-1 not found"
        );
    }

    #[tokio::test]
    async fn validation_failure_serializes_field_errors() {
        let response = ServiceError::validation("email", "must be a valid email address")
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        let fields = payload.field_errors.expect("field errors expected");
        assert_eq!(fields[0].field, "email");
    }

    #[tokio::test]
    async fn insufficient_stock_names_line_and_quantities() {
        let response = ServiceError::InsufficientStock {
            line: 1,
            product: "Linen shirt".into(),
            requested: 5,
            available: 3,
        }
        .into_response();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        let details = payload.details.expect("details expected");
        assert_eq!(details["field"], "items[1].quantity");
        assert_eq!(details["requested"], 5);
        assert_eq!(details["available"], 3);
    }

    #[test]
    fn validator_errors_flatten_with_prefix() {
        let contact = Contact {
            email: "not-an-email".into(),
            city: String::new(),
        };
        let errors = contact.validate().unwrap_err();

        let flat = FieldErrors::from_validation(&errors, "customer");
        assert!(flat.contains("customer.email"));
        assert!(flat.contains("customer.city"));

        let bare: ServiceError = errors.into();
        match bare {
            ServiceError::ValidationFailed(fields) => {
                assert!(fields.contains("email"));
                assert_eq!(fields.len(), 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
