use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, HeaderMap},
};
use serde::de::DeserializeOwned;

use crate::errors::ServiceError;

/// JSON request body whose rejections use the standard error body, with the
/// failing field named by its path (`totals.subtotal`, `items[0].quantity`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_json(req.headers()) {
            return Err(ServiceError::validation(
                "body",
                "expected a request with `Content-Type: application/json`",
            ));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ServiceError::validation("body", rejection.body_text()))?;

        decode_json(&bytes).map(JsonBody)
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Deserializes `bytes`, reporting the first problem on its field path.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ServiceError> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value = serde_path_to_error::deserialize(&mut de).map_err(path_rejection)?;
    de.end()
        .map_err(|e| ServiceError::validation("body", format!("is not valid JSON ({})", describe(&e))))?;
    Ok(value)
}

fn path_rejection(err: serde_path_to_error::Error<serde_json::Error>) -> ServiceError {
    let path = err.path().to_string();
    let inner = err.into_inner();
    if inner.is_syntax() || inner.is_eof() {
        return ServiceError::validation("body", format!("is not valid JSON ({})", describe(&inner)));
    }

    let parent = if path == "." { "" } else { path.as_str() };
    let message = describe(&inner);
    match message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.strip_suffix('`'))
    {
        Some(missing) if parent.is_empty() => ServiceError::validation(missing, "is required"),
        Some(missing) => ServiceError::validation(format!("{}.{}", parent, missing), "is required"),
        None if parent.is_empty() => ServiceError::validation("body", message),
        None => ServiceError::validation(parent, message),
    }
}

/// serde_json's message without the trailing ` at line N column M`.
fn describe(err: &serde_json::Error) -> String {
    let text = err.to_string();
    match text.rfind(" at line ") {
        Some(idx) => text[..idx].to_string(),
        None => text,
    }
}
