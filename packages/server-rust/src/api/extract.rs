//! Strict JSON body extractor.
//!
//! [`JsonBody`] accepts exactly one JSON value of the target type. It
//! rejects a non-JSON `Content-Type`, an empty body, a body over the
//! configured limit, malformed or truncated JSON, unknown fields (for
//! types that deny them), wrongly typed values and trailing data, each
//! with its own [`ApiError`].

use axum::body::Body;
use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::error::Category;

use super::error::ApiError;
use super::AppState;

/// A request body parsed as one JSON value of type `T`.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<T> FromRequest<AppState> for JsonBody<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        if !is_json_or_absent(req.headers()) {
            return Err(ApiError::UnsupportedMediaType);
        }
        let body = read_limited(req.into_body(), state.config.max_body_bytes).await?;
        parse_json(&body).map(JsonBody)
    }
}

/// A missing `Content-Type` is accepted; a present one must be
/// `application/json`, parameters ignored.
fn is_json_or_absent(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(CONTENT_TYPE) else {
        return true;
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

async fn read_limited(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| ApiError::Internal(format!("reading body: {err}")))?;
        if buf.len() + chunk.len() > limit {
            return Err(ApiError::TooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Parses exactly one JSON value from `body`.
///
/// # Errors
///
/// Returns the [`ApiError`] describing the first problem found.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::EmptyBody);
    }
    let mut de = serde_json::Deserializer::from_slice(body);
    let value = T::deserialize(&mut de).map_err(|err| classify(&err, body))?;
    de.end().map_err(|_| ApiError::TrailingData)?;
    Ok(value)
}

fn classify(err: &serde_json::Error, body: &[u8]) -> ApiError {
    let offset = byte_offset(body, err.line(), err.column());
    match err.classify() {
        Category::Syntax => ApiError::MalformedJson(offset),
        Category::Eof => ApiError::TruncatedJson,
        Category::Data => {
            let message = err.to_string();
            if let Some(field) = unknown_field(&message) {
                return ApiError::UnknownField(field.to_string());
            }
            let detail = message
                .rsplit_once(" at line ")
                .map_or(message.as_str(), |(detail, _)| detail);
            ApiError::InvalidValue {
                detail: detail.to_string(),
                offset,
            }
        }
        Category::Io => ApiError::Internal(err.to_string()),
    }
}

/// Converts serde_json's 1-based line/column into a byte offset.
fn byte_offset(body: &[u8], line: usize, column: usize) -> usize {
    let line_start: usize = body
        .split(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len() + 1)
        .sum();
    (line_start + column).min(body.len())
}

fn unknown_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("unknown field `")?;
    rest.split_once('`').map(|(field, _)| field)
}
