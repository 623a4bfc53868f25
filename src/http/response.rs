//! Reply translation.
//!
//! # Responsibilities
//! - Map the reply's status code onto an HTTP status
//! - Copy diagnostic and handler-supplied headers
//! - Serialize the envelope as the JSON body
//!
//! # Design Decisions
//! - Headers that are not valid HTTP names or values are dropped with a warning
//! - Unknown status numbers fall back to 500

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::Reply;

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.body)).into_response();

        for (name, value) in self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Dropping invalid response header"),
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, ApiStatus, X_HOSTNAME};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn reply_becomes_json_response() {
        let mut headers = BTreeMap::new();
        headers.insert(X_HOSTNAME.to_string(), "node-1".to_string());
        headers.insert("bad header".to_string(), "x".to_string());
        let reply = Reply {
            status_code: 409,
            headers,
            body: ApiResponse::new(ApiStatus::Existed, "already there"),
        };

        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()["x-hostname"], "node-1");
        assert_eq!(response.headers()["content-type"], "application/json");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded: ApiResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.status, ApiStatus::Existed);
        assert_eq!(decoded.message, "already there");
    }
}
