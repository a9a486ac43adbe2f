use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use polygate_common::{ErrorKind, GatewayError, Posture};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A gateway error bound to its request id, rendered as the wire
/// envelope `{"error":{message,type,code,request_id}}`.
#[derive(Debug)]
pub struct ApiError {
    pub inner: GatewayError,
    pub request_id: String,
    pub posture: Posture,
    pub extra_headers: HeaderMap,
}

impl ApiError {
    pub fn new(inner: GatewayError, request_id: impl Into<String>, posture: Posture) -> Self {
        Self {
            inner,
            request_id: request_id.into(),
            posture,
            extra_headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.extra_headers.insert(name, value);
        }
        self
    }
}

fn error_type(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidApiKey | ErrorKind::Forbidden => "authentication_error",
        ErrorKind::RateLimitExceeded => "rate_limit_error",
        ErrorKind::NotFound | ErrorKind::ModelNotFound | ErrorKind::BadRequest => {
            "invalid_request_error"
        }
        ErrorKind::ProviderError | ErrorKind::Timeout | ErrorKind::Internal => "api_error",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.inner.kind;
        if kind.status() >= 500 {
            tracing::warn!(
                request_id = %self.request_id,
                code = kind.code(),
                "request failed: {}",
                self.inner.message
            );
        }
        // Raw internal messages stay inside the process in production.
        let message = if kind == ErrorKind::Internal && self.posture.is_production() {
            "internal error".to_string()
        } else {
            self.inner.message
        };

        let body = json!({
            "error": {
                "message": message,
                "type": error_type(kind),
                "code": kind.code(),
                "request_id": self.request_id,
            }
        });

        let mut response = Response::new(axum::body::Body::from(body.to_string()));
        *response.status_mut() =
            StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        for (name, value) in self.extra_headers.iter() {
            response.headers_mut().insert(name, value.clone());
        }
        response
    }
}
