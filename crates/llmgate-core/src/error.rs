//! §7 error envelope: every handler returns `Result<T, GatewayError>` and
//! `?`-propagates; this is the one place that turns a `GatewayError` into
//! an HTTP response, since neither the trait nor the type is local to this
//! crate (orphan rule).

use axum::Json;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};

use llmgate_common::GatewayError;

/// Wraps [`GatewayError`] so `llmgate-core` can implement `IntoResponse` for
/// it. Handlers return `Result<T, AppError>`; `?` on a `GatewayError`
/// converts for free.
pub struct AppError(pub GatewayError);

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = err.status();
        let envelope = err.envelope();
        let mut response = (status, Json(envelope)).into_response();

        if let Some(retry_after) = err.retry_after
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}
