use axum::BoxError;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tower::timeout::error::Elapsed;
use tracing::error;

use stocklink_inventory::PayloadError;

pub fn payload_error_to_response(err: PayloadError) -> axum::response::Response {
    let code = match &err {
        PayloadError::Malformed(_) => "malformed_payload",
        PayloadError::Missing(_) => "missing_field",
        PayloadError::Invalid { .. } => "invalid_field",
    };
    json_error(StatusCode::BAD_REQUEST, code, err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Errors raised by the tower layers wrapping the router.
pub async fn handle_layer_error(err: BoxError) -> axum::response::Response {
    if err.is::<Elapsed>() {
        error!("request exceeded the server timeout");
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "request_timeout",
            "request did not complete in time",
        );
    }
    error!(error = %err, "unhandled middleware error");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal server error",
    )
}
