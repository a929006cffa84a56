use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;
use tracing::warn;

use stocklink_auth::{SIGNATURE_HEADER, WebhookVerifier};
use stocklink_observability::DELIVERY_ID_HEADER;

use crate::app::errors::json_error;
use crate::context::DeliveryContext;

/// Upper bound of a webhook body buffered for verification.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 2 * 1024 * 1024;

const TOPIC_HEADER: &str = "x-shopify-topic";

#[derive(Clone)]
pub struct SignatureState {
    pub verifier: Arc<dyn WebhookVerifier>,
}

/// Verify the webhook signature against the exact raw body bytes.
///
/// The body is buffered once, checked, and handed to the handler unchanged.
/// Verification failures answer 401 and never reach a handler.
pub async fn signature_middleware(
    State(state): State<SignatureState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let received_at = Instant::now();
    let (mut parts, body) = req.into_parts();

    let delivery_id = stocklink_observability::delivery_id(header_str(&parts.headers, DELIVERY_ID_HEADER));
    let topic = header_str(&parts.headers, TOPIC_HEADER).map(str::to_string);

    let bytes = match axum::body::to_bytes(body, MAX_WEBHOOK_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!(%delivery_id, path = %parts.uri.path(), error = %e, "webhook body rejected");
            return json_error(
                StatusCode::BAD_REQUEST,
                "unreadable_body",
                format!("body could not be read (limit {MAX_WEBHOOK_BODY_BYTES} bytes)"),
            );
        }
    };

    let signature = header_str(&parts.headers, SIGNATURE_HEADER);
    if !state.verifier.verify(&bytes, signature) {
        warn!(
            %delivery_id,
            path = %parts.uri.path(),
            signature_present = signature.is_some(),
            "webhook signature rejected"
        );
        return json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "webhook signature verification failed",
        );
    }

    parts
        .extensions
        .insert(DeliveryContext::new(delivery_id, topic, received_at));

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
