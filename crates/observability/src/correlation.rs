use tracing::Span;
use uuid::Uuid;

/// Header the platform uses to identify one webhook delivery.
pub const DELIVERY_ID_HEADER: &str = "x-shopify-webhook-id";

/// The delivery id sent by the platform, or a fresh UUIDv7 when absent.
pub fn delivery_id(header: Option<&str>) -> String {
    header
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}

/// Span wrapping everything done for one delivery, including background work.
pub fn delivery_span(topic: &str, delivery_id: &str) -> Span {
    tracing::info_span!("webhook", topic, delivery_id)
}
