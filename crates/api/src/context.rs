use tokio::time::Instant;
use tracing::{Span, warn};

/// Per-delivery context, inserted by the signature middleware.
///
/// Present on every webhook request that passed signature verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    delivery_id: String,
    /// `X-Shopify-Topic` as sent, when present.
    topic: Option<String>,
    received_at: Instant,
}

impl DeliveryContext {
    pub fn new(delivery_id: String, topic: Option<String>, received_at: Instant) -> Self {
        Self {
            delivery_id,
            topic,
            received_at,
        }
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    /// When the request reached the server; flow deadlines count from here.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Span for this delivery under the route's own topic.
    ///
    /// The route decides what the payload means; a differing topic header is
    /// only logged.
    pub fn span(&self, route_topic: &str) -> Span {
        if let Some(sent) = self.topic.as_deref().filter(|sent| *sent != route_topic) {
            warn!(
                delivery_id = %self.delivery_id,
                route_topic,
                header_topic = sent,
                "topic header does not match route"
            );
        }
        stocklink_observability::delivery_span(route_topic, &self.delivery_id)
    }
}
