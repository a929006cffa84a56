//! Webhook intake.
//!
//! Handlers validate the payload, hand the flow to a background task, and
//! acknowledge immediately. Anything that goes wrong after the acknowledgement
//! is logged, never reported back to the sender.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{info, warn};

use stocklink_inventory::{Deadline, InventoryLevelUpdate, OrderEvent, OrderEventKind, PayloadError};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::DeliveryContext;

pub const INVENTORY_LEVELS_UPDATE: &str = "inventory_levels/update";

pub fn router() -> Router {
    Router::new()
        .route("/webhooks/inventory_levels/update", post(inventory_level_update))
        .route("/webhooks/orders/create", post(order_created))
        .route("/webhooks/orders/cancelled", post(order_cancelled))
}

pub async fn inventory_level_update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(delivery): Extension<DeliveryContext>,
    body: Bytes,
) -> Response {
    let event = match InventoryLevelUpdate::from_slice(&body) {
        Ok(e) => e,
        Err(e) => return rejected(&delivery, INVENTORY_LEVELS_UPDATE, e),
    };

    info!(
        delivery_id = delivery.delivery_id(),
        topic = INVENTORY_LEVELS_UPDATE,
        inventory_item_id = %event.inventory_item_id,
        location_id = %event.location_id,
        available = event.available,
        "webhook accepted"
    );

    let deadline = Deadline::starting_at(delivery.received_at(), services.sync.settings().deadline);
    let sync = services.sync.clone();
    services.spawn_flow(delivery.span(INVENTORY_LEVELS_UPDATE), async move {
        sync.handle_level_update(event, deadline).await
    });

    accepted()
}

pub async fn order_created(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(delivery): Extension<DeliveryContext>,
    body: Bytes,
) -> Response {
    dispatch_order(&services, &delivery, &body, OrderEventKind::Created)
}

pub async fn order_cancelled(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(delivery): Extension<DeliveryContext>,
    body: Bytes,
) -> Response {
    dispatch_order(&services, &delivery, &body, OrderEventKind::Cancelled)
}

fn dispatch_order(
    services: &AppServices,
    delivery: &DeliveryContext,
    body: &[u8],
    kind: OrderEventKind,
) -> Response {
    let order = match OrderEvent::from_slice(body) {
        Ok(o) => o,
        Err(e) => return rejected(delivery, kind.as_str(), e),
    };

    info!(
        delivery_id = delivery.delivery_id(),
        topic = kind.as_str(),
        order_id = %order.order_id,
        line_items = order.line_items.len(),
        "webhook accepted"
    );

    let deadline = Deadline::starting_at(delivery.received_at(), services.sync.settings().deadline);
    let sync = services.sync.clone();
    services.spawn_flow(delivery.span(kind.as_str()), async move {
        sync.handle_order(order, kind, deadline).await
    });

    accepted()
}

fn accepted() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "accepted": true }))).into_response()
}

fn rejected(delivery: &DeliveryContext, topic: &str, err: PayloadError) -> Response {
    warn!(
        delivery_id = delivery.delivery_id(),
        topic,
        error = %err,
        "webhook payload rejected"
    );
    errors::payload_error_to_response(err)
}
