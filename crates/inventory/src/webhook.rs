//! Inbound webhook payloads and their structural validation.
//!
//! Parsing works on the raw body bytes (the same bytes the signature was
//! checked against). A [`PayloadError`] means the delivery is rejected with
//! 400; anything that parses is acknowledged, even if it turns out to be a
//! no-op later.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use stocklink_core::{InventoryItemId, LocationId, OrderId, Sku};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("invalid field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl PayloadError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

fn parse_object(body: &[u8]) -> Result<serde_json::Map<String, Value>, PayloadError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(PayloadError::Malformed("expected a JSON object".into())),
        Err(e) => Err(PayloadError::Malformed(e.to_string())),
    }
}

fn required<'a>(
    map: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(PayloadError::Missing(field)),
        Some(v) => Ok(v),
    }
}

fn id_field<T>(map: &serde_json::Map<String, Value>, field: &'static str) -> Result<T, PayloadError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = required(map, field)?;
    serde_json::from_value(value.clone()).map_err(|e| PayloadError::invalid(field, e.to_string()))
}

/// `inventory_levels/update` body: `{inventory_item_id, location_id, available}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryLevelUpdate {
    pub inventory_item_id: InventoryItemId,
    pub location_id: LocationId,
    pub available: i64,
}

impl InventoryLevelUpdate {
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let map = parse_object(body)?;

        let inventory_item_id = id_field(&map, "inventory_item_id")?;
        let location_id = id_field(&map, "location_id")?;

        let available = match required(&map, "available")? {
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(v), _) => v,
                (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => f as i64,
                _ => return Err(PayloadError::invalid("available", format!("{n} is not an integer"))),
            },
            other => {
                return Err(PayloadError::invalid(
                    "available",
                    format!("expected a number, got {other}"),
                ));
            }
        };

        Ok(Self {
            inventory_item_id,
            location_id,
            available,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LineItemPayload {
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FulfillmentPayload {
    #[serde(default)]
    location_id: Option<LocationId>,
}

/// A line item as delivered; fields may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLineItem {
    pub sku: Option<Sku>,
    pub quantity: Option<i64>,
}

/// `orders/create` and `orders/cancelled` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent {
    pub order_id: OrderId,
    /// Order-level location, else the first fulfillment's.
    pub location_id: Option<LocationId>,
    pub line_items: Vec<RawLineItem>,
}

/// One SKU's worth of stock movement for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub sku: Sku,
    pub location_id: LocationId,
    /// Always positive; the flow decides the sign.
    pub quantity: i64,
}

impl OrderEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let map = parse_object(body)?;

        let order_id: OrderId = id_field(&map, "id")?;

        let line_items: Vec<LineItemPayload> = match required(&map, "line_items")? {
            v @ Value::Array(_) => serde_json::from_value(v.clone())
                .map_err(|e| PayloadError::invalid("line_items", e.to_string()))?,
            _ => return Err(PayloadError::invalid("line_items", "expected an array")),
        };

        let order_location: Option<LocationId> = match map.get("location_id") {
            None | Some(Value::Null) => None,
            Some(_) => Some(id_field(&map, "location_id")?),
        };

        let fulfillment_location = match map.get("fulfillments") {
            Some(v @ Value::Array(_)) => serde_json::from_value::<Vec<FulfillmentPayload>>(v.clone())
                .map_err(|e| PayloadError::invalid("fulfillments", e.to_string()))?
                .into_iter()
                .find_map(|f| f.location_id),
            _ => None,
        };

        Ok(Self {
            order_id,
            location_id: order_location.or(fulfillment_location),
            line_items: line_items
                .into_iter()
                .map(|li| RawLineItem {
                    sku: Sku::from_optional(li.sku.as_deref()),
                    quantity: li.quantity,
                })
                .collect(),
        })
    }

    /// Valid, merged lines: one entry per `(sku, location)`.
    ///
    /// Items without SKU, without a positive quantity, or without any
    /// resolvable location are skipped.
    pub fn lines(&self, default_location: Option<LocationId>) -> Vec<OrderLine> {
        let Some(location_id) = self.location_id.or(default_location) else {
            debug!(order_id = %self.order_id, "order has no resolvable location; skipping all line items");
            return Vec::new();
        };

        let mut merged: BTreeMap<Sku, i64> = BTreeMap::new();
        for (idx, item) in self.line_items.iter().enumerate() {
            let (Some(sku), Some(quantity)) = (&item.sku, item.quantity) else {
                debug!(order_id = %self.order_id, line = idx, "line item missing sku or quantity; skipped");
                continue;
            };
            if quantity <= 0 {
                debug!(order_id = %self.order_id, line = idx, %sku, quantity, "line item has no positive quantity; skipped");
                continue;
            }
            *merged.entry(sku.clone()).or_default() += quantity;
        }

        merged
            .into_iter()
            .map(|(sku, quantity)| OrderLine {
                sku,
                location_id,
                quantity,
            })
            .collect()
    }
}
