//! Strongly-typed identifiers of remote catalog entities.
//!
//! Webhook payloads carry bare numeric ids while the admin GraphQL API speaks
//! global ids (`gid://shopify/<Kind>/<n>`). Every id type accepts both forms
//! when parsing and renders either on demand.

use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::error::DomainError;

/// Identifier of an inventory item (the per-variant inventory handle).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InventoryItemId(u64);

/// Identifier of a stock location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LocationId(u64);

/// Identifier of a product variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VariantId(u64);

/// Identifier of an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OrderId(u64);

/// Parse either a bare number or a `gid://shopify/<kind>/<n>` global id.
fn parse_numeric_or_gid(s: &str, kind: &str) -> Result<u64, DomainError> {
    let s = s.trim();
    let tail = match s.strip_prefix("gid://shopify/") {
        Some(rest) => {
            let (k, n) = rest
                .split_once('/')
                .ok_or_else(|| DomainError::invalid_id(format!("{kind}: malformed gid '{s}'")))?;
            if k != kind {
                return Err(DomainError::invalid_id(format!(
                    "{kind}: gid names a {k}, not a {kind}"
                )));
            }
            // Some gids carry a query suffix (`?inventory_item_id=...`).
            n.split('?').next().unwrap_or(n)
        }
        None => s,
    };

    tail.parse::<u64>()
        .map_err(|e| DomainError::invalid_id(format!("{kind}: '{s}': {e}")))
}

macro_rules! impl_numeric_id {
    ($t:ident, $kind:literal) => {
        impl $t {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> u64 {
                self.0
            }

            /// Render as an admin API global id.
            pub fn to_gid(&self) -> String {
                format!("gid://shopify/{}/{}", $kind, self.0)
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $t {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_numeric_or_gid(s, $kind).map(Self)
            }
        }

        // Accept `123`, `"123"` and `"gid://shopify/<Kind>/123"`.
        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match serde_json::Value::deserialize(deserializer)? {
                    serde_json::Value::Number(n) => n
                        .as_u64()
                        .map(Self)
                        .ok_or_else(|| de::Error::custom(concat!($kind, ": expected a positive integer"))),
                    serde_json::Value::String(s) => s.parse().map_err(de::Error::custom),
                    other => Err(de::Error::custom(format!(
                        "{}: expected number or string, got {other}",
                        $kind
                    ))),
                }
            }
        }
    };
}

impl_numeric_id!(InventoryItemId, "InventoryItem");
impl_numeric_id!(LocationId, "Location");
impl_numeric_id!(VariantId, "ProductVariant");
impl_numeric_id!(OrderId, "Order");
