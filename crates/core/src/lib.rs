//! `stocklink-core` — shared primitives for SKU-level inventory sync.
//!
//! This crate contains **pure** types (no IO): identifiers, the normalized
//! SKU join key and the domain error model.

pub mod error;
pub mod id;
pub mod sku;

pub use error::DomainError;
pub use id::{InventoryItemId, LocationId, OrderId, VariantId};
pub use sku::Sku;
