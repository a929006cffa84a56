//! Inventory synchronization across variants that share a SKU.
//!
//! This crate holds the decision logic: the anti-feedback-loop tracker, the
//! webhook payload model, and the three reaction flows. Remote IO happens only
//! through the [`CatalogClient`] port, implemented by `stocklink-infra`.

pub mod catalog;
pub mod deadline;
pub mod levels;
pub mod orders;
pub mod service;
pub mod tracker;
pub mod webhook;

pub use catalog::{
    AdjustReason, CatalogClient, CatalogError, InventoryItemRecord, LevelChange, QuantityDelta,
    QuantitySet, UserError, Variant, WriteReport,
};
pub use deadline::Deadline;
pub use levels::build_sibling_updates;
pub use orders::{OrderEventKind, build_order_deltas};
pub use service::{InventorySync, SyncError, SyncOutcome, SyncSettings};
pub use tracker::{SweeperHandle, SyncLease, SyncTracker, TrackerConfig, TrackerStats};
pub use webhook::{InventoryLevelUpdate, OrderEvent, OrderLine, PayloadError};
