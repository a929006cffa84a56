//! Sync flow orchestration.
//!
//! `InventorySync` composes a [`CatalogClient`] with the [`SyncTracker`] and
//! runs the three reaction flows:
//!
//! ```text
//! inventory_levels/update ─► resolve SKU ─► echo check ─► SKU lock ─► siblings ─► absolute set ─► record
//! orders/create           ─► order dedup ─► lines ─► siblings per SKU ─► deltas (−q) ─► record levels
//! orders/cancelled        ─► order dedup ─► lines ─► siblings per SKU ─► deltas (+q) ─► record levels
//! ```
//!
//! Flows run after the delivery was acknowledged, so they never fail the
//! request: every error ends up as a log line and a [`SyncError`].

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use stocklink_core::{LocationId, Sku};

use crate::catalog::{CatalogClient, CatalogError, WriteReport};
use crate::tracker::SyncTracker;

/// Flow tuning that is not tracker state.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Lock acquisition attempts before dropping the event.
    pub lock_attempts: u32,
    /// Base backoff between lock attempts (multiplied by the attempt number).
    pub lock_backoff: Duration,
    /// Upper bound of the random delay before an inventory-level event is
    /// checked against the tracker. Zero disables it.
    pub jitter_max: Duration,
    /// Soft self-timeout for one flow.
    pub deadline: Duration,
    /// Fallback location for orders that carry none.
    pub default_location: Option<LocationId>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lock_attempts: 3,
            lock_backoff: Duration::from_millis(200),
            jitter_max: Duration::ZERO,
            deadline: Duration::from_secs(4),
            default_location: None,
        }
    }
}

/// What a flow decided to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Sibling variants received an absolute quantity.
    Updated { sku: Sku, targets: usize },
    /// Order deltas were applied to sibling variants.
    Adjusted { skus: usize, targets: usize },
    /// The inventory item has no SKU (or does not exist).
    NoSku,
    /// Echo of our own recent write.
    Suppressed,
    /// Another task held the SKU lock for every attempt.
    LockBusy,
    /// The SKU maps to at most one variant.
    NoSiblings,
    /// The same order event is already being handled.
    Duplicate,
    /// Nothing in the event required a write.
    NothingToDo,
    /// The soft deadline expired before the flow finished.
    TimedOut,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog call failed: {0}")]
    Catalog(#[from] CatalogError),

    /// Every write batch was rejected; nothing reached the platform.
    #[error("all {failed_batches} write batch(es) failed: {}", errors.join("; "))]
    NothingWritten {
        failed_batches: usize,
        errors: Vec<String>,
    },
}

impl SyncError {
    pub(crate) fn nothing_written(report: WriteReport) -> Self {
        Self::NothingWritten {
            failed_batches: report.failed_batches,
            errors: report.errors,
        }
    }
}

/// Runs the sync flows against a catalog.
#[derive(Debug, Clone)]
pub struct InventorySync<C> {
    pub(crate) catalog: C,
    pub(crate) tracker: SyncTracker,
    pub(crate) settings: SyncSettings,
}

impl<C: CatalogClient> InventorySync<C> {
    pub fn new(catalog: C, tracker: SyncTracker, settings: SyncSettings) -> Self {
        Self {
            catalog,
            tracker,
            settings,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }
}
