//! Port to the remote catalog / inventory API.
//!
//! The sync flows only ever talk to the platform through [`CatalogClient`].
//! Adapters (GraphQL over HTTP, in-memory) live in `stocklink-infra`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stocklink_core::{InventoryItemId, LocationId, Sku, VariantId};

/// Default number of updates sent per mutation request.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Upper bound of variants fetched for a single SKU.
pub const MAX_VARIANTS_PER_SKU: usize = 100;

/// A sellable catalog entry. Read-only from this system's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub sku: Sku,
    pub inventory_item_id: InventoryItemId,
}

/// Result of an inventory item lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItemRecord {
    pub id: InventoryItemId,
    /// Not every inventory item carries a SKU.
    pub sku: Option<Sku>,
}

/// Absolute quantity write for one (item, location) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantitySet {
    pub inventory_item_id: InventoryItemId,
    pub location_id: LocationId,
    pub quantity: i64,
}

/// Relative quantity change for one (item, location) pair.
///
/// Negative deltas consume stock, positive deltas restore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantityDelta {
    pub inventory_item_id: InventoryItemId,
    pub location_id: LocationId,
    pub delta: i64,
}

/// Resulting level the platform reported after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub inventory_item_id: InventoryItemId,
    pub location_id: LocationId,
    pub quantity_after: i64,
}

/// Reason attached to an inventory mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustReason {
    /// Sibling alignment after a manual/inventory-level change.
    Correction,
    /// Stock consumed by an order.
    Sale,
    /// Stock restored by a cancellation or return.
    ReturnOrCancel,
}

impl AdjustReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustReason::Correction => "correction",
            AdjustReason::Sale => "sale",
            AdjustReason::ReturnOrCancel => "return_or_cancel",
        }
    }
}

impl core::fmt::Display for AdjustReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item error returned by a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

impl core::fmt::Display for UserError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.field {
            Some(path) if !path.is_empty() => write!(f, "{}: {}", path.join("."), self.message),
            _ => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Network failure, timeout or unexpected HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The API asked us to slow down (HTTP 429 / THROTTLED).
    #[error("rate limited by catalog api")]
    Throttled { retry_after: Option<Duration> },

    /// Non-empty top-level error list in the response.
    #[error("catalog api returned errors: {0}")]
    Remote(String),

    /// A mutation ran but rejected some of its items.
    #[error("mutation rejected {} item(s): {}", .0.len(), join_user_errors(.0))]
    UserErrors(Vec<UserError>),

    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

fn join_user_errors(errors: &[UserError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CatalogError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, CatalogError::Throttled { .. })
    }

    /// Worth retrying for idempotent reads.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CatalogError::Transport(_) | CatalogError::Throttled { .. }
        )
    }
}

/// Outcome of a batched write.
///
/// Batches fail independently; a failed batch is logged and does not stop the
/// remaining ones, and already-applied batches are never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub batches: usize,
    pub failed_batches: usize,
    /// Levels the platform reported back, when it did.
    pub applied: Vec<LevelChange>,
    pub errors: Vec<String>,
}

impl WriteReport {
    pub fn succeeded_batches(&self) -> usize {
        self.batches - self.failed_batches
    }

    /// At least one batch reached the platform successfully.
    pub fn any_applied(&self) -> bool {
        self.succeeded_batches() > 0
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches == 0
    }
}

/// Query/mutation façade over the remote catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Variants whose SKU equals `sku` exactly (at most [`MAX_VARIANTS_PER_SKU`]).
    async fn find_variants_by_sku(&self, sku: &Sku) -> Result<Vec<Variant>, CatalogError>;

    /// `None` when the inventory item does not exist.
    async fn get_inventory_item(
        &self,
        id: InventoryItemId,
    ) -> Result<Option<InventoryItemRecord>, CatalogError>;

    async fn set_absolute_quantities(
        &self,
        updates: &[QuantitySet],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError>;

    async fn apply_quantity_deltas(
        &self,
        updates: &[QuantityDelta],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError>;
}

#[async_trait]
impl<C> CatalogClient for Arc<C>
where
    C: CatalogClient + ?Sized,
{
    async fn find_variants_by_sku(&self, sku: &Sku) -> Result<Vec<Variant>, CatalogError> {
        (**self).find_variants_by_sku(sku).await
    }

    async fn get_inventory_item(
        &self,
        id: InventoryItemId,
    ) -> Result<Option<InventoryItemRecord>, CatalogError> {
        (**self).get_inventory_item(id).await
    }

    async fn set_absolute_quantities(
        &self,
        updates: &[QuantitySet],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError> {
        (**self).set_absolute_quantities(updates, reason).await
    }

    async fn apply_quantity_deltas(
        &self,
        updates: &[QuantityDelta],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError> {
        (**self).apply_quantity_deltas(updates, reason).await
    }
}

/// Keep only variants whose SKU matches exactly, capped at [`MAX_VARIANTS_PER_SKU`].
///
/// Remote SKU search is prefix/fuzzy; without this filter `RED-L` would also
/// sync `RED-LX`.
pub fn retain_exact_sku(sku: &Sku, variants: Vec<Variant>) -> Vec<Variant> {
    variants
        .into_iter()
        .filter(|v| v.sku == *sku)
        .take(MAX_VARIANTS_PER_SKU)
        .collect()
}

/// Run `write` once per chunk of `items`, collecting a best-effort report.
///
/// A failing chunk is logged with its error and the loop moves on.
pub async fn write_in_batches<'a, T, F, Fut>(
    items: &'a [T],
    batch_size: usize,
    reason: AdjustReason,
    mut write: F,
) -> WriteReport
where
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<Vec<LevelChange>, CatalogError>>,
{
    let mut report = WriteReport::default();
    let total = items.len().div_ceil(batch_size.max(1));

    for (idx, chunk) in items.chunks(batch_size.max(1)).enumerate() {
        report.batches += 1;
        match write(chunk).await {
            Ok(applied) => {
                tracing::debug!(batch = idx + 1, of = total, size = chunk.len(), %reason, "inventory batch applied");
                report.applied.extend(applied);
            }
            Err(e) => {
                tracing::error!(
                    batch = idx + 1,
                    of = total,
                    size = chunk.len(),
                    %reason,
                    error = %e,
                    "inventory batch failed; continuing with remaining batches"
                );
                report.failed_batches += 1;
                report.errors.push(e.to_string());
            }
        }
    }

    report
}
