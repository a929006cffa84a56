//! `orders/create` and `orders/cancelled` flows: move stock on every variant
//! sharing an ordered SKU.
//!
//! Unlike the level flow there is no single triggering variant, so every
//! sibling receives the delta. Deltas commute, so these flows do not take the
//! SKU lock; duplicate deliveries are caught by the per-order guard instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stocklink_core::{InventoryItemId, LocationId, OrderId, Sku};

use crate::catalog::{AdjustReason, CatalogClient, QuantityDelta, Variant};
use crate::deadline::Deadline;
use crate::service::{InventorySync, SyncError, SyncOutcome};
use crate::webhook::OrderEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    /// Stock is consumed.
    Created,
    /// Stock is restored (cancellation or return).
    Cancelled,
}

impl OrderEventKind {
    pub fn reason(&self) -> AdjustReason {
        match self {
            OrderEventKind::Created => AdjustReason::Sale,
            OrderEventKind::Cancelled => AdjustReason::ReturnOrCancel,
        }
    }

    /// Signed delta for an ordered quantity.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            OrderEventKind::Created => -quantity.abs(),
            OrderEventKind::Cancelled => quantity.abs(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventKind::Created => "orders/create",
            OrderEventKind::Cancelled => "orders/cancelled",
        }
    }
}

/// One delta per distinct inventory item among `variants`.
pub fn build_order_deltas(
    variants: &[Variant],
    location_id: LocationId,
    quantity: i64,
    kind: OrderEventKind,
) -> Vec<QuantityDelta> {
    let delta = kind.signed(quantity);
    let mut deltas: Vec<QuantityDelta> = variants
        .iter()
        .map(|v| QuantityDelta {
            inventory_item_id: v.inventory_item_id,
            location_id,
            delta,
        })
        .collect();
    deltas.sort_by_key(|d| d.inventory_item_id);
    deltas.dedup_by_key(|d| d.inventory_item_id);
    deltas
}

impl<C: CatalogClient> InventorySync<C> {
    pub async fn handle_order_created(
        &self,
        order: OrderEvent,
        deadline: Deadline,
    ) -> Result<SyncOutcome, SyncError> {
        self.handle_order(order, OrderEventKind::Created, deadline).await
    }

    pub async fn handle_order_cancelled(
        &self,
        order: OrderEvent,
        deadline: Deadline,
    ) -> Result<SyncOutcome, SyncError> {
        self.handle_order(order, OrderEventKind::Cancelled, deadline).await
    }

    /// Apply an order's stock movement to every variant sharing each SKU.
    pub async fn handle_order(
        &self,
        order: OrderEvent,
        kind: OrderEventKind,
        deadline: Deadline,
    ) -> Result<SyncOutcome, SyncError> {
        let order_id = order.order_id;

        if !self.tracker.begin_order(kind, order_id) {
            info!(%order_id, topic = kind.as_str(), "duplicate order delivery; ignored");
            return Ok(SyncOutcome::Duplicate);
        }

        let lines = order.lines(self.settings.default_location);
        if lines.is_empty() {
            debug!(%order_id, topic = kind.as_str(), "order has no adjustable line items");
            return Ok(SyncOutcome::NothingToDo);
        }

        let mut deltas: Vec<QuantityDelta> = Vec::new();
        let mut sku_of: HashMap<InventoryItemId, Sku> = HashMap::new();
        let mut skus = 0usize;
        let mut lookup_error = None;

        for line in &lines {
            if deadline.is_expired() {
                warn!(%order_id, sku = %line.sku, "deadline expired while resolving variants");
                return Ok(self.abandon_order(kind, order_id));
            }

            let variants = match self.catalog.find_variants_by_sku(&line.sku).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(%order_id, sku = %line.sku, error = %e, "variant lookup failed; line skipped");
                    lookup_error.get_or_insert(e);
                    continue;
                }
            };
            if variants.len() <= 1 {
                debug!(%order_id, sku = %line.sku, variants = variants.len(), "no sibling variants; line skipped");
                continue;
            }

            let line_deltas = build_order_deltas(&variants, line.location_id, line.quantity, kind);
            for d in &line_deltas {
                sku_of.insert(d.inventory_item_id, line.sku.clone());
            }
            skus += 1;
            deltas.extend(line_deltas);
        }

        if deltas.is_empty() {
            if let Some(e) = lookup_error {
                // Nothing was written; a redelivery may find the variants.
                self.tracker.forget_order(kind, order_id);
                return Err(e.into());
            }
            return Ok(SyncOutcome::NoSiblings);
        }

        if deadline.is_expired() {
            warn!(%order_id, targets = deltas.len(), "deadline expired before write");
            return Ok(self.abandon_order(kind, order_id));
        }

        let report = match self.catalog.apply_quantity_deltas(&deltas, kind.reason()).await {
            Ok(r) => r,
            Err(e) => {
                // Nothing was written; let a redelivery try again.
                self.tracker.forget_order(kind, order_id);
                return Err(e.into());
            }
        };
        if !report.any_applied() {
            self.tracker.forget_order(kind, order_id);
            return Err(SyncError::nothing_written(report));
        }

        // Suppress the level events our adjustments will echo back.
        let mut by_level: HashMap<(Sku, LocationId, i64), Vec<InventoryItemId>> = HashMap::new();
        for change in &report.applied {
            if let Some(sku) = sku_of.get(&change.inventory_item_id) {
                by_level
                    .entry((sku.clone(), change.location_id, change.quantity_after))
                    .or_default()
                    .push(change.inventory_item_id);
            }
        }
        for ((sku, location_id, quantity), items) in by_level {
            self.tracker.mark_sync(&sku, location_id, quantity, items);
        }

        if report.is_complete() {
            info!(%order_id, topic = kind.as_str(), skus, targets = deltas.len(), "order stock adjusted");
        } else {
            warn!(
                %order_id,
                topic = kind.as_str(),
                skus,
                targets = deltas.len(),
                failed_batches = report.failed_batches,
                errors = ?report.errors,
                "order stock partially adjusted"
            );
        }

        Ok(SyncOutcome::Adjusted {
            skus,
            targets: deltas.len(),
        })
    }

    // Writes only happen at the very end, so an abandoned order wrote nothing.
    fn abandon_order(&self, kind: OrderEventKind, order_id: OrderId) -> SyncOutcome {
        self.tracker.forget_order(kind, order_id);
        SyncOutcome::TimedOut
    }
}
