//! `inventory_levels/update` flow: propagate an absolute quantity to siblings.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use stocklink_core::{InventoryItemId, LocationId};

use crate::catalog::{AdjustReason, CatalogClient, QuantitySet, Variant};
use crate::deadline::Deadline;
use crate::service::{InventorySync, SyncError, SyncOutcome};
use crate::webhook::InventoryLevelUpdate;

/// Absolute-set targets for every sibling except the triggering item.
pub fn build_sibling_updates(
    variants: &[Variant],
    trigger: InventoryItemId,
    location_id: LocationId,
    quantity: i64,
) -> Vec<QuantitySet> {
    let mut updates: Vec<QuantitySet> = variants
        .iter()
        .filter(|v| v.inventory_item_id != trigger)
        .map(|v| QuantitySet {
            inventory_item_id: v.inventory_item_id,
            location_id,
            quantity,
        })
        .collect();

    // Two variants may share one inventory item; write it once.
    updates.sort_by_key(|u| u.inventory_item_id);
    updates.dedup_by_key(|u| u.inventory_item_id);
    updates
}

impl<C: CatalogClient> InventorySync<C> {
    /// React to an inventory level change on one variant.
    ///
    /// The SKU lock is held by a lease and released on every exit path.
    pub async fn handle_level_update(
        &self,
        event: InventoryLevelUpdate,
        deadline: Deadline,
    ) -> Result<SyncOutcome, SyncError> {
        let InventoryLevelUpdate {
            inventory_item_id,
            location_id,
            available,
        } = event;

        let Some(sku) = self
            .catalog
            .get_inventory_item(inventory_item_id)
            .await?
            .and_then(|item| item.sku)
        else {
            debug!(%inventory_item_id, "inventory item has no sku; nothing to sync");
            return Ok(SyncOutcome::NoSku);
        };

        self.jitter().await;

        if self.tracker.is_recent_sync(&sku, location_id, available) {
            let written_by_us = self
                .tracker
                .affected_items(&sku, location_id, available)
                .is_some_and(|items| items.contains(&inventory_item_id));
            debug!(%sku, %location_id, available, %inventory_item_id, written_by_us, "echo of our own write; suppressed");
            return Ok(SyncOutcome::Suppressed);
        }

        let Some(_lease) = self
            .tracker
            .acquire_lock_with_retry(&sku, self.settings.lock_attempts, self.settings.lock_backoff)
            .await
        else {
            info!(%sku, %inventory_item_id, "sku is being synced by another task; dropping event");
            return Ok(SyncOutcome::LockBusy);
        };

        // The previous holder may have written this very quantity while we waited.
        if self.tracker.is_recent_sync(&sku, location_id, available) {
            debug!(%sku, %location_id, available, "write landed while waiting for lock; suppressed");
            return Ok(SyncOutcome::Suppressed);
        }

        if deadline.is_expired() {
            warn!(%sku, "deadline expired before variant lookup");
            return Ok(SyncOutcome::TimedOut);
        }

        let variants = self.catalog.find_variants_by_sku(&sku).await?;
        if variants.len() <= 1 {
            debug!(%sku, variants = variants.len(), "no sibling variants");
            return Ok(SyncOutcome::NoSiblings);
        }

        let updates = build_sibling_updates(&variants, inventory_item_id, location_id, available);
        if updates.is_empty() {
            return Ok(SyncOutcome::NothingToDo);
        }

        if deadline.is_expired() {
            warn!(%sku, targets = updates.len(), "deadline expired before write");
            return Ok(SyncOutcome::TimedOut);
        }

        let report = self
            .catalog
            .set_absolute_quantities(&updates, AdjustReason::Correction)
            .await?;

        // Only writes that reached the platform produce echoes worth suppressing.
        if !report.any_applied() {
            return Err(SyncError::nothing_written(report));
        }
        let affected = updates
            .iter()
            .map(|u| u.inventory_item_id)
            .chain(std::iter::once(inventory_item_id));
        self.tracker.mark_sync(&sku, location_id, available, affected);

        if report.is_complete() {
            info!(
                %sku,
                %location_id,
                available,
                targets = updates.len(),
                budget_left_ms = deadline.remaining().as_millis() as u64,
                "siblings synchronized"
            );
        } else {
            warn!(
                %sku,
                %location_id,
                available,
                targets = updates.len(),
                failed_batches = report.failed_batches,
                errors = ?report.errors,
                "siblings partially synchronized"
            );
        }

        Ok(SyncOutcome::Updated {
            sku,
            targets: updates.len(),
        })
    }

    async fn jitter(&self) {
        let max_ms = self.settings.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
