use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;

use stocklink_core::{InventoryItemId, LocationId, Sku, VariantId};
use stocklink_inventory::catalog::{DEFAULT_BATCH_SIZE, retain_exact_sku, write_in_batches};
use stocklink_inventory::{
    AdjustReason, CatalogClient, CatalogError, InventoryItemRecord, LevelChange, QuantityDelta,
    QuantitySet, Variant, WriteReport,
};

/// One applied write batch, as recorded by [`InMemoryCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Set {
        reason: AdjustReason,
        updates: Vec<QuantitySet>,
    },
    Adjust {
        reason: AdjustReason,
        updates: Vec<QuantityDelta>,
    },
}

/// Catalog contents loadable from JSON for local runs.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub items_without_sku: Vec<InventoryItemId>,
}

#[derive(Debug, Default)]
struct State {
    variants: Vec<Variant>,
    items_without_sku: BTreeSet<InventoryItemId>,
    levels: HashMap<(InventoryItemId, LocationId), i64>,
    writes: Vec<WriteCall>,
    failures: VecDeque<CatalogError>,
}

/// In-memory catalog for tests and local development.
///
/// SKU search is prefix-based like the remote one, so callers still go
/// through exact-match filtering. Injected failures are consumed one per call
/// (one per batch for writes).
#[derive(Debug)]
pub struct InMemoryCatalog {
    inner: RwLock<State>,
    batch_size: usize,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(State::default()),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        let catalog = Self::new();
        for variant in seed.variants {
            catalog.add_variant(variant);
        }
        for item in seed.items_without_sku {
            catalog.add_item_without_sku(item);
        }
        catalog
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn add_variant(&self, variant: Variant) {
        if let Ok(mut state) = self.inner.write() {
            state.variants.push(variant);
        }
    }

    /// Shorthand for [`add_variant`](Self::add_variant).
    pub fn with_variant(self, id: u64, sku: Sku, inventory_item_id: u64) -> Self {
        self.add_variant(Variant {
            id: VariantId::new(id),
            sku,
            inventory_item_id: InventoryItemId::new(inventory_item_id),
        });
        self
    }

    pub fn add_item_without_sku(&self, id: InventoryItemId) {
        if let Ok(mut state) = self.inner.write() {
            state.items_without_sku.insert(id);
        }
    }

    pub fn set_level(&self, item: InventoryItemId, location: LocationId, quantity: i64) {
        if let Ok(mut state) = self.inner.write() {
            state.levels.insert((item, location), quantity);
        }
    }

    pub fn level(&self, item: InventoryItemId, location: LocationId) -> Option<i64> {
        let state = self.inner.read().ok()?;
        state.levels.get(&(item, location)).copied()
    }

    /// Make the next call (or write batch) fail with `error`.
    pub fn fail_next(&self, error: CatalogError) {
        if let Ok(mut state) = self.inner.write() {
            state.failures.push_back(error);
        }
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        match self.inner.read() {
            Ok(state) => state.writes.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn take_failure(&self) -> Result<(), CatalogError> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| CatalogError::Transport("in-memory catalog poisoned".into()))?;
        match state.failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn apply_set(
        &self,
        batch: &[QuantitySet],
        reason: AdjustReason,
    ) -> Result<Vec<LevelChange>, CatalogError> {
        self.take_failure()?;
        let mut state = self
            .inner
            .write()
            .map_err(|_| CatalogError::Transport("in-memory catalog poisoned".into()))?;

        let applied = batch
            .iter()
            .map(|u| {
                state
                    .levels
                    .insert((u.inventory_item_id, u.location_id), u.quantity);
                LevelChange {
                    inventory_item_id: u.inventory_item_id,
                    location_id: u.location_id,
                    quantity_after: u.quantity,
                }
            })
            .collect();
        state.writes.push(WriteCall::Set {
            reason,
            updates: batch.to_vec(),
        });
        Ok(applied)
    }

    fn apply_adjust(
        &self,
        batch: &[QuantityDelta],
        reason: AdjustReason,
    ) -> Result<Vec<LevelChange>, CatalogError> {
        self.take_failure()?;
        let mut state = self
            .inner
            .write()
            .map_err(|_| CatalogError::Transport("in-memory catalog poisoned".into()))?;

        let applied = batch
            .iter()
            .map(|u| {
                let level = state
                    .levels
                    .entry((u.inventory_item_id, u.location_id))
                    .or_insert(0);
                *level += u.delta;
                LevelChange {
                    inventory_item_id: u.inventory_item_id,
                    location_id: u.location_id,
                    quantity_after: *level,
                }
            })
            .collect();
        state.writes.push(WriteCall::Adjust {
            reason,
            updates: batch.to_vec(),
        });
        Ok(applied)
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn find_variants_by_sku(&self, sku: &Sku) -> Result<Vec<Variant>, CatalogError> {
        self.take_failure()?;
        let candidates: Vec<Variant> = match self.inner.read() {
            Ok(state) => state
                .variants
                .iter()
                .filter(|v| v.sku.as_str().starts_with(sku.as_str()))
                .cloned()
                .collect(),
            Err(_) => return Err(CatalogError::Transport("in-memory catalog poisoned".into())),
        };
        Ok(retain_exact_sku(sku, candidates))
    }

    async fn get_inventory_item(
        &self,
        id: InventoryItemId,
    ) -> Result<Option<InventoryItemRecord>, CatalogError> {
        self.take_failure()?;
        let state = self
            .inner
            .read()
            .map_err(|_| CatalogError::Transport("in-memory catalog poisoned".into()))?;

        if let Some(v) = state.variants.iter().find(|v| v.inventory_item_id == id) {
            return Ok(Some(InventoryItemRecord {
                id,
                sku: Some(v.sku.clone()),
            }));
        }
        Ok(state
            .items_without_sku
            .contains(&id)
            .then_some(InventoryItemRecord { id, sku: None }))
    }

    async fn set_absolute_quantities(
        &self,
        updates: &[QuantitySet],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError> {
        Ok(
            write_in_batches(updates, self.batch_size, reason, |batch| {
                let result = self.apply_set(batch, reason);
                async move { result }
            })
            .await,
        )
    }

    async fn apply_quantity_deltas(
        &self,
        updates: &[QuantityDelta],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError> {
        Ok(
            write_in_batches(updates, self.batch_size, reason, |batch| {
                let result = self.apply_adjust(batch, reason);
                async move { result }
            })
            .await,
        )
    }
}
