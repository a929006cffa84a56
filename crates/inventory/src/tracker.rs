//! Anti-feedback-loop tracker.
//!
//! Writing to sibling variants makes the platform emit fresh inventory-level
//! events, which would re-trigger the level flow forever. The tracker remembers
//! our own recent writes (keyed by `(sku, location, quantity)`) so their echoes
//! can be recognised, holds per-SKU processing locks, and deduplicates order
//! deliveries.
//!
//! All state is in-process and ephemeral. Losing it on restart costs at most a
//! redundant sync; the platform stays the source of truth.
//!
//! ## Time
//!
//! Ages are measured with `tokio::time::Instant`, so expiry is monotonic and
//! can be driven deterministically in tests with a paused clock.
//!
//! ## Locks and re-entrancy
//!
//! [`SyncTracker::acquire_lock`] hands out a [`SyncLease`] carrying a unique
//! token. Dropping the lease releases the lock only if the entry still carries
//! that token: if the lease outlived the timeout and another task reclaimed the
//! lock as stale, the newer holder keeps it.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use stocklink_core::{InventoryItemId, LocationId, OrderId, Sku};

use crate::orders::OrderEventKind;

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Lifetime of a sync record (suppression window).
    pub window: Duration,
    /// Age after which a held lock is considered abandoned.
    pub lock_timeout: Duration,
    /// Quantity band (±) treated as the same write. `0` means exact match only.
    ///
    /// Widening this absorbs near-simultaneous webhooks carrying slightly
    /// different snapshots of one change, at the price of occasionally
    /// suppressing a legitimate distinct update.
    pub quantity_tolerance: i64,
    /// Secondary (shorter) window for tolerance matches.
    pub tolerance_window: Duration,
    /// Lifetime of an order dedup entry.
    pub order_window: Duration,
    pub max_records: usize,
    pub max_locks: usize,
    pub max_orders: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15),
            lock_timeout: Duration::from_secs(15),
            quantity_tolerance: 0,
            tolerance_window: Duration::from_secs(5),
            order_window: Duration::from_secs(600),
            max_records: 10_000,
            max_locks: 10_000,
            max_orders: 10_000,
        }
    }
}

impl TrackerConfig {
    /// Same window for records and lock staleness.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self.lock_timeout = window;
        self
    }

    pub fn with_quantity_tolerance(mut self, tolerance: i64, window: Duration) -> Self {
        self.quantity_tolerance = tolerance.max(0);
        self.tolerance_window = window;
        self
    }

    pub fn with_order_window(mut self, window: Duration) -> Self {
        self.order_window = window;
        self
    }

    pub fn with_caps(mut self, records: usize, locks: usize, orders: usize) -> Self {
        self.max_records = records.max(1);
        self.max_locks = locks.max(1);
        self.max_orders = orders.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SyncKey {
    sku: Sku,
    location_id: LocationId,
    quantity: i64,
}

#[derive(Debug, Clone)]
struct SyncRecord {
    recorded_at: Instant,
    affected: BTreeSet<InventoryItemId>,
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    acquired_at: Instant,
    token: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    records: HashMap<SyncKey, SyncRecord>,
    locks: HashMap<Sku, LockEntry>,
    orders: HashMap<(OrderEventKind, OrderId), Instant>,
}

/// Live entry counts (exposed on the status endpoint).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub records: usize,
    pub locks: usize,
    pub orders: usize,
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub records: usize,
    pub locks: usize,
    pub orders: usize,
}

/// Injectable, cloneable handle to the tracker state.
#[derive(Debug, Clone)]
pub struct SyncTracker {
    state: Arc<Mutex<TrackerState>>,
    config: Arc<TrackerConfig>,
    next_token: Arc<AtomicU64>,
}

impl Default for SyncTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl SyncTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            config: Arc::new(config),
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // A panic while holding the mutex leaves the maps structurally valid.
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True if `(sku, location, quantity)` looks like an echo of our own write.
    pub fn is_recent_sync(&self, sku: &Sku, location_id: LocationId, quantity: i64) -> bool {
        let now = Instant::now();
        let state = self.state();

        let key = SyncKey {
            sku: sku.clone(),
            location_id,
            quantity,
        };
        if let Some(record) = state.records.get(&key) {
            if now.duration_since(record.recorded_at) < self.config.window {
                return true;
            }
        }

        let tolerance = self.config.quantity_tolerance;
        if tolerance <= 0 {
            return false;
        }
        let tolerance = tolerance as u64;
        let band_window = self.config.tolerance_window.min(self.config.window);

        state.records.iter().any(|(k, r)| {
            k.sku == *sku
                && k.location_id == location_id
                && k.quantity.abs_diff(quantity) <= tolerance
                && now.duration_since(r.recorded_at) < band_window
        })
    }

    /// Record a write we just completed. Last write wins for the affected set.
    pub fn mark_sync(
        &self,
        sku: &Sku,
        location_id: LocationId,
        quantity: i64,
        affected: impl IntoIterator<Item = InventoryItemId>,
    ) {
        let key = SyncKey {
            sku: sku.clone(),
            location_id,
            quantity,
        };
        let record = SyncRecord {
            recorded_at: Instant::now(),
            affected: affected.into_iter().collect(),
        };

        debug!(%sku, %location_id, quantity, affected = record.affected.len(), "sync recorded");

        let mut state = self.state();
        state.records.insert(key, record);
        if state.records.len() > self.config.max_records {
            let evicted = evict_oldest(&mut state.records, self.config.max_records, |r| r.recorded_at);
            warn!(evicted, cap = self.config.max_records, "sync record cap reached; evicted oldest");
        }
    }

    /// Inventory items touched by the live record for this key, if any.
    pub fn affected_items(
        &self,
        sku: &Sku,
        location_id: LocationId,
        quantity: i64,
    ) -> Option<BTreeSet<InventoryItemId>> {
        let key = SyncKey {
            sku: sku.clone(),
            location_id,
            quantity,
        };
        let now = Instant::now();
        self.state()
            .records
            .get(&key)
            .filter(|r| now.duration_since(r.recorded_at) < self.config.window)
            .map(|r| r.affected.clone())
    }

    /// Try to take the processing lock for `sku`.
    ///
    /// A lock older than `lock_timeout` is treated as abandoned and reclaimed.
    /// At `max_locks` only stale locks are dropped to make room; a live lock is
    /// never evicted, so the acquire fails instead.
    pub fn acquire_lock(&self, sku: &Sku) -> Option<SyncLease> {
        let now = Instant::now();
        let timeout = self.config.lock_timeout;
        let mut state = self.state();

        if let Some(entry) = state.locks.get(sku) {
            let age = now.duration_since(entry.acquired_at);
            if age < timeout {
                return None;
            }
            warn!(%sku, age_ms = age.as_millis() as u64, "reclaiming stale sync lock");
        } else if state.locks.len() >= self.config.max_locks {
            state
                .locks
                .retain(|_, l| now.duration_since(l.acquired_at) < timeout);
            if state.locks.len() >= self.config.max_locks {
                warn!(%sku, cap = self.config.max_locks, "sync lock cap reached; acquire refused");
                return None;
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        state.locks.insert(
            sku.clone(),
            LockEntry {
                acquired_at: now,
                token,
            },
        );

        Some(SyncLease {
            tracker: self.clone(),
            sku: sku.clone(),
            token,
        })
    }

    /// Bounded retry around [`acquire_lock`](Self::acquire_lock) with linear backoff.
    ///
    /// `None` after `attempts` tries means "could not process now"; callers drop
    /// the event rather than fail.
    pub async fn acquire_lock_with_retry(
        &self,
        sku: &Sku,
        attempts: u32,
        backoff: Duration,
    ) -> Option<SyncLease> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(lease) = self.acquire_lock(sku) {
                return Some(lease);
            }
            if attempt < attempts {
                debug!(%sku, attempt, "sync lock busy; backing off");
                tokio::time::sleep(backoff * attempt).await;
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self, sku: &Sku) -> bool {
        let now = Instant::now();
        self.state()
            .locks
            .get(sku)
            .is_some_and(|l| now.duration_since(l.acquired_at) < self.config.lock_timeout)
    }

    /// Unconditionally clear the lock for `sku`.
    pub fn release_lock(&self, sku: &Sku) {
        self.state().locks.remove(sku);
    }

    fn release_if_owner(&self, sku: &Sku, token: u64) -> bool {
        let mut state = self.state();
        match state.locks.get(sku) {
            Some(entry) if entry.token == token => {
                state.locks.remove(sku);
                true
            }
            _ => false,
        }
    }

    /// Register an order delivery. `false` if the same order event is already
    /// being (or was recently) processed.
    pub fn begin_order(&self, kind: OrderEventKind, order_id: OrderId) -> bool {
        let now = Instant::now();
        let mut state = self.state();

        if let Some(seen) = state.orders.get(&(kind, order_id)) {
            if now.duration_since(*seen) < self.config.order_window {
                return false;
            }
        }

        state.orders.insert((kind, order_id), now);
        if state.orders.len() > self.config.max_orders {
            evict_oldest(&mut state.orders, self.config.max_orders, |at| *at);
        }
        true
    }

    /// Drop an order entry so a redelivery is processed again.
    pub fn forget_order(&self, kind: OrderEventKind, order_id: OrderId) {
        self.state().orders.remove(&(kind, order_id));
    }

    /// Remove expired records, stale locks and old order entries.
    pub fn sweep(&self) -> SweepStats {
        let now = Instant::now();
        let cfg = &self.config;
        let mut state = self.state();

        let before = (state.records.len(), state.locks.len(), state.orders.len());
        state
            .records
            .retain(|_, r| now.duration_since(r.recorded_at) < cfg.window);
        state
            .locks
            .retain(|_, l| now.duration_since(l.acquired_at) < cfg.lock_timeout);
        state
            .orders
            .retain(|_, at| now.duration_since(*at) < cfg.order_window);

        evict_oldest(&mut state.records, cfg.max_records, |r| r.recorded_at);
        evict_oldest(&mut state.orders, cfg.max_orders, |at| *at);

        SweepStats {
            records: before.0 - state.records.len(),
            locks: before.1 - state.locks.len(),
            orders: before.2 - state.orders.len(),
        }
    }

    pub fn stats(&self) -> TrackerStats {
        let state = self.state();
        TrackerStats {
            records: state.records.len(),
            locks: state.locks.len(),
            orders: state.orders.len(),
        }
    }

    /// Spawn the periodic sweep task.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let tracker = self.clone();

        let join = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "sync tracker sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let swept = tracker.sweep();
                        if swept != SweepStats::default() {
                            debug!(
                                records = swept.records,
                                locks = swept.locks,
                                orders = swept.orders,
                                "sync tracker swept"
                            );
                        }
                    }
                }
            }

            info!("sync tracker sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

/// Evict oldest entries until `map.len() <= cap`. Returns how many were removed.
fn evict_oldest<K, V>(map: &mut HashMap<K, V>, cap: usize, age_of: impl Fn(&V) -> Instant) -> usize
where
    K: Clone + Eq + Hash,
{
    if map.len() <= cap {
        return 0;
    }
    let excess = map.len() - cap;

    let mut by_age: Vec<(Instant, K)> = map.iter().map(|(k, v)| (age_of(v), k.clone())).collect();
    by_age.sort_by_key(|(at, _)| *at);

    for (_, key) in by_age.into_iter().take(excess) {
        map.remove(&key);
    }
    excess
}

/// Proof of holding the per-SKU lock. Released on drop.
#[derive(Debug)]
pub struct SyncLease {
    tracker: SyncTracker,
    sku: Sku,
    token: u64,
}

impl SyncLease {
    pub fn sku(&self) -> &Sku {
        &self.sku
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        if !self.tracker.release_if_owner(&self.sku, self.token) {
            debug!(sku = %self.sku, "lease dropped after lock was reclaimed by another holder");
        }
    }
}

/// Handle to the running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}
