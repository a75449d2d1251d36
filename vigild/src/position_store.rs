//! Position store: the supervision cache in front of `PositionRepository`.
//!
//! Storage is the source of truth. The cache holds every PENDING/OPEN
//! position, each behind its own `tokio::sync::Mutex` so exactly one task
//! at a time can move a position toward CLOSED.
//!
//! # Write order
//!
//! Storage first, cache second. A caller that already holds an entry's lock
//! calls [`PositionStore::persist`] and writes through its guard; everyone
//! else uses [`PositionStore::upsert`].
//!
//! # Retired ids
//!
//! Every evicted id is remembered until storage stops listing it as active,
//! so a reconcile working from an older storage read never re-adopts a
//! position this process closed in the meantime.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use vigil_domain::{MarketDirection, Position, PositionId};
use vigil_engine::RetryPolicy;
use vigil_store::{Store, StoreError};

use crate::error::{DaemonError, DaemonResult};

/// Shared, lockable cache entry.
pub type PositionHandle = Arc<Mutex<Position>>;

/// Outcome of a cache refresh against storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Cached positions storage reports as CLOSED by someone else
    pub closed_out_of_band: Vec<PositionId>,
    /// Cached positions storage no longer knows about
    pub vanished: Vec<PositionId>,
    /// Active positions that appeared in storage since the last refresh
    pub adopted: usize,
    /// Cached positions replaced by a newer storage row
    pub refreshed: usize,
}

impl ReconcileReport {
    pub fn has_divergence(&self) -> bool {
        !self.closed_out_of_band.is_empty() || !self.vanished.is_empty()
    }
}

#[derive(Default)]
struct Index {
    entries: HashMap<PositionId, PositionHandle>,
    /// Evicted ids storage may still report as active
    retired: HashSet<PositionId>,
}

/// In-memory index of supervised positions.
pub struct PositionStore {
    store: Arc<dyn Store>,
    index: RwLock<Index>,
    persistence: RetryPolicy,
}

impl PositionStore {
    pub fn new(store: Arc<dyn Store>, persistence: RetryPolicy) -> Self {
        Self {
            store,
            index: RwLock::new(Index::default()),
            persistence,
        }
    }

    /// Replace the cache with every PENDING/OPEN position in storage.
    pub async fn load_active(&self) -> DaemonResult<Vec<Position>> {
        let positions = self.store.positions().find_active().await?;

        let mut index = self.index.write().await;
        index.entries.clear();
        index.retired.clear();
        for position in &positions {
            index.entries.insert(position.id, Arc::new(Mutex::new(position.clone())));
        }

        info!(count = positions.len(), "Loaded active positions");
        Ok(positions)
    }

    /// Re-read storage and bring the cache in line with it.
    ///
    /// Out-of-band closures and vanished rows are evicted with a warning;
    /// neither is an error. New active rows are adopted.
    pub async fn reconcile(&self) -> DaemonResult<ReconcileReport> {
        let stored = self.store.positions().find_active().await?;
        let stored_ids: HashSet<PositionId> = stored.iter().map(|p| p.id).collect();
        let mut report = ReconcileReport::default();

        // Cached entries storage no longer lists as active
        let stale: Vec<(PositionId, PositionHandle)> = self
            .entries()
            .await
            .into_iter()
            .filter(|(id, _)| !stored_ids.contains(id))
            .collect();

        if !stale.is_empty() {
            let ids: Vec<PositionId> = stale.iter().map(|(id, _)| *id).collect();
            let rows: HashMap<PositionId, Position> = self
                .store
                .positions()
                .find_by_ids(&ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect();

            for (id, handle) in stale {
                let cached_closed = handle.lock().await.is_closed();
                self.evict(id).await;

                if cached_closed {
                    // Closed by this process; the closer evicts it shortly anyway
                    debug!(position_id = %id, "Evicted position closed by supervisor");
                    continue;
                }

                match rows.get(&id) {
                    Some(row) => {
                        warn!(
                            position_id = %id,
                            symbol = %row.symbol,
                            close_reason = ?row.close_reason,
                            "Position closed out of band, evicted from cache"
                        );
                        report.closed_out_of_band.push(id);
                    },
                    None => {
                        warn!(position_id = %id, "Position vanished from storage, evicted from cache");
                        report.vanished.push(id);
                    },
                }
            }
        }

        // Adopt new rows, refresh rows that changed in storage
        for row in stored {
            let existing = self.get(row.id).await;
            match existing {
                Some(handle) => {
                    let mut cached = handle.lock().await;
                    if !cached.is_closed() && row.updated_at > cached.updated_at {
                        *cached = row;
                        report.refreshed += 1;
                    }
                },
                None => {
                    if self.adopt(row).await {
                        report.adopted += 1;
                    }
                },
            }
        }

        // Ids storage no longer lists as active can never come back from it
        let cached = {
            let mut index = self.index.write().await;
            index.retired.retain(|id| stored_ids.contains(id));
            index.entries.len()
        };

        if report.has_divergence() || report.adopted > 0 {
            info!(
                closed_out_of_band = report.closed_out_of_band.len(),
                vanished = report.vanished.len(),
                adopted = report.adopted,
                refreshed = report.refreshed,
                cached,
                "Position cache reconciled"
            );
        }

        Ok(report)
    }

    /// Cache a row read from storage, unless it was evicted since or another
    /// task cached it first.
    async fn adopt(&self, row: Position) -> bool {
        let mut index = self.index.write().await;
        if index.retired.contains(&row.id) || index.entries.contains_key(&row.id) {
            debug!(position_id = %row.id, "Skipping adoption of retired or cached position");
            return false;
        }
        debug!(position_id = %row.id, symbol = %row.symbol, "Adopting position from storage");
        index.entries.insert(row.id, Arc::new(Mutex::new(row)));
        true
    }

    /// Write one position to storage, retrying transient failures in place.
    pub async fn persist(&self, position: &Position) -> DaemonResult<()> {
        let positions = self.store.positions();
        with_persistence_retry(&self.persistence, "save position", || positions.save(position)).await?;
        Ok(())
    }

    /// Persist, then update the cache.
    ///
    /// Active positions are cached; a closed position is written through to
    /// its existing entry (if any) and left for the closer to evict.
    pub async fn upsert(&self, position: &Position) -> DaemonResult<()> {
        self.persist(position).await?;

        match self.get(position.id).await {
            Some(handle) => {
                *handle.lock().await = position.clone();
            },
            None if position.is_active() => {
                self.index
                    .write()
                    .await
                    .entries
                    .insert(position.id, Arc::new(Mutex::new(position.clone())));
            },
            None => {},
        }
        Ok(())
    }

    /// Admit a new PENDING position.
    ///
    /// Rejects (Validation) a side the market direction does not allow, or a
    /// user already holding `max_active` non-closed positions. The cap check
    /// and the insert are atomic in the repository.
    pub async fn admit(
        &self,
        mut position: Position,
        direction: &MarketDirection,
        max_active: usize,
    ) -> DaemonResult<Position> {
        if !direction.allows(position.side) {
            return Err(DaemonError::Validation(format!(
                "{} not allowed: Fear & Greed index {} permits {:?}",
                position.side, direction.value, direction.allowed_directions
            )));
        }
        if position.is_closed() {
            return Err(DaemonError::Validation(format!(
                "Position {} is already closed",
                position.id
            )));
        }

        position.fear_greed_index = Some(direction.value);

        let positions = self.store.positions();
        let inserted = with_persistence_retry(&self.persistence, "insert position", || {
            positions.insert_within_cap(&position, max_active)
        })
        .await;

        match inserted {
            Ok(()) => {},
            Err(StoreError::CapReached { user_id, limit }) => {
                return Err(DaemonError::Validation(format!(
                    "User {} already holds {} active positions",
                    user_id, limit
                )));
            },
            Err(e) => return Err(e.into()),
        }

        self.index
            .write()
            .await
            .entries
            .insert(position.id, Arc::new(Mutex::new(position.clone())));

        info!(
            position_id = %position.id,
            user_id = %position.user_id,
            symbol = %position.symbol,
            side = %position.side,
            fear_greed = direction.value,
            "Position admitted"
        );
        Ok(position)
    }

    /// Drop an entry from the cache; reconcile will not adopt it again.
    pub async fn evict(&self, id: PositionId) -> Option<PositionHandle> {
        let mut index = self.index.write().await;
        index.retired.insert(id);
        index.entries.remove(&id)
    }

    pub async fn get(&self, id: PositionId) -> Option<PositionHandle> {
        self.index.read().await.entries.get(&id).cloned()
    }

    /// Copies of every cached position, oldest first.
    pub async fn snapshot(&self) -> Vec<Position> {
        let mut positions = Vec::new();
        for (_, handle) in self.entries().await {
            positions.push(handle.lock().await.clone());
        }
        positions.sort_by_key(|p| p.created_at);
        positions
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.entries.is_empty()
    }

    /// Handles for every cached position.
    pub async fn entries(&self) -> Vec<(PositionId, PositionHandle)> {
        self.index
            .read()
            .await
            .entries
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }
}

/// Run a storage operation, retrying transient errors under `policy`.
pub(crate) async fn with_persistence_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &'static str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempts = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && !policy.is_exhausted(attempts + 1) => {
                attempts += 1;
                let delay = policy.delay_for(attempts);
                warn!(operation = what, attempt = attempts, ?delay, error = %e, "Storage write failed, retrying");
                tokio::time::sleep(delay).await;
            },
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
