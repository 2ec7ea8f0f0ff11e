use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use courier_core::{ActionId, ActionStatus, IdempotencyKey, NewAction, PendingAction};
use courier_state::{
    QueueFilter, QueuePage, QueueStore, QueueTransition, StateError, release_stale_claim,
};

/// In-memory [`QueueStore`] backed by [`DashMap`]s.
///
/// Every row change happens under the row's shard write lock, so a status
/// check and the update that follows it are atomic with respect to other
/// tasks. Suitable for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    rows: DashMap<ActionId, PendingAction>,
    keys: DashMap<IdempotencyKey, ActionId>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(
        &self,
        action: NewAction,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, StateError> {
        match self.keys.entry(action.idempotency_key.clone()) {
            Entry::Occupied(existing) => Err(StateError::DuplicateIdempotencyKey {
                key: action.idempotency_key,
                existing: existing.get().clone(),
            }),
            Entry::Vacant(vacant) => {
                let row = action.into_pending(now);
                // Insert the row while the key slot is still locked so a
                // concurrent lookup by key never sees a dangling id.
                self.rows.insert(row.id.clone(), row.clone());
                vacant.insert(row.id.clone());
                Ok(row)
            }
        }
    }

    async fn get(&self, id: &ActionId) -> Result<Option<PendingAction>, StateError> {
        Ok(self.rows.get(id).map(|r| r.clone()))
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PendingAction>, StateError> {
        let Some(id) = self.keys.get(key).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.get(&id).await
    }

    async fn claim_next(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingAction>, StateError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut candidates: Vec<_> = self
            .rows
            .iter()
            .filter(|r| r.is_due(now))
            .map(|r| (r.next_run_at, r.created_at, r.id.clone()))
            .collect();
        candidates.sort();

        let mut claimed = Vec::with_capacity(limit.min(candidates.len()));
        for (_, _, id) in candidates {
            if claimed.len() == limit {
                break;
            }
            // Re-check under the write lock; another task may have won.
            if let Some(mut row) = self.rows.get_mut(&id)
                && row.is_due(now)
            {
                row.status = ActionStatus::Dispatching;
                row.claimed_at = Some(now);
                row.updated_at = now;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn apply(
        &self,
        id: &ActionId,
        transition: QueueTransition,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, StateError> {
        let mut row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(format!("action {id}")))?;
        transition.apply(&mut row, now)?;
        Ok(row.clone())
    }

    async fn list(&self, filter: &QueueFilter) -> Result<QueuePage, StateError> {
        let mut matching: Vec<PendingAction> = self
            .rows
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.clone())
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();
        let actions = matching.into_iter().skip(offset).take(limit).collect();
        Ok(QueuePage {
            actions,
            total,
            limit,
            offset,
        })
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingAction>, StateError> {
        let is_stale = |row: &PendingAction| {
            row.status == ActionStatus::Dispatching
                && row.claimed_at.is_some_and(|at| at < claimed_before)
        };
        let stale: Vec<ActionId> = self
            .rows
            .iter()
            .filter(|r| is_stale(r.value()))
            .map(|r| r.id.clone())
            .collect();

        let mut released = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(mut row) = self.rows.get_mut(&id)
                && is_stale(&*row)
            {
                release_stale_claim(&mut row, now);
                released.push(row.clone());
            }
        }
        Ok(released)
    }
}
