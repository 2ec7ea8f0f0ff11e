use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{ActionId, ActionStatus, Channel, IdempotencyKey, NewAction, PendingAction};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::transition::QueueTransition;

/// Filter for listing queued actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueFilter {
    /// Statuses to include; empty means any.
    #[serde(default)]
    pub statuses: Vec<ActionStatus>,
    pub channel: Option<Channel>,
    pub event_source: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueueFilter {
    /// Filter matching dead letters only.
    pub fn dead_letters() -> Self {
        Self {
            statuses: vec![ActionStatus::Failed],
            ..Self::default()
        }
    }

    /// Default 50, clamped to `1..=1000`.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, 1000)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// In-process predicate equivalent to the SQL `WHERE` clause.
    pub fn matches(&self, action: &PendingAction) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&action.status) {
            return false;
        }
        if let Some(channel) = self.channel
            && action.channel() != channel
        {
            return false;
        }
        if let Some(source) = &self.event_source
            && &action.event_source != source
        {
            return false;
        }
        true
    }
}

/// One page of listed actions, most recently updated first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePage {
    pub actions: Vec<PendingAction>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Persisted queue of pending actions; the single source of truth for work.
///
/// Implementations must be `Send + Sync` and safe under concurrent workers
/// in separate processes: every state change is a conditional update on the
/// row's current status, never an in-process lock.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new action in `queued` state.
    ///
    /// Fails with [`StateError::DuplicateIdempotencyKey`] (carrying the id of
    /// the existing row) if the key is already taken.
    async fn enqueue(
        &self,
        action: NewAction,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, StateError>;

    async fn get(&self, id: &ActionId) -> Result<Option<PendingAction>, StateError>;

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PendingAction>, StateError>;

    /// Atomically claim up to `limit` due rows.
    ///
    /// Selects rows in `queued`/`retrying` with `next_run_at <= now`, ordered
    /// by `next_run_at`, then `created_at`, then `id`, and moves them to
    /// `dispatching` in the same step. Returns only the rows this caller won;
    /// a row lost to another worker is simply absent.
    async fn claim_next(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingAction>, StateError>;

    /// Apply a transition if the row is in an allowed state.
    ///
    /// Worker results are also checked against their
    /// [`ClaimToken`](crate::ClaimToken) under the same lock. Fails with
    /// [`StateError::InvalidTransition`] otherwise and with
    /// [`StateError::NotFound`] if the row does not exist.
    async fn apply(
        &self,
        id: &ActionId,
        transition: QueueTransition,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, StateError>;

    async fn list(&self, filter: &QueueFilter) -> Result<QueuePage, StateError>;

    /// Release every `dispatching` row claimed before `claimed_before`, as
    /// described by [`release_stale_claim`](crate::release_stale_claim).
    /// Returns the released rows.
    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingAction>, StateError>;
}
