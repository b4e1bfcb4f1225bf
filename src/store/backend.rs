//! Pluggable persistence backend for the store.
//!
//! Keeping the downtime-derivation algorithm in [`crate::store::Store`]
//! independent of the concrete backend lets tests run against an
//! in-memory implementation while production uses SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;

use super::schema::{CheckStatus, Downtime, ProbeResult};

#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Insert the result row, returning its assigned id.
    async fn insert_result(&self, result: &ProbeResult) -> StoreResult<i64>;

    async fn upsert_check_status(&self, result: &ProbeResult) -> StoreResult<()>;

    async fn open_downtime(&self, environment: &str, check: &str) -> StoreResult<Option<Downtime>>;

    /// Open a new downtime episode seeded from the first failing result.
    async fn create_downtime(&self, result: &ProbeResult) -> StoreResult<Downtime>;

    async fn record_downtime_failure(
        &self,
        downtime_id: i64,
        message: &str,
        last_result_id: i64,
    ) -> StoreResult<()>;

    async fn close_downtime(&self, downtime_id: i64, end: DateTime<Utc>) -> StoreResult<()>;

    async fn mark_down_notified(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()>;

    async fn mark_recover_notified(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()>;

    /// Open, not-yet-down-notified downtimes for an environment.
    async fn pending_down(&self, environment: &str) -> StoreResult<Vec<Downtime>>;

    /// Closed, down-notified, not-yet-recover-notified downtimes.
    async fn pending_recover(&self, environment: &str) -> StoreResult<Vec<Downtime>>;

    async fn status(&self, environment: &str) -> StoreResult<Vec<CheckStatus>>;

    /// Most recent 30 downtimes, open episodes first.
    async fn downtimes(&self, environment: &str) -> StoreResult<Vec<Downtime>>;

    async fn result_by_id(&self, id: i64) -> StoreResult<Option<ProbeResult>>;

    /// Reconcile `check_status` against the configured (environment, check,
    /// name) triples: create missing rows, refresh stale names, delete rows
    /// for checks no longer configured.
    async fn reconcile(&self, checks: &[(String, String, String)]) -> StoreResult<()>;
}

/// Pure helper over already-fetched statuses.
pub fn count_good_and_bad(statuses: &[CheckStatus]) -> (usize, usize) {
    let good = statuses.iter().filter(|s| s.status.is_up()).count();
    (good, statuses.len() - good)
}
