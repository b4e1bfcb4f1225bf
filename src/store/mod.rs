//! The store: single writer of derived state.
//!
//! [`Store`] wraps a pluggable [`StoreBackend`] and a [`Notifier`], and
//! owns the downtime-derivation algorithm so it is identical regardless
//! of which backend persists the rows. Writes are serialized through an
//! internal lock — notification dispatch happens inside that critical
//! section, so a notification is never sent for a write another ingest
//! could still race against.

pub mod backend;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use backend::{count_good_and_bad, StoreBackend};
pub use schema::{CheckStatus, Downtime, ProbeResult, Status};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::error::StoreResult;
use crate::notify::Notifier;

/// Minimum confirmed failures before a downtime is eligible for a DOWN
/// notification (the "two-strike" policy: a single flap never alerts).
const DOWN_NOTIFY_THRESHOLD: i64 = 2;

pub struct Store {
    backend: Box<dyn StoreBackend>,
    notifier: Arc<dyn Notifier>,
    write_lock: Mutex<()>,
}

impl Store {
    pub fn new(backend: Box<dyn StoreBackend>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            backend,
            notifier,
            write_lock: Mutex::new(()),
        }
    }

    /// Reconcile `check_status` against the currently configured checks:
    /// create missing rows, refresh stale names, drop rows for checks no
    /// longer configured. Call once at startup after loading configuration.
    pub async fn reconcile(&self, checks: &[(String, String, String)]) -> StoreResult<()> {
        self.backend.reconcile(checks).await
    }

    /// Persist one probe result and drive the downtime/notification state
    /// machine.
    #[instrument(skip(self, result), fields(environment = %result.environment, check = %result.check, status = %result.status))]
    pub async fn insert_result(&self, mut result: ProbeResult) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let id = self.backend.insert_result(&result).await?;
        result.id = id;

        self.backend.upsert_check_status(&result).await?;

        let open = self.backend.open_downtime(&result.environment, &result.check).await?;

        match (result.status.is_up(), open) {
            (true, None) => {}
            (true, Some(downtime)) => {
                self.backend.close_downtime(downtime.id, result.timestamp).await?;
            }
            (false, None) => {
                self.backend.create_downtime(&result).await?;
            }
            (false, Some(downtime)) => {
                self.backend
                    .record_downtime_failure(downtime.id, &result.message, result.id)
                    .await?;
            }
        }

        self.evaluate_notifications(&result.environment).await?;

        Ok(())
    }

    /// Evaluate the DOWN and RECOVER notification phases for an
    /// environment. Errors from the notifier are logged, not propagated:
    /// the flags stay unset and the phase is retried on the next ingest
    /// that touches this environment.
    async fn evaluate_notifications(&self, environment: &str) -> StoreResult<()> {
        let pending_down = self.backend.pending_down(environment).await?;
        if pending_down.iter().any(|d| d.fail_count >= DOWN_NOTIFY_THRESHOLD) && !pending_down.is_empty() {
            match self.notifier.notify_down(environment, &pending_down).await {
                Ok(()) => {
                    let ids: Vec<i64> = pending_down.iter().map(|d| d.id).collect();
                    self.backend.mark_down_notified(&ids, Utc::now()).await?;
                }
                Err(e) => warn!(%environment, "down notification batch failed: {e}"),
            }
        }

        let pending_recover = self.backend.pending_recover(environment).await?;
        if !pending_recover.is_empty() {
            match self.notifier.notify_recovered(environment, &pending_recover).await {
                Ok(()) => {
                    let ids: Vec<i64> = pending_recover.iter().map(|d| d.id).collect();
                    self.backend.mark_recover_notified(&ids, Utc::now()).await?;
                }
                Err(e) => warn!(%environment, "recover notification batch failed: {e}"),
            }
        }

        Ok(())
    }

    pub async fn status(&self, environment: &str) -> StoreResult<Vec<CheckStatus>> {
        self.backend.status(environment).await
    }

    pub async fn downtimes(&self, environment: &str) -> StoreResult<Vec<Downtime>> {
        self.backend.downtimes(environment).await
    }

    pub async fn result_by_id(&self, id: i64) -> StoreResult<Option<ProbeResult>> {
        self.backend.result_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNotifier {
        down_calls: StdMutex<Vec<(String, usize)>>,
        recover_calls: StdMutex<Vec<(String, usize)>>,
        fail_down: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_down(&self, environment: &str, downtimes: &[Downtime]) -> Result<(), NotifyError> {
            if self.fail_down.load(Ordering::SeqCst) > 0 {
                self.fail_down.fetch_sub(1, Ordering::SeqCst);
                return Err(NotifyError::BadStatus { status: 500 });
            }
            self.down_calls
                .lock()
                .unwrap()
                .push((environment.to_string(), downtimes.len()));
            Ok(())
        }

        async fn notify_recovered(&self, environment: &str, downtimes: &[Downtime]) -> Result<(), NotifyError> {
            self.recover_calls
                .lock()
                .unwrap()
                .push((environment.to_string(), downtimes.len()));
            Ok(())
        }
    }

    fn make_result(env: &str, check: &str, status: Status) -> ProbeResult {
        ProbeResult::new(env, check, "Demo Check", status, "", None, 5, Utc::now())
    }

    #[tokio::test]
    async fn flap_below_threshold_never_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Store::new(Box::new(memory::MemoryStore::new()), notifier.clone());

        store.insert_result(make_result("e", "c1", Status::Up)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Up)).await.unwrap();

        let downtimes = store.downtimes("e").await.unwrap();
        assert_eq!(downtimes.len(), 1);
        assert_eq!(downtimes[0].fail_count, 1);
        assert!(downtimes[0].recovered);

        assert!(notifier.down_calls.lock().unwrap().is_empty());
        assert!(notifier.recover_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirmed_outage_then_recovery_notifies_both_phases() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Store::new(Box::new(memory::MemoryStore::new()), notifier.clone());

        store.insert_result(make_result("e", "c1", Status::Up)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        assert!(notifier.down_calls.lock().unwrap().is_empty());

        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        assert_eq!(notifier.down_calls.lock().unwrap().len(), 1);

        store.insert_result(make_result("e", "c1", Status::Up)).await.unwrap();
        assert_eq!(notifier.recover_calls.lock().unwrap().len(), 1);

        let downtimes = store.downtimes("e").await.unwrap();
        assert_eq!(downtimes.len(), 1);
        assert!(downtimes[0].recovered);
        assert!(downtimes[0].down_notify_sent);
        assert!(downtimes[0].recover_notify_sent);
    }

    #[tokio::test]
    async fn multi_check_batch_notifies_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Store::new(Box::new(memory::MemoryStore::new()), notifier.clone());

        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        store.insert_result(make_result("e", "c2", Status::Down)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();

        let calls = notifier.down_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, 2);
    }

    #[tokio::test]
    async fn single_open_episode_invariant_holds() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Store::new(Box::new(memory::MemoryStore::new()), notifier);

        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Up)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();

        let open_episodes = store
            .downtimes("e")
            .await
            .unwrap()
            .into_iter()
            .filter(|d| !d.recovered)
            .count();
        assert_eq!(open_episodes, 1);
    }

    #[tokio::test]
    async fn failed_down_notification_leaves_flags_unset_for_retry() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.fail_down.store(1, Ordering::SeqCst);
        let store = Store::new(Box::new(memory::MemoryStore::new()), notifier.clone());

        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();

        let downtimes = store.downtimes("e").await.unwrap();
        assert!(!downtimes[0].down_notify_sent);

        // next ingest retries the phase and succeeds.
        store.insert_result(make_result("e", "c1", Status::Down)).await.unwrap();
        let downtimes = store.downtimes("e").await.unwrap();
        assert!(downtimes[0].down_notify_sent);
    }

    #[tokio::test]
    async fn check_status_mirrors_last_result() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Store::new(Box::new(memory::MemoryStore::new()), notifier);

        store.insert_result(make_result("e", "c1", Status::Up)).await.unwrap();
        let statuses = store.status("e").await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].status.is_up());

        let (good, bad) = count_good_and_bad(&statuses);
        assert_eq!((good, bad), (1, 0));
    }
}
