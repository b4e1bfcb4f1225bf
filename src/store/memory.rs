//! In-memory [`StoreBackend`], used by unit/integration tests so the
//! downtime-derivation algorithm can be exercised without touching disk.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};

use super::backend::StoreBackend;
use super::schema::{CheckStatus, Downtime, ProbeResult};

#[derive(Default)]
struct Inner {
    results: Vec<ProbeResult>,
    next_result_id: i64,
    check_status: HashMap<(String, String), CheckStatus>,
    downtimes: Vec<Downtime>,
    next_downtime_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn insert_result(&self, result: &ProbeResult) -> StoreResult<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_result_id += 1;
        let id = inner.next_result_id;
        let mut stored = result.clone();
        stored.id = id;
        inner.results.push(stored);
        Ok(id)
    }

    async fn upsert_check_status(&self, result: &ProbeResult) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let key = (result.environment.clone(), result.check.clone());
        inner.check_status.insert(
            key,
            CheckStatus {
                environment: result.environment.clone(),
                check: result.check.clone(),
                name: result.name.clone(),
                status: result.status.clone(),
                message: result.message.clone(),
                detail: result.detail.clone(),
                duration_ms: result.duration_ms,
                updated: result.timestamp,
                last_result_id: result.id,
            },
        );
        Ok(())
    }

    async fn open_downtime(&self, environment: &str, check: &str) -> StoreResult<Option<Downtime>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .downtimes
            .iter()
            .find(|d| d.environment == environment && d.check == check && !d.recovered)
            .cloned())
    }

    async fn create_downtime(&self, result: &ProbeResult) -> StoreResult<Downtime> {
        let mut inner = self.inner.lock().await;
        inner.next_downtime_id += 1;
        let downtime = Downtime {
            id: inner.next_downtime_id,
            environment: result.environment.clone(),
            check: result.check.clone(),
            name: result.name.clone(),
            message: result.message.clone(),
            start: result.timestamp,
            end: None,
            fail_count: 1,
            last_result_id: result.id,
            recovered: false,
            comment: None,
            down_notify_sent: false,
            down_notify_time: None,
            recover_notify_sent: false,
            recover_notify_time: None,
        };
        inner.downtimes.push(downtime.clone());
        Ok(downtime)
    }

    async fn record_downtime_failure(
        &self,
        downtime_id: i64,
        message: &str,
        last_result_id: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let d = inner
            .downtimes
            .iter_mut()
            .find(|d| d.id == downtime_id)
            .ok_or(StoreError::NotFound)?;
        d.fail_count += 1;
        d.message = message.to_string();
        d.last_result_id = last_result_id;
        Ok(())
    }

    async fn close_downtime(&self, downtime_id: i64, end: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let d = inner
            .downtimes
            .iter_mut()
            .find(|d| d.id == downtime_id)
            .ok_or(StoreError::NotFound)?;
        d.recovered = true;
        d.end = Some(end);
        Ok(())
    }

    async fn mark_down_notified(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        for d in inner.downtimes.iter_mut().filter(|d| ids.contains(&d.id)) {
            d.down_notify_sent = true;
            d.down_notify_time = Some(at);
        }
        Ok(())
    }

    async fn mark_recover_notified(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        for d in inner.downtimes.iter_mut().filter(|d| ids.contains(&d.id)) {
            d.recover_notify_sent = true;
            d.recover_notify_time = Some(at);
        }
        Ok(())
    }

    async fn pending_down(&self, environment: &str) -> StoreResult<Vec<Downtime>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .downtimes
            .iter()
            .filter(|d| d.environment == environment && !d.recovered && !d.down_notify_sent)
            .cloned()
            .collect())
    }

    async fn pending_recover(&self, environment: &str) -> StoreResult<Vec<Downtime>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .downtimes
            .iter()
            .filter(|d| {
                d.environment == environment
                    && d.recovered
                    && d.down_notify_sent
                    && !d.recover_notify_sent
            })
            .cloned()
            .collect())
    }

    async fn status(&self, environment: &str) -> StoreResult<Vec<CheckStatus>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<CheckStatus> = inner
            .check_status
            .values()
            .filter(|s| s.environment == environment)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn downtimes(&self, environment: &str) -> StoreResult<Vec<Downtime>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Downtime> = inner
            .downtimes
            .iter()
            .filter(|d| d.environment == environment)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.recovered.cmp(&b.recovered).then(b.start.cmp(&a.start)));
        rows.truncate(30);
        Ok(rows)
    }

    async fn result_by_id(&self, id: i64) -> StoreResult<Option<ProbeResult>> {
        let inner = self.inner.lock().await;
        Ok(inner.results.iter().find(|r| r.id == id).cloned())
    }

    async fn reconcile(&self, checks: &[(String, String, String)]) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let wanted: std::collections::HashSet<(String, String)> = checks
            .iter()
            .map(|(env, check, _)| (env.clone(), check.clone()))
            .collect();

        inner.check_status.retain(|key, _| wanted.contains(key));

        for (environment, check, name) in checks {
            let key = (environment.clone(), check.clone());
            match inner.check_status.get_mut(&key) {
                Some(existing) => existing.name = name.clone(),
                None => {
                    inner.check_status.insert(
                        key,
                        CheckStatus {
                            environment: environment.clone(),
                            check: check.clone(),
                            name: name.clone(),
                            status: super::schema::Status::Error,
                            message: "not yet checked".to_string(),
                            detail: None,
                            duration_ms: 0,
                            updated: DateTime::from_timestamp(0, 0).unwrap(),
                            last_result_id: 0,
                        },
                    );
                }
            }
        }

        Ok(())
    }
}
