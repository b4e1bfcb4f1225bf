//! Read-only status query surface, consumed by the external HTTP layer.
//! Pure views over [`crate::store::Store`]; no routing, auth, or
//! serialization framing lives here — only `serde::Serialize` structs an
//! external layer can hand to a response body without translation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::ResolvedEnvironment;
use crate::error::StoreResult;
use crate::store::{count_good_and_bad, Downtime, ProbeResult, Status, Store};

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentSummary {
    pub id: String,
    pub name: String,
    pub default: bool,
    pub good: usize,
    pub bad: usize,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckStatusView {
    pub environment: String,
    pub check: String,
    pub name: String,
    pub status: Status,
    pub message: String,
    pub detail: Option<Value>,
    pub duration_ms: i64,
    pub updated: DateTime<Utc>,
    pub last_result_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentDetail {
    pub checks: Vec<CheckStatusView>,
    pub downtimes: Vec<Downtime>,
}

/// List every configured environment with its aggregate status.
pub async fn list_environments(store: &Store, environments: &[ResolvedEnvironment]) -> StoreResult<Vec<EnvironmentSummary>> {
    let mut summaries = Vec::with_capacity(environments.len());
    for env in environments {
        let statuses = store.status(&env.id).await?;
        let (good, bad) = count_good_and_bad(&statuses);
        summaries.push(EnvironmentSummary {
            id: env.id.clone(),
            name: env.name.clone(),
            default: env.default,
            good,
            bad,
            status: if bad > 0 { Status::Down } else { Status::Up },
        });
    }
    Ok(summaries)
}

/// Current check status rows and recent downtimes for one environment.
pub async fn environment_detail(store: &Store, environment: &str) -> StoreResult<EnvironmentDetail> {
    let statuses = store.status(environment).await?;
    let downtimes = store.downtimes(environment).await?;

    let checks = statuses
        .into_iter()
        .map(|s| CheckStatusView {
            detail: s.detail.as_deref().and_then(|d| serde_json::from_str(d).ok()),
            environment: s.environment,
            check: s.check,
            name: s.name,
            status: s.status,
            message: s.message,
            duration_ms: s.duration_ms,
            updated: s.updated,
            last_result_id: s.last_result_id,
        })
        .collect();

    Ok(EnvironmentDetail { checks, downtimes })
}

pub async fn result_by_id(store: &Store, id: i64) -> StoreResult<Option<ProbeResult>> {
    store.result_by_id(id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use crate::store::memory::MemoryStore;
    use crate::store::schema::ProbeResult as Result_;
    use std::sync::Arc;

    #[tokio::test]
    async fn environment_detail_parses_json_detail() {
        let notifier = Arc::new(ChannelNotifier::new(std::collections::HashMap::new(), None));
        let store = Store::new(Box::new(MemoryStore::new()), notifier);

        let result = Result_::new(
            "e",
            "c1",
            "Demo",
            Status::Down,
            "bad body",
            Some(r#"{"status":"DOWN"}"#.to_string()),
            5,
            Utc::now(),
        );
        store.insert_result(result).await.unwrap();

        let detail = environment_detail(&store, "e").await.unwrap();
        assert_eq!(detail.checks.len(), 1);
        assert_eq!(detail.checks[0].detail, Some(serde_json::json!({"status": "DOWN"})));
    }

    #[tokio::test]
    async fn list_environments_reports_bad_status() {
        let notifier = Arc::new(ChannelNotifier::new(std::collections::HashMap::new(), None));
        let store = Store::new(Box::new(MemoryStore::new()), notifier);
        store
            .insert_result(Result_::new("e", "c1", "Demo", Status::Down, "oops", None, 5, Utc::now()))
            .await
            .unwrap();

        let envs = vec![ResolvedEnvironment {
            id: "e".to_string(),
            name: "Env".to_string(),
            default: true,
            notifications: vec![],
        }];
        let summaries = list_environments(&store, &envs).await.unwrap();
        assert_eq!(summaries[0].good, 0);
        assert_eq!(summaries[0].bad, 1);
        assert_eq!(summaries[0].status, Status::Down);
    }
}
