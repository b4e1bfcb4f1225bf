use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use probewatch::config::{ResolvedCheck, ResolvedConfig, ResolvedEnvironment};
use probewatch::notify::ChannelNotifier;
use probewatch::scheduler;
use probewatch::store::memory::MemoryStore;
use probewatch::store::Store;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn spawned_checks_land_results_in_the_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut params = HashMap::new();
    params.insert("url".to_string(), format!("{}/healthz", server.uri()));

    let resolved = ResolvedConfig {
        worker: 2,
        default_period: Duration::from_millis(50),
        db_path: ":memory:".to_string(),
        self_url: None,
        environments: vec![ResolvedEnvironment {
            id: "prod".to_string(),
            name: "Production".to_string(),
            default: true,
            notifications: vec![],
        }],
        checks: vec![ResolvedCheck {
            environment: "prod".to_string(),
            check: "web".to_string(),
            name: "Web".to_string(),
            kind: "http".to_string(),
            period: Duration::from_millis(50),
            timeout: None,
            params,
        }],
    };

    let notifier = Arc::new(ChannelNotifier::new(Default::default(), None));
    let store = Arc::new(Store::new(Box::new(MemoryStore::new()), notifier));

    let handle = scheduler::spawn(&resolved, store.clone()).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let statuses = store.status("prod").await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].status.is_up());

    handle.shutdown().await;
}
