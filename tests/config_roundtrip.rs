use std::collections::HashMap;

use probewatch::config::{self, Config};

const ENVIRONMENTS_YAML: &str = r#"
- id: prod
  name: Production
  default: true
  vars:
    API_HOST: api.prod.internal
  notifications:
    - type: slack
      target: "${SLACK_WEBHOOK}"
      alertAtDaytime: true
      alertAtNighttime: false
"#;

const CHECKS_YAML: &str = r#"
- id: api-health
  name: API Health
  type: http
  every: 30s
  params:
    url: "https://${API_HOST}/healthz"
    contains: running
"#;

#[test]
fn loads_and_resolves_templated_environments_and_checks() {
    std::env::set_var("SLACK_WEBHOOK", "https://hooks.slack.test/abc");

    let environments = config::load_environments(ENVIRONMENTS_YAML).unwrap();
    assert_eq!(environments.len(), 1);
    assert_eq!(environments[0].notifications[0].target, "https://hooks.slack.test/abc");

    let checks = config::load_checks(CHECKS_YAML).unwrap();
    assert_eq!(checks[0].params.get("url").unwrap(), "https://${API_HOST}/healthz");

    let config = Config {
        environments,
        checks,
        ..Config::default()
    };
    let resolved = config.resolve().unwrap();

    assert_eq!(resolved.checks.len(), 1);
    assert_eq!(resolved.checks[0].params.get("url").unwrap(), "https://api.prod.internal/healthz");
    assert_eq!(resolved.environments[0].notifications.len(), 1);

    std::env::remove_var("SLACK_WEBHOOK");
}

#[test]
fn unknown_check_kind_is_not_rejected_by_config_resolve_itself() {
    // resolve() only validates durations and environment references;
    // unknown check *kinds* surface later at probe-construction time
    // (scheduler::spawn), matching the "Factory" split in the design.
    let config = Config {
        environments: vec![probewatch::config::Environment {
            id: "e".to_string(),
            name: "E".to_string(),
            default: true,
            vars: HashMap::new(),
            notifications: vec![],
        }],
        checks: vec![probewatch::config::Check {
            id: "c1".to_string(),
            name: "C1".to_string(),
            kind: "carrier-pigeon".to_string(),
            every: None,
            timeout: None,
            envs: vec![],
            params: HashMap::new(),
        }],
        ..Config::default()
    };

    assert!(config.resolve().is_ok());
}
