//! Configuration layer: typed environment/check documents, `${VAR}`
//! template expansion, and resolution into the per-(environment, check)
//! materialized form the scheduler consumes.
//!
//! The loader here covers the YAML documents and `${VAR}` expansion only;
//! the CLI flags that locate those files on disk belong to the binary.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::notify::{ChannelKind, NotificationTarget};
use crate::probe::parse_duration;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    #[serde(default = "default_true")]
    pub alert_at_daytime: bool,
    #[serde(default = "default_true")]
    pub alert_at_nighttime: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(default)]
    pub notifications: Vec<RawNotification>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Check {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub every: Option<String>,
    pub timeout: Option<String>,
    #[serde(default)]
    pub envs: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub worker: usize,
    pub duration: String,
    pub db_path: String,
    pub self_url: Option<String>,
    pub environments: Vec<Environment>,
    pub checks: Vec<Check>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: 20,
            duration: "1m".to_string(),
            db_path: "statuspage.db".to_string(),
            self_url: None,
            environments: Vec::new(),
            checks: Vec::new(),
        }
    }
}

/// One fully materialized check instance for a single environment.
#[derive(Debug, Clone)]
pub struct ResolvedCheck {
    pub environment: String,
    pub check: String,
    pub name: String,
    pub kind: String,
    pub period: Duration,
    pub timeout: Option<Duration>,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedEnvironment {
    pub id: String,
    pub name: String,
    pub default: bool,
    pub notifications: Vec<NotificationTarget>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub worker: usize,
    pub default_period: Duration,
    pub db_path: String,
    pub self_url: Option<String>,
    pub environments: Vec<ResolvedEnvironment>,
    pub checks: Vec<ResolvedCheck>,
}

impl Config {
    /// Expand `${VAR}` templates, merge defaults, and materialize one
    /// `ResolvedCheck` per (environment, check) the check applies to.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let default_period = parse_duration(&self.duration)
            .map_err(|reason| ConfigError::InvalidParam {
                check: "<runtime>".to_string(),
                param: "duration".to_string(),
                reason,
            })?;

        let mut environments = Vec::with_capacity(self.environments.len());
        for env in &self.environments {
            let mut notifications = Vec::with_capacity(env.notifications.len());
            for raw in &env.notifications {
                // An unrecognized channel type is not fatal here: it carries
                // through as `ChannelKind::Other` and only fails, per entry,
                // when the notifier actually tries to dispatch to it.
                notifications.push(NotificationTarget {
                    kind: ChannelKind::parse(&raw.kind),
                    target: expand(&raw.target, &env.vars),
                    alert_at_daytime: raw.alert_at_daytime,
                    alert_at_nighttime: raw.alert_at_nighttime,
                });
            }
            environments.push(ResolvedEnvironment {
                id: env.id.clone(),
                name: env.name.clone(),
                default: env.default,
                notifications,
            });
        }

        let mut checks = Vec::new();
        for check in &self.checks {
            let period = match &check.every {
                Some(raw) => parse_duration(raw).map_err(|reason| ConfigError::InvalidParam {
                    check: check.id.clone(),
                    param: "every".to_string(),
                    reason,
                })?,
                None => default_period,
            };
            let timeout = match &check.timeout {
                Some(raw) => Some(parse_duration(raw).map_err(|reason| ConfigError::InvalidParam {
                    check: check.id.clone(),
                    param: "timeout".to_string(),
                    reason,
                })?),
                None => None,
            };

            let targets: Vec<&Environment> = if check.envs.is_empty() {
                self.environments.iter().collect()
            } else {
                check
                    .envs
                    .iter()
                    .map(|id| {
                        self.environments
                            .iter()
                            .find(|e| &e.id == id)
                            .ok_or_else(|| ConfigError::AlertNotFound(id.clone()))
                    })
                    .collect::<Result<_, _>>()?
            };

            for env in targets {
                let params = check
                    .params
                    .iter()
                    .map(|(k, v)| (k.clone(), expand(v, &env.vars)))
                    .collect();

                checks.push(ResolvedCheck {
                    environment: env.id.clone(),
                    check: check.id.clone(),
                    name: check.name.clone(),
                    kind: check.kind.clone(),
                    period,
                    timeout,
                    params,
                });
            }
        }

        Ok(ResolvedConfig {
            worker: self.worker,
            default_period,
            db_path: self.db_path.clone(),
            self_url: self.self_url.clone(),
            environments,
            checks,
        })
    }
}

/// Expand `${VAR}` placeholders against process environment variables
/// first, falling back to the per-environment `vars` map — matching the
/// source loader's `os.Expand` precedence.
pub fn expand(template: &str, local_vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                let value = std::env::var(name).ok().or_else(|| local_vars.get(name).cloned());
                out.push_str(&value.unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn load_environments(contents: &str) -> Result<Vec<Environment>, ConfigError> {
    let expanded = expand(contents, &HashMap::new());
    Ok(serde_yaml::from_str(&expanded)?)
}

/// Checks are shared across every environment they apply to, so this only
/// expands `${VAR}` against the process environment here — per-environment
/// `vars` are expanded later, once per (environment, check) pair, in
/// [`Config::resolve`].
pub fn load_checks(contents: &str) -> Result<Vec<Check>, ConfigError> {
    let expanded = expand(contents, &HashMap::new());
    Ok(serde_yaml::from_str(&expanded)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_prefers_process_env_over_local_vars() {
        std::env::set_var("PROBEWATCH_TEST_VAR", "from-env");
        let mut vars = HashMap::new();
        vars.insert("PROBEWATCH_TEST_VAR".to_string(), "from-local".to_string());
        assert_eq!(expand("${PROBEWATCH_TEST_VAR}", &vars), "from-env");
        std::env::remove_var("PROBEWATCH_TEST_VAR");
    }

    #[test]
    fn expand_falls_back_to_local_vars() {
        let mut vars = HashMap::new();
        vars.insert("HOST".to_string(), "db.internal".to_string());
        assert_eq!(expand("https://${HOST}/healthz", &vars), "https://db.internal/healthz");
    }

    #[test]
    fn expand_leaves_unknown_vars_empty() {
        assert_eq!(expand("${UNSET_PROBEWATCH_VAR}", &HashMap::new()), "");
    }

    #[test]
    fn resolve_materializes_one_check_per_applicable_environment() {
        let config = Config {
            environments: vec![
                Environment {
                    id: "prod".to_string(),
                    name: "Production".to_string(),
                    default: true,
                    vars: HashMap::new(),
                    notifications: vec![],
                },
                Environment {
                    id: "staging".to_string(),
                    name: "Staging".to_string(),
                    default: false,
                    vars: HashMap::new(),
                    notifications: vec![],
                },
            ],
            checks: vec![Check {
                id: "web".to_string(),
                name: "Web".to_string(),
                kind: "http".to_string(),
                every: Some("30s".to_string()),
                timeout: None,
                envs: vec!["prod".to_string()],
                params: HashMap::new(),
            }],
            ..Config::default()
        };

        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.checks.len(), 1);
        assert_eq!(resolved.checks[0].environment, "prod");
        assert_eq!(resolved.checks[0].period, Duration::from_secs(30));
    }

    #[test]
    fn resolve_applies_to_all_environments_when_envs_unset() {
        let config = Config {
            environments: vec![Environment {
                id: "prod".to_string(),
                name: "Production".to_string(),
                default: true,
                vars: HashMap::new(),
                notifications: vec![],
            }],
            checks: vec![Check {
                id: "web".to_string(),
                name: "Web".to_string(),
                kind: "http".to_string(),
                every: None,
                timeout: None,
                envs: vec![],
                params: HashMap::new(),
            }],
            ..Config::default()
        };

        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.checks.len(), 1);
        assert_eq!(resolved.checks[0].period, resolved.default_period);
    }

    #[test]
    fn resolve_carries_unknown_notification_channel_through() {
        let config = Config {
            environments: vec![Environment {
                id: "prod".to_string(),
                name: "Production".to_string(),
                default: true,
                vars: HashMap::new(),
                notifications: vec![RawNotification {
                    kind: "carrier-pigeon".to_string(),
                    target: "https://example.com".to_string(),
                    alert_at_daytime: true,
                    alert_at_nighttime: true,
                }],
            }],
            ..Config::default()
        };

        let resolved = config.resolve().unwrap();
        assert_eq!(
            resolved.environments[0].notifications[0].kind,
            ChannelKind::Other("carrier-pigeon".to_string())
        );
    }
}
