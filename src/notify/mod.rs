//! Notification state machine & dispatcher.
//!
//! The store calls [`Notifier::notify_down`] / [`Notifier::notify_recovered`]
//! once per ingest that crosses a phase boundary. A notifier batches
//! every eligible downtime for an environment into a single message per
//! configured channel, so a flappy ingest round never produces one message
//! per check.

pub mod hipchat;
pub mod slack;

use async_trait::async_trait;
use chrono::Timelike;
use tracing::{debug, instrument, warn};

use crate::error::NotifyError;
use crate::store::schema::Downtime;

/// A configured outbound notification channel for one environment.
#[derive(Debug, Clone)]
pub struct NotificationTarget {
    pub kind: ChannelKind,
    pub target: String,
    pub alert_at_daytime: bool,
    pub alert_at_nighttime: bool,
}

/// Unrecognized values are kept as [`ChannelKind::Other`] rather than
/// rejected here: an unsupported channel type is a per-entry dispatch
/// failure, not a reason to refuse the whole configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Hipchat,
    Slack,
    Other(String),
}

impl ChannelKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "hipchat" => ChannelKind::Hipchat,
            "slack" => ChannelKind::Slack,
            other => ChannelKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Hipchat => write!(f, "hipchat"),
            ChannelKind::Slack => write!(f, "slack"),
            ChannelKind::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// Capability every concrete dispatcher satisfies. Calls are
/// transactional at the batch level: an `Err` means no downtime in the
/// batch may have its notify flag flipped.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_down(&self, environment: &str, downtimes: &[Downtime]) -> Result<(), NotifyError>;
    async fn notify_recovered(&self, environment: &str, downtimes: &[Downtime]) -> Result<(), NotifyError>;
}

/// Default dispatcher: fans out to every target configured for the
/// environment a notification is about, aggregating per-channel errors.
pub struct ChannelNotifier {
    client: reqwest::Client,
    targets_by_environment: std::collections::HashMap<String, Vec<NotificationTarget>>,
    self_url: Option<String>,
}

impl ChannelNotifier {
    pub fn new(targets_by_environment: std::collections::HashMap<String, Vec<NotificationTarget>>, self_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets_by_environment,
            self_url,
        }
    }

    #[instrument(skip(self, title, body))]
    async fn send(&self, environment: &str, title: &str, body: &str, alerting: bool) -> Result<(), NotifyError> {
        debug!(%environment, %title, "dispatching notification: {body}");

        let is_daytime = is_daytime_now();
        let mut errors = Vec::new();

        let targets = self.targets_by_environment.get(environment).map(Vec::as_slice).unwrap_or(&[]);
        for target in targets {
            let alert = alerting
                && ((target.alert_at_daytime && is_daytime) || (target.alert_at_nighttime && !is_daytime));

            let result = match &target.kind {
                ChannelKind::Hipchat => {
                    hipchat::send(&self.client, &target.target, title, body, alert, alerting).await
                }
                ChannelKind::Slack => {
                    slack::send(&self.client, &target.target, title, body, alert, alerting).await
                }
                ChannelKind::Other(raw) => Err(NotifyError::UnknownChannelType(raw.clone())),
            };

            if let Err(e) = result {
                warn!(%environment, channel = %target.kind, "notification send failed: {e}");
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Aggregate(errors))
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify_down(&self, environment: &str, downtimes: &[Downtime]) -> Result<(), NotifyError> {
        let title = down_title(environment, downtimes);
        let body = down_body(downtimes, self.self_url.as_deref(), environment);
        self.send(environment, &title, &body, true).await
    }

    async fn notify_recovered(&self, environment: &str, downtimes: &[Downtime]) -> Result<(), NotifyError> {
        let title = recovered_title(environment, downtimes);
        let body = recovered_body(downtimes, self.self_url.as_deref(), environment);
        self.send(environment, &title, &body, false).await
    }
}

fn down_title(environment: &str, downtimes: &[Downtime]) -> String {
    if downtimes.len() == 1 {
        format!("[{}] CHECK DOWN: {}", environment, downtimes[0].name)
    } else {
        format!("[{}] {} CHECKS WENT DOWN", environment, downtimes.len())
    }
}

fn down_body(downtimes: &[Downtime], self_url: Option<&str>, environment: &str) -> String {
    let mut body = String::new();
    for d in downtimes {
        body.push_str(&format!(
            "{} ({}) is failing since {}\n--> {}\n",
            d.name,
            d.check,
            d.start.format("%H:%M:%S UTC"),
            d.message
        ));
    }
    append_self_url(&mut body, self_url, environment);
    body
}

fn recovered_title(environment: &str, downtimes: &[Downtime]) -> String {
    if downtimes.len() == 1 {
        format!("[{}] CHECK RECOVERED: {}", environment, downtimes[0].name)
    } else {
        format!("[{}] {} CHECKS RECOVERED", environment, downtimes.len())
    }
}

fn recovered_body(downtimes: &[Downtime], self_url: Option<&str>, environment: &str) -> String {
    let mut body = String::new();
    for d in downtimes {
        let duration = d
            .end
            .map(|end| end.signed_duration_since(d.start))
            .unwrap_or_default();
        body.push_str(&format!(
            "{} ({}) recovered (was down for {})\n",
            d.name,
            d.check,
            format_duration(duration)
        ));
    }
    append_self_url(&mut body, self_url, environment);
    body
}

fn append_self_url(body: &mut String, self_url: Option<&str>, environment: &str) {
    if let Some(url) = self_url {
        body.push_str(&format!("See details at {}/#/{}\n", url, environment));
    }
}

fn format_duration(d: chrono::Duration) -> String {
    let total = d.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Local-hour daytime gate used for @-mention suppression.
fn is_daytime_now() -> bool {
    let hour = chrono::Local::now().hour();
    (7..19).contains(&hour)
}
