//! Data model for probe results, live check status, and downtime episodes.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a single probe. `Other` carries through a status string a
/// probe observed verbatim (e.g. a Spring Boot actuator status) that
/// doesn't match one of the known values; it is treated as non-UP
/// everywhere in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum Status {
    Up,
    Down,
    Degraded,
    Error,
    Other(String),
}

impl Status {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "UP" => Status::Up,
            "DOWN" => Status::Down,
            "DEGRADED" => Status::Degraded,
            "ERROR" => Status::Error,
            _ => Status::Other(raw.to_string()),
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Status::Up)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::Degraded => "DEGRADED",
            Status::Error => "ERROR",
            Status::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.as_str().to_string()
    }
}

use std::fmt;

/// An immutable record of one probe execution.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub id: i64,
    pub environment: String,
    pub check: String,
    pub name: String,
    pub status: Status,
    pub message: String,
    pub detail: Option<String>,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    /// Build a fresh, not-yet-persisted result (`id` is assigned by the store).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        environment: impl Into<String>,
        check: impl Into<String>,
        name: impl Into<String>,
        status: Status,
        message: impl Into<String>,
        detail: Option<String>,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            environment: environment.into(),
            check: check.into(),
            name: name.into(),
            status,
            message: message.into(),
            detail,
            duration_ms,
            timestamp,
        }
    }
}

/// The single current-truth row for one (environment, check) pair.
#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub environment: String,
    pub check: String,
    pub name: String,
    pub status: Status,
    pub message: String,
    pub detail: Option<String>,
    pub duration_ms: i64,
    pub updated: DateTime<Utc>,
    pub last_result_id: i64,
}

/// A maximal consecutive run of non-UP results for a (environment, check) pair.
#[derive(Debug, Clone, Serialize)]
pub struct Downtime {
    pub id: i64,
    pub environment: String,
    pub check: String,
    pub name: String,
    pub message: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub fail_count: i64,
    pub last_result_id: i64,
    pub recovered: bool,
    pub comment: Option<String>,
    pub down_notify_sent: bool,
    pub down_notify_time: Option<DateTime<Utc>>,
    pub recover_notify_sent: bool,
    pub recover_notify_time: Option<DateTime<Utc>>,
}

impl Downtime {
    pub fn is_open(&self) -> bool {
        !self.recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_known_values() {
        assert_eq!(Status::parse("UP"), Status::Up);
        assert_eq!(Status::parse("down"), Status::Down);
        assert_eq!(Status::parse("Degraded"), Status::Degraded);
    }

    #[test]
    fn status_parse_unknown_carried_verbatim() {
        let s = Status::parse("OUT_OF_SERVICE");
        assert_eq!(s.as_str(), "OUT_OF_SERVICE");
        assert!(!s.is_up());
    }

    #[test]
    fn only_up_is_up() {
        assert!(Status::Up.is_up());
        assert!(!Status::Down.is_up());
        assert!(!Status::Degraded.is_up());
        assert!(!Status::Error.is_up());
    }
}
