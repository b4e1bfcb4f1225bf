//! Error types for the probing, storage, and notification layers.
//!
//! Each layer gets its own hand-rolled error enum with `Display` and
//! `std::error::Error` impls rather than a blanket `anyhow::Error`, so
//! callers can match on the failure kind where it matters (config
//! validation is fatal, probe errors never are, store/notify errors are
//! logged and retried).

use std::fmt;

/// Errors raised while loading or resolving configuration. Always fatal
/// at startup.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    UnknownCheckType(String),
    MissingParam { check: String, param: String },
    InvalidParam { check: String, param: String, reason: String },
    AlertNotFound(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read configuration: {}", err),
            ConfigError::Parse(msg) => write!(f, "invalid configuration document: {}", msg),
            ConfigError::UnknownCheckType(kind) => write!(f, "unknown check type: {}", kind),
            ConfigError::MissingParam { check, param } => {
                write!(f, "check '{}' is missing required param '{}'", check, param)
            }
            ConfigError::InvalidParam { check, param, reason } => write!(
                f,
                "check '{}' has invalid param '{}': {}",
                check, param, reason
            ),
            ConfigError::AlertNotFound(name) => write!(f, "notification target '{}' not found", name),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Result alias for the store layer.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the store. `InsertResult` failures are logged and
/// the probe result is dropped; the next tick retries the check.
#[derive(Debug)]
pub enum StoreError {
    ConnectionFailed(String),
    QueryFailed(String),
    MigrationFailed(String),
    SerializationError(String),
    NotFound,
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(msg) => write!(f, "failed to connect to store: {}", msg),
            StoreError::QueryFailed(msg) => write!(f, "store query failed: {}", msg),
            StoreError::MigrationFailed(msg) => write!(f, "store migration failed: {}", msg),
            StoreError::SerializationError(msg) => write!(f, "store serialization error: {}", msg),
            StoreError::NotFound => write!(f, "no rows found"),
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StoreError::Io(io_err),
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

/// Errors raised by a notification dispatch batch. A non-ok result means
/// none of the flags in the batch may be flipped.
#[derive(Debug)]
pub enum NotifyError {
    Transport(String),
    BadStatus { status: u16 },
    UnknownChannelType(String),
    Aggregate(Vec<NotifyError>),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Transport(msg) => write!(f, "notification transport error: {}", msg),
            NotifyError::BadStatus { status } => write!(f, "got http status {}", status),
            NotifyError::UnknownChannelType(kind) => {
                write!(f, "unknown notification channel type: {}", kind)
            }
            NotifyError::Aggregate(errs) => {
                let joined: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", joined.join("; "))
            }
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

/// Errors a probe may raise during *construction* (never during `check()`,
/// which always resolves to a `DOWN` result instead of propagating).
#[derive(Debug)]
pub enum ProbeBuildError {
    MissingParam(String),
    InvalidParam { param: String, reason: String },
    MutuallyExclusive(String, String),
}

impl fmt::Display for ProbeBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeBuildError::MissingParam(p) => write!(f, "missing required param '{}'", p),
            ProbeBuildError::InvalidParam { param, reason } => {
                write!(f, "invalid param '{}': {}", param, reason)
            }
            ProbeBuildError::MutuallyExclusive(a, b) => {
                write!(f, "params '{}' and '{}' are mutually exclusive", a, b)
            }
        }
    }
}

impl std::error::Error for ProbeBuildError {}

impl From<ProbeBuildError> for ConfigError {
    fn from(err: ProbeBuildError) -> Self {
        match err {
            ProbeBuildError::MissingParam(param) => ConfigError::MissingParam {
                check: "<check>".to_string(),
                param,
            },
            ProbeBuildError::InvalidParam { param, reason } => ConfigError::InvalidParam {
                check: "<check>".to_string(),
                param,
                reason,
            },
            ProbeBuildError::MutuallyExclusive(a, b) => ConfigError::InvalidParam {
                check: "<check>".to_string(),
                param: format!("{a}/{b}"),
                reason: "mutually exclusive params both set".to_string(),
            },
        }
    }
}
