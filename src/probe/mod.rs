//! Probe adapter capability and construction registry.
//!
//! Every adapter satisfies the same contract: `check()` never fails by
//! aborting — any error condition becomes a `ProbeResult` with a non-UP
//! status. Construction, by contrast, can fail fatally: a bad PEM key or
//! unparseable port is a configuration error caught at startup, not
//! something that degrades into a runtime DOWN result.

pub mod http;
pub mod sftp;
pub mod tls;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeBuildError;
use crate::store::schema::ProbeResult;

/// One execution of a configured check, producing a non-empty ordered
/// sequence of results.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> Vec<ProbeResult>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the concrete adapter for a check's declared type. The registry
/// is closed: HTTP, TLS, SFTP. Adding a type is a source change.
pub fn build(
    kind: &str,
    environment: &str,
    check: &str,
    name: &str,
    params: &HashMap<String, String>,
) -> Result<Box<dyn Probe>, ProbeBuildError> {
    match kind {
        "http" => Ok(Box::new(http::HttpProbe::new(environment, check, name, params)?)),
        "tls-cert" => Ok(Box::new(tls::TlsProbe::new(environment, check, name, params)?)),
        "sftp" => Ok(Box::new(sftp::SftpProbe::new(environment, check, name, params)?)),
        other => Err(ProbeBuildError::InvalidParam {
            param: "type".to_string(),
            reason: format!("unknown check type '{other}'"),
        }),
    }
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str)
}

fn required_param<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ProbeBuildError> {
    param(params, key).ok_or_else(|| ProbeBuildError::MissingParam(key.to_string()))
}

fn duration_param(
    params: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ProbeBuildError> {
    match param(params, key) {
        None => Ok(default),
        Some(raw) => parse_duration(raw).map_err(|reason| ProbeBuildError::InvalidParam {
            param: key.to_string(),
            reason,
        }),
    }
}

/// Parse the subset of Go-style duration suffixes the configuration uses:
/// a bare integer of seconds, or a number followed by `s`/`m`/`h`.
pub(crate) fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let (num, unit) = raw.split_at(raw.len().saturating_sub(1));
    let n: u64 = num
        .parse()
        .map_err(|_| format!("'{raw}' is not a valid duration"))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("'{raw}' has an unrecognized duration suffix")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_suffixes() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("21h").unwrap(), Duration::from_secs(21 * 3600));
    }

    #[test]
    fn unknown_check_type_is_rejected() {
        let err = build("carrier-pigeon", "e", "c1", "Pigeon", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ProbeBuildError::InvalidParam { .. }));
    }
}
