//! TLS certificate expiry probe.
//!
//! Establishes a real TLS handshake (which already rejects an expired or
//! otherwise invalid chain against the current wall clock) and then walks
//! the leaf certificate and every intermediate the server presented,
//! checking each one's `notAfter` against `now + minValidFor` — the same
//! chain-verification-at-a-future-time the handshake itself performs, but
//! run again against a shifted clock instead of the real one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::instrument;
use x509_parser::prelude::*;

use crate::error::ProbeBuildError;
use crate::store::schema::{ProbeResult, Status};

use super::{duration_param, param, required_param, Probe, DEFAULT_TIMEOUT};

const DEFAULT_PORT: u16 = 443;
const DEFAULT_MIN_VALID_FOR: Duration = Duration::from_secs(504 * 3600);

pub struct TlsProbe {
    environment: String,
    check: String,
    name: String,
    host: String,
    port: u16,
    timeout: Duration,
    min_valid_for: Duration,
    connector: TlsConnector,
}

impl TlsProbe {
    pub fn new(
        environment: &str,
        check: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, ProbeBuildError> {
        let host = required_param(params, "host")?.to_string();
        let port = match param(params, "port") {
            None => DEFAULT_PORT,
            Some(raw) => raw.parse().map_err(|_| ProbeBuildError::InvalidParam {
                param: "port".to_string(),
                reason: format!("'{raw}' is not a valid port"),
            })?,
        };
        let timeout = duration_param(params, "timeout", DEFAULT_TIMEOUT)?;
        let min_valid_for = duration_param(params, "minValidFor", DEFAULT_MIN_VALID_FOR)?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            environment: environment.to_string(),
            check: check.to_string(),
            name: name.to_string(),
            host,
            port,
            timeout,
            min_valid_for,
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    fn down(&self, start: DateTime<Utc>, duration_ms: i64, message: impl Into<String>) -> ProbeResult {
        ProbeResult::new(&self.environment, &self.check, &self.name, Status::Down, message, None, duration_ms, start)
    }

    async fn run(&self) -> ProbeResult {
        let start = Utc::now();
        let began = tokio::time::Instant::now();

        let attempt = tokio::time::timeout(self.timeout, self.connect_and_inspect()).await;

        let duration_ms = began.elapsed().as_millis() as i64;

        match attempt {
            Err(_) => self.down(start, duration_ms, format!("tls timeout after {:?} on {}:{}", self.timeout, self.host, self.port)),
            Ok(Err(message)) => self.down(start, duration_ms, message),
            Ok(Ok((not_before, not_after))) => ProbeResult::new(
                &self.environment,
                &self.check,
                &self.name,
                Status::Up,
                format!("Valid from {} to {}", not_before, not_after),
                None,
                duration_ms,
                start,
            ),
        }
    }

    async fn connect_and_inspect(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
        let server_name = ServerName::try_from(self.host.clone()).map_err(|e| e.to_string())?;

        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| e.to_string())?;

        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| e.to_string())?;

        let (_, conn) = tls.get_ref();
        let chain = conn.peer_certificates().ok_or("no peer certificates presented")?;
        let leaf_der = chain.first().ok_or("empty certificate chain")?;

        let (_, leaf) = X509Certificate::from_der(leaf_der.as_ref()).map_err(|e| e.to_string())?;
        let not_before = asn1_time_to_chrono(leaf.validity().not_before);
        let not_after = asn1_time_to_chrono(leaf.validity().not_after);

        let now = Utc::now();
        for (i, der) in chain.iter().enumerate() {
            let (_, cert) = X509Certificate::from_der(der.as_ref()).map_err(|e| e.to_string())?;
            let label = if i == 0 {
                format!("for {}", self.host)
            } else {
                format!("for {} (intermediate #{i})", self.host)
            };
            check_min_valid_for(&label, asn1_time_to_chrono(cert.validity().not_after), self.min_valid_for, now)?;
        }

        Ok((not_before, not_after))
    }
}

fn asn1_time_to_chrono(t: ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or_else(Utc::now)
}

/// Pure expiry-window gate: equivalent to re-verifying the chain with
/// `now = now + min_valid_for`, expressed as a direct comparison against
/// one already-handshake-validated certificate's `notAfter`. Called once
/// per certificate in the chain, not just the leaf, so an intermediate
/// that expires inside the window fails the check too.
fn check_min_valid_for(label: &str, not_after: DateTime<Utc>, min_valid_for: Duration, now: DateTime<Utc>) -> Result<(), String> {
    let deadline = now + chrono::Duration::from_std(min_valid_for).unwrap_or_default();
    if not_after < deadline {
        return Err(format!(
            "certificate {label} expires {not_after} which is before the required minimum validity window"
        ));
    }
    Ok(())
}

#[async_trait]
impl Probe for TlsProbe {
    #[instrument(skip(self), fields(environment = %self.environment, check = %self.check, host = %self.host))]
    async fn check(&self) -> Vec<ProbeResult> {
        vec![self.run().await]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_host_is_a_build_error() {
        let err = TlsProbe::new("e", "c1", "Demo", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ProbeBuildError::MissingParam(p) if p == "host"));
    }

    #[test]
    fn invalid_port_is_a_build_error() {
        let mut params = HashMap::new();
        params.insert("host".to_string(), "example.com".to_string());
        params.insert("port".to_string(), "not-a-port".to_string());
        let err = TlsProbe::new("e", "c1", "Demo", &params).unwrap_err();
        assert!(matches!(err, ProbeBuildError::InvalidParam { param, .. } if param == "port"));
    }

    /// A cert expiring in 30 days clears a 21-day minimum but fails a
    /// 60-day minimum.
    #[test]
    fn expiring_cert_clears_short_window_but_fails_long_window() {
        let now = Utc::now();
        let not_after = now + chrono::Duration::days(30);

        assert!(check_min_valid_for("for example.com", not_after, Duration::from_secs(21 * 24 * 3600), now).is_ok());

        let err = check_min_valid_for("for example.com", not_after, Duration::from_secs(60 * 24 * 3600), now).unwrap_err();
        assert!(err.contains("expires"));
        assert!(err.contains("example.com"));
    }
}
