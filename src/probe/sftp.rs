//! SFTP reachability probe.
//!
//! `ssh2` is a synchronous, libssh2-backed binding with direct
//! `Session::sftp()` support, so the whole dial-authenticate-probe
//! sequence runs on a blocking thread under a timeout watchdog rather
//! than juggling an async SSH stack for a probe that already treats
//! "slow" as "down".

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::error::ProbeBuildError;
use crate::store::schema::{ProbeResult, Status};

use super::{duration_param, param, required_param, Probe, DEFAULT_TIMEOUT};

const DEFAULT_PORT: u16 = 22;
const HEALTHCHECK_PAYLOAD: &[u8] = b"Healthcheck";

pub struct SftpProbe {
    environment: String,
    check: String,
    name: String,
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<String>,
    host_key: Option<String>,
    testfile: Option<String>,
    timeout: Duration,
}

impl SftpProbe {
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
        let password = param(params, "password").map(str::to_string);
        let key = param(params, "key").map(str::to_string);

        if password.is_none() && key.is_none() {
            return Err(ProbeBuildError::MissingParam("password or key".to_string()));
        }
        if password.is_some() && key.is_some() {
            return Err(ProbeBuildError::MutuallyExclusive("password".to_string(), "key".to_string()));
        }

        Ok(Self {
            environment: environment.to_string(),
            check: check.to_string(),
            name: name.to_string(),
            host,
            port,
            user: param(params, "user").unwrap_or_default().to_string(),
            password,
            key,
            host_key: param(params, "hostKey").map(str::to_string),
            testfile: param(params, "testfile").map(str::to_string),
            timeout,
        })
    }

    fn down(&self, start: DateTime<Utc>, duration_ms: i64, message: impl Into<String>) -> ProbeResult {
        ProbeResult::new(&self.environment, &self.check, &self.name, Status::Down, message, None, duration_ms, start)
    }

    async fn run(&self) -> ProbeResult {
        let start = Utc::now();
        let began = tokio::time::Instant::now();

        let host = self.host.clone();
        let port = self.port;
        let user = self.user.clone();
        let password = self.password.clone();
        let key = self.key.clone();
        let host_key = self.host_key.clone();
        let testfile = self.testfile.clone();

        let outcome = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || connect_and_probe(&host, port, &user, password.as_deref(), key.as_deref(), host_key.as_deref(), testfile.as_deref())),
        )
        .await;

        let duration_ms = began.elapsed().as_millis() as i64;

        match outcome {
            Err(_) => self.down(start, duration_ms, format!("sftp timeout after {:?} on {}:{}", self.timeout, self.host, self.port)),
            Ok(Err(join_err)) => self.down(start, duration_ms, format!("sftp probe task panicked: {join_err}")),
            Ok(Ok(Err(message))) => self.down(start, duration_ms, message),
            Ok(Ok(Ok(()))) => ProbeResult::new(&self.environment, &self.check, &self.name, Status::Up, "", None, duration_ms, start),
        }
    }
}

fn connect_and_probe(
    host: &str,
    port: u16,
    user: &str,
    password: Option<&str>,
    key: Option<&str>,
    host_key: Option<&str>,
    testfile: Option<&str>,
) -> Result<(), String> {
    let tcp = TcpStream::connect((host, port)).map_err(|e| format!("failed to connect with ssh: {e}"))?;

    let mut session = ssh2::Session::new().map_err(|e| e.to_string())?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| format!("failed to connect with ssh: {e}"))?;

    if let Some(expected) = host_key {
        verify_host_key(&session, expected)?;
    }

    match key {
        Some(pem) => session
            .userauth_pubkey_memory(user, None, pem, None)
            .map_err(|e| format!("unable to parse private key: {e}"))?,
        None => session
            .userauth_password(user, password.unwrap_or_default())
            .map_err(|e| format!("failed to connect with ssh: {e}"))?,
    }

    let sftp = session.sftp().map_err(|e| format!("can't create sftp client: {e}"))?;

    if let Some(path) = testfile {
        check_file_creation(&sftp, path)?;
    }

    Ok(())
}

fn verify_host_key(session: &ssh2::Session, expected_authorized_line: &str) -> Result<(), String> {
    let (key, _) = session
        .host_key()
        .ok_or_else(|| "server did not present a host key".to_string())?;

    let expected_key = expected_authorized_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| "unable to parse host key".to_string())?;
    let expected_bytes = base64_decode(expected_key).map_err(|_| "unable to parse host key".to_string())?;

    if key != expected_bytes.as_slice() {
        return Err("host key does not match configured hostKey".to_string());
    }
    Ok(())
}

fn base64_decode(s: &str) -> Result<Vec<u8>, ()> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).map_err(|_| ())
}

fn check_file_creation(sftp: &ssh2::Sftp, path: &str) -> Result<(), String> {
    let mut file = sftp
        .create(std::path::Path::new(path))
        .map_err(|e| format!("can not create testfile: {e}"))?;
    file.write_all(HEALTHCHECK_PAYLOAD)
        .map_err(|e| format!("can not write to testfile: {e}"))?;
    drop(file);

    sftp.lstat(std::path::Path::new(path))
        .map_err(|e| format!("testfile not there: {e}"))?;

    sftp.unlink(std::path::Path::new(path))
        .map_err(|e| format!("can not remove testfile: {e}"))?;

    Ok(())
}

#[async_trait]
impl Probe for SftpProbe {
    #[instrument(skip(self), fields(environment = %self.environment, check = %self.check, host = %self.host))]
    async fn check(&self) -> Vec<ProbeResult> {
        vec![self.run().await]
    }
}
