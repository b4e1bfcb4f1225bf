//! HTTP probe.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::instrument;

use crate::error::ProbeBuildError;
use crate::store::schema::{ProbeResult, Status};

use super::{duration_param, param, required_param, Probe, DEFAULT_TIMEOUT};

const USER_AGENT: &str = "statuspage";
const SPRING_CONTENT_TYPES: [&str; 2] = ["application/json", "application/vnd.spring-boot.actuator"];

pub struct HttpProbe {
    environment: String,
    check: String,
    name: String,
    url: String,
    user: Option<String>,
    password: Option<String>,
    timeout: Duration,
    format: Option<String>,
    contains: Option<String>,
    headers: Vec<(String, String)>,
    client: Client,
}

impl HttpProbe {
    pub fn new(
        environment: &str,
        check: &str,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, ProbeBuildError> {
        let url = required_param(params, "url")?.to_string();
        let timeout = duration_param(params, "timeout", DEFAULT_TIMEOUT)?;
        let headers = params
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("header-").map(|name| (name.to_string(), v.clone())))
            .collect();

        Ok(Self {
            environment: environment.to_string(),
            check: check.to_string(),
            name: name.to_string(),
            url,
            user: param(params, "user").map(str::to_string),
            password: param(params, "password").map(str::to_string),
            timeout,
            format: param(params, "format").map(str::to_string),
            contains: param(params, "contains").map(str::to_string),
            headers,
            client: Client::new(),
        })
    }

    fn down(&self, start: chrono::DateTime<Utc>, duration_ms: i64, message: impl Into<String>, detail: Option<String>) -> ProbeResult {
        ProbeResult::new(
            &self.environment,
            &self.check,
            &self.name,
            Status::Down,
            message,
            detail,
            duration_ms,
            start,
        )
    }

    async fn run(&self) -> ProbeResult {
        let start = Utc::now();
        let began = Instant::now();

        let mut request = self.client.get(&self.url).header("User-Agent", USER_AGENT).timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return self.down(start, began.elapsed().as_millis() as i64, e.to_string(), None),
        };

        let duration_ms = began.elapsed().as_millis() as i64;

        if response.status().as_u16() != 200 {
            return self.down(start, duration_ms, format!("http status code: {}", response.status().as_u16()), None);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return self.down(start, duration_ms, e.to_string(), None),
        };

        if self.format.as_deref() == Some("spring-health") {
            return self.evaluate_spring_health(start, duration_ms, &content_type, &body);
        }

        if let Some(needle) = &self.contains {
            if !body.contains(needle.as_str()) {
                return self.down(
                    start,
                    duration_ms,
                    format!("missing string \"{needle}\" in result"),
                    Some(body),
                );
            }
        }

        ProbeResult::new(&self.environment, &self.check, &self.name, Status::Up, "", None, duration_ms, start)
    }

    fn evaluate_spring_health(&self, start: chrono::DateTime<Utc>, duration_ms: i64, content_type: &str, body: &str) -> ProbeResult {
        if !SPRING_CONTENT_TYPES.iter().any(|prefix| content_type.starts_with(prefix)) {
            return self.down(
                start,
                duration_ms,
                format!("unexpected content-type '{content_type}' for spring-health format"),
                Some(body.to_string()),
            );
        }

        let parsed: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => return self.down(start, duration_ms, format!("failed to parse spring-health body: {e}"), Some(body.to_string())),
        };

        let status_str = match parsed.get("status").and_then(Value::as_str) {
            Some(s) => s,
            None => return self.down(start, duration_ms, "spring-health body missing 'status' field".to_string(), Some(body.to_string())),
        };

        ProbeResult::new(
            &self.environment,
            &self.check,
            &self.name,
            Status::parse(status_str),
            "",
            None,
            duration_ms,
            start,
        )
    }
}

#[async_trait]
impl Probe for HttpProbe {
    #[instrument(skip(self), fields(environment = %self.environment, check = %self.check, url = %self.url))]
    async fn check(&self) -> Vec<ProbeResult> {
        vec![self.run().await]
    }
}
