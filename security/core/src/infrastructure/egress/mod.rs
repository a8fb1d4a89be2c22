// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SSRF-resistant HTTP egress.
//!
//! Every request runs the same gauntlet: scheme gate, DNS monitor, host and
//! method and header allowlists, pre-resolution IP validation through the
//! DNS cache, then a dial pinned to exactly the validated addresses. A
//! hostname whose record flips between validation and connect therefore has
//! nothing to flip — the connection goes to the captured addresses or not at
//! all, and a cached entry is only reused after a fresh resolution confirms
//! the record has not changed. Redirects repeat the entire gauntlet per hop.

pub mod dns_cache;
pub mod ip_guard;

use reqwest::header::HeaderName;
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::error::SecurityError;
use crate::infrastructure::dns_monitor::DnsQueryMonitor;

use dns_cache::DnsCache;
use ip_guard::{validate_ip, IpPolicy};

const BUILTIN_FORBIDDEN_HEADERS: [&str; 3] = ["host", "connection", "transfer-encoding"];

#[derive(Debug, Clone)]
pub struct HttpEgressConfig {
    /// Host patterns a request may target. Empty allows any host (the IP
    /// gate still applies).
    pub allowed_hosts: Vec<String>,
    /// Permitted methods, uppercase. Empty falls back to the standard verbs.
    pub allowed_methods: Vec<String>,
    /// Header names callers may never set, in addition to the built-in
    /// `Host`, `Connection`, `Transfer-Encoding`.
    pub forbidden_headers: Vec<String>,
    pub https_only: bool,
    pub ip_policy: IpPolicy,
    pub max_redirects: usize,
    pub max_response_size: u64,
    pub timeout: Duration,
}

impl Default for HttpEgressConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"]
                .map(str::to_string)
                .to_vec(),
            forbidden_headers: Vec::new(),
            https_only: false,
            ip_policy: IpPolicy::default(),
            max_redirects: 5,
            max_response_size: 10 * 1024 * 1024,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Per-request deadline; the effective deadline is the smaller of this
    /// and the configured client timeout.
    pub timeout: Option<Duration>,
    /// Parse the body as JSON on success; failure is recorded in metadata
    /// and the body stays a string.
    pub parse_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponseInfo {
    pub success: bool,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpMetadata {
    pub duration_ms: u64,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResult {
    pub response: HttpResponseInfo,
    pub metadata: HttpMetadata,
}

impl HttpResult {
    /// Map a non-success status to the typed error taxonomy.
    pub fn error_for_status(&self) -> Result<(), SecurityError> {
        if self.response.success {
            return Ok(());
        }
        match SecurityError::from_http_status(self.response.status_code) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct HttpEgressGuard {
    config: HttpEgressConfig,
    dns_monitor: Arc<DnsQueryMonitor>,
    dns_cache: DnsCache,
}

struct ValidatedTarget {
    url: url::Url,
    host: String,
    port: u16,
    /// Addresses the dial is pinned to; `None` only when the IP policy is
    /// fully disabled.
    pinned: Option<Vec<IpAddr>>,
}

impl HttpEgressGuard {
    pub fn new(
        config: HttpEgressConfig,
        dns_monitor: Arc<DnsQueryMonitor>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            config,
            dns_monitor,
            dns_cache: DnsCache::new(cache_ttl),
        }
    }

    pub fn dns_cache(&self) -> &DnsCache {
        &self.dns_cache
    }

    pub async fn get(&self, url: &str) -> Result<HttpResult, SecurityError> {
        self.request(HttpRequestSpec {
            method: "GET".into(),
            url: url.into(),
            ..Default::default()
        })
        .await
    }

    pub async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<HttpResult, SecurityError> {
        self.request(HttpRequestSpec {
            method: "POST".into(),
            url: url.into(),
            body: Some(body),
            ..Default::default()
        })
        .await
    }

    pub async fn put(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<HttpResult, SecurityError> {
        self.request(HttpRequestSpec {
            method: "PUT".into(),
            url: url.into(),
            body: Some(body),
            ..Default::default()
        })
        .await
    }

    pub async fn patch(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<HttpResult, SecurityError> {
        self.request(HttpRequestSpec {
            method: "PATCH".into(),
            url: url.into(),
            body: Some(body),
            ..Default::default()
        })
        .await
    }

    pub async fn delete(&self, url: &str) -> Result<HttpResult, SecurityError> {
        self.request(HttpRequestSpec {
            method: "DELETE".into(),
            url: url.into(),
            ..Default::default()
        })
        .await
    }

    /// Run a fully validated request, following redirects up to the
    /// configured bound with every hop re-validated from scratch.
    pub async fn request(&self, spec: HttpRequestSpec) -> Result<HttpResult, SecurityError> {
        let mut method = self.validate_method(&spec.method)?;
        self.validate_headers(&spec.headers)?;

        let effective_timeout = match spec.timeout {
            Some(t) => t.min(self.config.timeout),
            None => self.config.timeout,
        };

        let started = Instant::now();
        let mut current_url = spec.url.clone();
        let mut body = spec.body.clone();
        let mut hops = 0usize;

        loop {
            let target = self.validate_target(&current_url).await?;
            let client = self.build_client(&target, effective_timeout)?;

            let mut request = client.request(method.clone(), target.url.clone());
            for (name, value) in &spec.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(payload) = &body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    SecurityError::Timeout(effective_timeout)
                } else if e.is_connect() {
                    SecurityError::Network("connection failed".to_string())
                } else {
                    SecurityError::Network(format!("request failed: {e}"))
                }
            })?;

            let status = response.status();
            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                else {
                    return self.finish(response, &spec, started).await;
                };
                hops += 1;
                if hops > self.config.max_redirects {
                    return Err(SecurityError::SecurityBlocked(format!(
                        "too many redirects (limit {})",
                        self.config.max_redirects
                    )));
                }
                let next = target.url.join(&location).map_err(|e| {
                    SecurityError::InvalidUrl(format!("redirect target invalid: {e}"))
                })?;
                if downgrades_to_get(status, &method) {
                    method = Method::GET;
                    body = None;
                }
                current_url = next.into();
                continue;
            }

            return self.finish(response, &spec, started).await;
        }
    }

    fn validate_method(&self, raw: &str) -> Result<Method, SecurityError> {
        let upper = raw.trim().to_ascii_uppercase();
        let method = Method::from_str(&upper)
            .map_err(|_| SecurityError::Validation(format!("unsupported HTTP method {raw:?}")))?;
        if !self.config.allowed_methods.is_empty()
            && !self.config.allowed_methods.iter().any(|m| m == upper.as_str())
        {
            return Err(SecurityError::SecurityBlocked(format!(
                "method {upper} is not in the allowed set"
            )));
        }
        Ok(method)
    }

    fn validate_headers(&self, headers: &HashMap<String, String>) -> Result<(), SecurityError> {
        for name in headers.keys() {
            HeaderName::from_str(name)
                .map_err(|_| SecurityError::Validation(format!("invalid header name {name:?}")))?;
            let lower = name.to_ascii_lowercase();
            let forbidden = BUILTIN_FORBIDDEN_HEADERS.contains(&lower.as_str())
                || self
                    .config
                    .forbidden_headers
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case(&lower));
            if forbidden {
                return Err(SecurityError::SecurityBlocked(format!(
                    "header {name:?} may not be set by tools"
                )));
            }
        }
        Ok(())
    }

    /// Scheme gate, DNS monitor gate, host allowlist, and the pre-dial IP
    /// gate, in that order.
    async fn validate_target(&self, raw: &str) -> Result<ValidatedTarget, SecurityError> {
        let url = url::Url::parse(raw).map_err(|e| SecurityError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "https" => {}
            "http" if !self.config.https_only => {}
            "http" => {
                return Err(SecurityError::SecurityBlocked(
                    "plain http is disabled; use https".into(),
                ))
            }
            other => {
                return Err(SecurityError::InvalidUrl(format!(
                    "unsupported scheme {other:?}"
                )))
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| SecurityError::InvalidUrl("URL has no host".into()))?
            .trim_matches(['[', ']'])
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| SecurityError::InvalidUrl("URL has no usable port".into()))?;

        let ip_literal = IpAddr::from_str(&host).ok();
        if ip_literal.is_none() {
            self.dns_monitor.validate_query(&host)?;
        }

        if !self.config.allowed_hosts.is_empty()
            && crate::domain::matcher::matches_any_host(&self.config.allowed_hosts, &host, Some(port))
                .is_none()
        {
            return Err(SecurityError::SecurityBlocked(format!(
                "host is not in the egress allowlist ({} entries)",
                self.config.allowed_hosts.len()
            )));
        }

        let pinned = if self.config.ip_policy.is_active() {
            let ips = match ip_literal {
                Some(ip) => vec![ip],
                None => match self.dns_cache.cached(&host) {
                    // A cached entry is reused only after a fresh answer
                    // matches it; a record that flipped inside the TTL
                    // fails the request here.
                    Some(ips) => {
                        self.dns_cache.check_rebind(&host, port).await?;
                        ips
                    }
                    None => self.dns_cache.resolve(&host, port).await?,
                },
            };
            for ip in &ips {
                validate_ip(*ip, &self.config.ip_policy)?;
            }
            Some(ips)
        } else {
            None
        };

        Ok(ValidatedTarget {
            url,
            host,
            port,
            pinned,
        })
    }

    /// Build a client whose resolver is overridden to the validated
    /// addresses, so the connect phase cannot see a different DNS answer
    /// than the check phase did.
    fn build_client(
        &self,
        target: &ValidatedTarget,
        timeout: Duration,
    ) -> Result<reqwest::Client, SecurityError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout);

        if let Some(ips) = &target.pinned {
            let addrs: Vec<SocketAddr> = ips
                .iter()
                .map(|ip| SocketAddr::new(*ip, target.port))
                .collect();
            builder = builder.resolve_to_addrs(&target.host, &addrs);
        }

        builder
            .build()
            .map_err(|e| SecurityError::Config(format!("egress client: {e}")))
    }

    /// Clamp-read the body and assemble the result shape.
    async fn finish(
        &self,
        mut response: reqwest::Response,
        spec: &HttpRequestSpec,
        started: Instant,
    ) -> Result<HttpResult, SecurityError> {
        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();

        let limit = self.config.max_response_size;
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                SecurityError::Timeout(self.config.timeout)
            } else {
                SecurityError::Network(format!("body read failed: {e}"))
            }
        })? {
            buf.extend_from_slice(&chunk);
            if buf.len() as u64 > limit {
                return Err(SecurityError::Validation(format!(
                    "response exceeds maximum size of {limit} bytes"
                )));
            }
        }

        let size_bytes = buf.len() as u64;
        let mut parse_error = None;
        let body = if spec.parse_json {
            match serde_json::from_slice::<serde_json::Value>(&buf) {
                Ok(value) => value,
                Err(e) => {
                    parse_error = Some(e.to_string());
                    serde_json::Value::String(String::from_utf8_lossy(&buf).into_owned())
                }
            }
        } else {
            serde_json::Value::String(String::from_utf8_lossy(&buf).into_owned())
        };

        let success = status.is_success();
        let error = if success {
            None
        } else {
            Some(status_error_text(status))
        };

        Ok(HttpResult {
            response: HttpResponseInfo {
                success,
                status_code: status.as_u16(),
                headers,
                body,
                error,
            },
            metadata: HttpMetadata {
                duration_ms: started.elapsed().as_millis() as u64,
                size_bytes,
                parse_error,
            },
        })
    }
}

fn downgrades_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => method != Method::GET && method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        _ => false,
    }
}

fn status_error_text(status: StatusCode) -> String {
    match SecurityError::from_http_status(status.as_u16()) {
        Some(e) => e.to_string(),
        None => format!("HTTP {status}"),
    }
}
