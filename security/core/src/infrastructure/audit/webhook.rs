// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::time::Duration;

use crate::config::AuditDestinationConfig;
use crate::domain::error::SecurityError;
use crate::domain::event::SecurityEvent;

use super::destination::AuditDestination;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs each event as JSON to a collector endpoint.
pub struct WebhookDestination {
    client: reqwest::Client,
    url: String,
}

impl WebhookDestination {
    pub fn new(config: &AuditDestinationConfig) -> Result<Self, SecurityError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| SecurityError::Config("webhook destination requires a url".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SecurityError::Config(format!("webhook header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SecurityError::Config(format!("webhook header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| SecurityError::Config(format!("webhook client: {e}")))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl AuditDestination for WebhookDestination {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn write_event(&mut self, event: &SecurityEvent) -> Result<(), SecurityError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SecurityError::Timeout(WEBHOOK_TIMEOUT)
                } else {
                    SecurityError::Network(format!("webhook delivery failed: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(SecurityError::Network(format!(
                "webhook collector returned HTTP {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditDestinationType, AuditFormat};
    use crate::domain::event::EventType;
    use std::collections::HashMap;

    fn webhook_config(url: &str) -> AuditDestinationConfig {
        AuditDestinationConfig {
            destination_type: AuditDestinationType::Webhook,
            path: None,
            format: AuditFormat::Json,
            facility: None,
            severity: None,
            url: Some(url.to_string()),
            headers: HashMap::from([("X-Audit-Source".to_string(), "conductor".to_string())]),
            max_size: None,
            max_age: None,
            max_backups: None,
            rotate_daily: false,
            compress: false,
        }
    }

    #[tokio::test]
    async fn test_posts_event_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("content-type", "application/json")
            .match_header("x-audit-source", "conductor")
            .with_status(202)
            .create_async()
            .await;

        let mut dest = WebhookDestination::new(&webhook_config(&format!(
            "{}/ingest",
            server.url()
        )))
        .unwrap();
        let event = SecurityEvent::new(EventType::Violation, "denied");
        dest.write_event(&event).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ingest")
            .with_status(500)
            .create_async()
            .await;

        let mut dest = WebhookDestination::new(&webhook_config(&format!(
            "{}/ingest",
            server.url()
        )))
        .unwrap();
        let event = SecurityEvent::new(EventType::Violation, "denied");
        assert!(dest.write_event(&event).await.is_err());
    }

    #[test]
    fn test_missing_url_rejected() {
        let mut config = webhook_config("https://example.com");
        config.url = None;
        assert!(WebhookDestination::new(&config).is_err());
    }
}
