// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Syslog destination: RFC 3164 datagrams over the local syslog socket, with
// the event serialized as JSON in the message body.

use async_trait::async_trait;

use crate::config::AuditDestinationConfig;
use crate::domain::error::SecurityError;
use crate::domain::event::SecurityEvent;

use super::destination::AuditDestination;

const TAG: &str = "conductor-security";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facility(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Severity(u8);

impl Facility {
    pub fn parse(name: &str) -> Result<Self, SecurityError> {
        let code = match name.to_ascii_lowercase().as_str() {
            "kern" => 0,
            "user" => 1,
            "mail" => 2,
            "daemon" => 3,
            "auth" => 4,
            "syslog" => 5,
            "lpr" => 6,
            "news" => 7,
            "uucp" => 8,
            "cron" => 9,
            "authpriv" => 10,
            "ftp" => 11,
            "local0" => 16,
            "local1" => 17,
            "local2" => 18,
            "local3" => 19,
            "local4" => 20,
            "local5" => 21,
            "local6" => 22,
            "local7" => 23,
            other => {
                return Err(SecurityError::Config(format!(
                    "unknown syslog facility {other:?}"
                )))
            }
        };
        Ok(Self(code))
    }
}

impl Severity {
    pub fn parse(name: &str) -> Result<Self, SecurityError> {
        let code = match name.to_ascii_lowercase().as_str() {
            "emerg" => 0,
            "alert" => 1,
            "crit" => 2,
            "err" | "error" => 3,
            "warning" | "warn" => 4,
            "notice" => 5,
            "info" => 6,
            "debug" => 7,
            other => {
                return Err(SecurityError::Config(format!(
                    "unknown syslog severity {other:?}"
                )))
            }
        };
        Ok(Self(code))
    }
}

pub struct SyslogDestination {
    #[cfg(unix)]
    socket: std::os::unix::net::UnixDatagram,
    priority: u8,
}

impl SyslogDestination {
    pub fn connect(config: &AuditDestinationConfig) -> Result<Self, SecurityError> {
        let facility = Facility::parse(config.facility.as_deref().unwrap_or("daemon"))?;
        let severity = Severity::parse(config.severity.as_deref().unwrap_or("notice"))?;
        let priority = facility.0 * 8 + severity.0;

        #[cfg(unix)]
        {
            let socket = std::os::unix::net::UnixDatagram::unbound()
                .map_err(|e| SecurityError::Config(format!("syslog socket: {e}")))?;
            let connected = ["/dev/log", "/var/run/syslog"]
                .iter()
                .any(|path| socket.connect(path).is_ok());
            if !connected {
                return Err(SecurityError::Config(
                    "no syslog socket at /dev/log or /var/run/syslog".into(),
                ));
            }
            Ok(Self { socket, priority })
        }
        #[cfg(not(unix))]
        {
            let _ = priority;
            Err(SecurityError::Config(
                "syslog destination requires a unix host".into(),
            ))
        }
    }

    fn format_message(&self, event: &SecurityEvent) -> Result<String, SecurityError> {
        let body = serde_json::to_string(event)
            .map_err(|e| SecurityError::Transform(format!("event serialization failed: {e}")))?;
        let stamp = chrono::Local::now().format("%b %e %H:%M:%S");
        Ok(format!("<{}>{stamp} {TAG}: {body}", self.priority))
    }
}

#[async_trait]
impl AuditDestination for SyslogDestination {
    fn kind(&self) -> &'static str {
        "syslog"
    }

    async fn write_event(&mut self, event: &SecurityEvent) -> Result<(), SecurityError> {
        let message = self.format_message(event)?;
        #[cfg(unix)]
        {
            self.socket
                .send(message.as_bytes())
                .map(|_| ())
                .map_err(|e| SecurityError::Network(format!("syslog send failed: {e}")))
        }
        #[cfg(not(unix))]
        {
            let _ = message;
            Ok(())
        }
    }
}
