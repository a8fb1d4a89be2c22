// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;

use crate::config::{AuditDestinationConfig, AuditDestinationType};
use crate::domain::error::SecurityError;
use crate::domain::event::SecurityEvent;

use super::file::FileDestination;
use super::rotating::RotatingFileDestination;
use super::syslog::SyslogDestination;
use super::webhook::WebhookDestination;

/// One fan-out target of the audit pipeline.
///
/// Write errors are absorbed by the worker (logged and counted); only
/// construction and `close` errors propagate.
#[async_trait]
pub trait AuditDestination: Send {
    fn kind(&self) -> &'static str;

    async fn write_event(&mut self, event: &SecurityEvent) -> Result<(), SecurityError>;

    async fn close(&mut self) -> Result<(), SecurityError> {
        Ok(())
    }
}

/// Construct every configured destination, failing closed on the first
/// invalid one.
pub fn build_destinations(
    configs: &[AuditDestinationConfig],
) -> Result<Vec<Box<dyn AuditDestination>>, SecurityError> {
    let mut out: Vec<Box<dyn AuditDestination>> = Vec::with_capacity(configs.len());
    for config in configs {
        config.validate()?;
        let dest: Box<dyn AuditDestination> = match config.destination_type {
            AuditDestinationType::File => Box::new(FileDestination::open(config)?),
            AuditDestinationType::RotatingFile => Box::new(RotatingFileDestination::open(config)?),
            AuditDestinationType::Syslog => Box::new(SyslogDestination::connect(config)?),
            AuditDestinationType::Webhook => Box::new(WebhookDestination::new(config)?),
        };
        out.push(dest);
    }
    Ok(out)
}
