// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{AuditDestinationConfig, AuditFormat};
use crate::domain::error::SecurityError;
use crate::domain::event::SecurityEvent;

use super::destination::AuditDestination;

/// Append-only audit log file. The file is created `0600`; missing parent
/// directories are created `0755`.
pub struct FileDestination {
    path: PathBuf,
    file: File,
    format: AuditFormat,
}

impl FileDestination {
    pub fn open(config: &AuditDestinationConfig) -> Result<Self, SecurityError> {
        let raw = config.path.as_deref().unwrap_or_default();
        let path = expand_tilde(raw)?;
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file,
            format: config.format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Expand a leading `~` against the OS home directory.
pub fn expand_tilde(raw: &str) -> Result<PathBuf, SecurityError> {
    if raw == "~" || raw.starts_with("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SecurityError::Config("home directory unavailable".into()))?;
        if raw == "~" {
            return Ok(home);
        }
        return Ok(home.join(&raw[2..]));
    }
    Ok(PathBuf::from(raw))
}

/// Open an audit file for appending, creating parents as needed.
pub fn open_append(path: &Path) -> Result<File, SecurityError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_parents(parent)?;
        }
    }
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .map_err(|e| SecurityError::Config(format!("cannot open audit log {}: {e}", path.display())))
}

fn create_parents(parent: &Path) -> Result<(), SecurityError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)
            .map_err(|e| {
                SecurityError::Config(format!("cannot create {}: {e}", parent.display()))
            })?;
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            SecurityError::Config(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    Ok(())
}

/// Render an event in the destination's configured format, newline-terminated.
pub fn render_event(event: &SecurityEvent, format: AuditFormat) -> Result<Vec<u8>, SecurityError> {
    let mut line = match format {
        AuditFormat::Json => serde_json::to_vec(event)
            .map_err(|e| SecurityError::Transform(format!("event serialization failed: {e}")))?,
        AuditFormat::Text => event.to_text_line().into_bytes(),
    };
    line.push(b'\n');
    Ok(line)
}

#[async_trait]
impl AuditDestination for FileDestination {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn write_event(&mut self, event: &SecurityEvent) -> Result<(), SecurityError> {
        let line = render_event(event, self.format)?;
        self.file
            .write_all(&line)
            .map_err(|e| SecurityError::Network(format!("audit write failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), SecurityError> {
        self.file
            .flush()
            .map_err(|e| SecurityError::Network(format!("audit flush failed: {e}")))
    }
}
