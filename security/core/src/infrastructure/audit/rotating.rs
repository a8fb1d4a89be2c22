// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Size- and age-based log rotation. Rotation renames `audit.log` to
// `audit.2026-08-01-142233.log`, optionally gzips the renamed file, reopens
// the base path, and sweeps rotated files past the retention window by
// mtime. The sweep runs on open and after every rotation.

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::{AuditDestinationConfig, AuditFormat};
use crate::domain::error::SecurityError;
use crate::domain::event::SecurityEvent;

use super::destination::AuditDestination;
use super::file::{expand_tilde, open_append, render_event};

const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;

pub struct RotatingFileDestination {
    path: PathBuf,
    file: File,
    format: AuditFormat,
    max_size: u64,
    max_age: Option<Duration>,
    max_backups: Option<u32>,
    rotate_daily: bool,
    compress: bool,
    current_size: u64,
    opened_on: NaiveDate,
}

impl RotatingFileDestination {
    pub fn open(config: &AuditDestinationConfig) -> Result<Self, SecurityError> {
        let raw = config.path.as_deref().unwrap_or_default();
        let path = expand_tilde(raw)?;
        let file = open_append(&path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        let dest = Self {
            path,
            file,
            format: config.format,
            max_size: config.max_size.unwrap_or(DEFAULT_MAX_SIZE),
            max_age: config.max_age,
            max_backups: config.max_backups,
            rotate_daily: config.rotate_daily,
            compress: config.compress,
            current_size,
            opened_on: Local::now().date_naive(),
        };
        dest.sweep_expired();
        Ok(dest)
    }

    fn should_rotate(&self, incoming: u64) -> bool {
        if self.current_size + incoming >= self.max_size && self.current_size > 0 {
            return true;
        }
        self.rotate_daily && Local::now().date_naive() != self.opened_on
    }

    fn rotate(&mut self) -> Result<(), SecurityError> {
        self.file
            .flush()
            .map_err(|e| SecurityError::Network(format!("flush before rotation failed: {e}")))?;

        let rotated = self.rotated_name();
        std::fs::rename(&self.path, &rotated).map_err(|e| {
            SecurityError::Network(format!("rotation rename to {} failed: {e}", rotated.display()))
        })?;

        if self.compress {
            if let Err(e) = gzip_file(&rotated) {
                // The uncompressed rotated file stays behind; keep serving.
                tracing::warn!(file = %rotated.display(), error = %e, "audit log compression failed");
            }
        }

        self.file = open_append(&self.path)?;
        self.current_size = 0;
        self.opened_on = Local::now().date_naive();
        self.sweep_expired();
        Ok(())
    }

    /// `base.ext` -> `base.YYYY-MM-DD-HHMMSS.ext`
    fn rotated_name(&self) -> PathBuf {
        let now = Local::now();
        let stamp = format!(
            "{:04}-{:02}-{:02}-{}",
            now.year(),
            now.month(),
            now.day(),
            now.format("%H%M%S")
        );
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audit".to_string());
        let name = match self.path.extension() {
            Some(ext) => format!("{stem}.{stamp}.{}", ext.to_string_lossy()),
            None => format!("{stem}.{stamp}"),
        };
        self.path.with_file_name(name)
    }

    /// Remove rotated siblings past the retention window by mtime, then
    /// apply the backup-count cap, oldest first.
    fn sweep_expired(&self) {
        if self.max_age.is_none() && self.max_backups.is_none() {
            return;
        }
        let Some(parent) = self.path.parent() else { return };
        let Some(stem) = self.path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            return;
        };

        let entries = match std::fs::read_dir(parent) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut rotated: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path == self.path {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&format!("{stem}.")) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(mtime) = meta.modified() else { continue };
            rotated.push((path, mtime));
        }

        let mut doomed: Vec<PathBuf> = Vec::new();
        if let Some(max_age) = self.max_age {
            let cutoff = SystemTime::now() - max_age;
            rotated.retain(|(path, mtime)| {
                if *mtime < cutoff {
                    doomed.push(path.clone());
                    false
                } else {
                    true
                }
            });
        }
        if let Some(max_backups) = self.max_backups {
            if rotated.len() > max_backups as usize {
                rotated.sort_by_key(|(_, mtime)| *mtime);
                let excess = rotated.len() - max_backups as usize;
                doomed.extend(rotated.drain(..excess).map(|(path, _)| path));
            }
        }
        for path in doomed {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(file = %path.display(), error = %e, "retention sweep failed");
            }
        }
    }
}

fn gzip_file(path: &Path) -> std::io::Result<()> {
    let input = std::fs::read(path)?;
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    let out = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?.sync_all()?;
    std::fs::remove_file(path)
}

#[async_trait]
impl AuditDestination for RotatingFileDestination {
    fn kind(&self) -> &'static str {
        "rotating-file"
    }

    async fn write_event(&mut self, event: &SecurityEvent) -> Result<(), SecurityError> {
        let line = render_event(event, self.format)?;
        if self.should_rotate(line.len() as u64) {
            self.rotate()?;
        }
        self.file
            .write_all(&line)
            .map_err(|e| SecurityError::Network(format!("audit write failed: {e}")))?;
        self.current_size += line.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SecurityError> {
        self.file
            .flush()
            .map_err(|e| SecurityError::Network(format!("audit flush failed: {e}")))
    }
}
