// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! TOCTOU-hardened file primitives.
//!
//! Writes go through a same-directory temp file whose permissions are
//! verified on the open descriptor (`fstat`, never the path) before any
//! bytes land, then fsynced and renamed over the destination. A reader
//! racing the writer sees either the old file or the complete new one.
//! Reads can refuse to traverse a final symlink (`O_NOFOLLOW`) and validate
//! file type and size on the descriptor before touching content.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::domain::error::SecurityError;

/// How widely a file's mode exposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionClass {
    /// `0?00` — owner-only access.
    OwnerOnly,
    /// Group bits set, world bits clear.
    GroupShared,
    /// Any world bit set.
    WorldAccessible,
}

#[cfg(unix)]
pub fn classify_mode(mode: u32) -> PermissionClass {
    if mode & 0o007 != 0 {
        PermissionClass::WorldAccessible
    } else if mode & 0o070 != 0 {
        PermissionClass::GroupShared
    } else {
        PermissionClass::OwnerOnly
    }
}

/// Classify an existing file by its current mode bits.
#[cfg(unix)]
pub fn classify_file(path: &Path) -> Result<PermissionClass, SecurityError> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path)
        .map_err(|e| SecurityError::NotFound(format!("{}: {e}", path.display())))?;
    Ok(classify_mode(meta.mode()))
}

/// Options for [`read_file_secure`].
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Refuse to open when the final path component is a symlink.
    pub follow_symlinks: bool,
    /// Reject files larger than this many bytes (0 = unlimited).
    pub max_size: u64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            max_size: 0,
        }
    }
}

/// Open, fd-validate, and read a regular file.
pub fn read_file_secure(path: &Path, options: &ReadOptions) -> Result<Vec<u8>, SecurityError> {
    let mut open = std::fs::OpenOptions::new();
    open.read(true);
    #[cfg(unix)]
    if !options.follow_symlinks {
        use std::os::unix::fs::OpenOptionsExt;
        open.custom_flags(libc::O_NOFOLLOW);
    }

    let mut file = open.open(path).map_err(|e| {
        #[cfg(unix)]
        if e.raw_os_error() == Some(libc::ELOOP) {
            return SecurityError::PathInjection(format!(
                "{} is a symlink and symlink following is disabled",
                path.display()
            ));
        }
        SecurityError::NotFound(format!("{}: {e}", path.display()))
    })?;

    // Validate on the descriptor: whatever the path now points at is
    // irrelevant, this metadata belongs to the file we opened.
    let meta = file
        .metadata()
        .map_err(|e| SecurityError::Validation(format!("fstat failed: {e}")))?;
    if !meta.is_file() {
        return Err(SecurityError::Validation(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if options.max_size > 0 && meta.len() > options.max_size {
        return Err(SecurityError::Validation(format!(
            "{} is {} bytes, limit is {}",
            path.display(),
            meta.len(),
            options.max_size
        )));
    }

    let mut buf = Vec::with_capacity(meta.len() as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| SecurityError::Validation(format!("read failed: {e}")))?;
    Ok(buf)
}

/// Atomically write `content` to `path` with exactly `mode`.
///
/// Sequence: temp file in the destination directory, chmod `0600`,
/// fd-verified permissions, write, fsync, chmod to the target mode, rename.
/// No intermediate state is observable at `path`.
pub fn write_file_atomic(path: &Path, content: &[u8], mode: u32) -> Result<(), SecurityError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            SecurityError::Validation(format!("{} has no parent directory", path.display()))
        })?;

    let temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| SecurityError::Validation(format!("temp file in {}: {e}", parent.display())))?;

    restrict_then_verify(temp.as_file())?;

    temp.as_file()
        .write_all(content)
        .map_err(|e| SecurityError::Validation(format!("write failed: {e}")))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| SecurityError::Validation(format!("fsync failed: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))
            .map_err(|e| SecurityError::Validation(format!("chmod failed: {e}")))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp.persist(path)
        .map_err(|e| SecurityError::Validation(format!("rename to {}: {e}", path.display())))?;
    Ok(())
}

/// Clamp the temp file to `0600` and confirm it via `fstat` on the open
/// descriptor before a single content byte is written.
fn restrict_then_verify(file: &File) -> Result<(), SecurityError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        use std::os::unix::fs::PermissionsExt;

        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| SecurityError::Validation(format!("chmod 0600 failed: {e}")))?;
        let meta = file
            .metadata()
            .map_err(|e| SecurityError::Validation(format!("fstat failed: {e}")))?;
        if meta.mode() & 0o777 != 0o600 {
            return Err(SecurityError::Validation(format!(
                "temp file mode is {:o} after chmod, refusing to write",
                meta.mode() & 0o777
            )));
        }
    }
    #[cfg(not(unix))]
    let _ = file;
    Ok(())
}
