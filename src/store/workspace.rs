use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sources::{OriginKind, SourceDescriptor};
use crate::types::AppResult;

const SESSION_PREFIX: &str = "session-";

/// Per-request directory holding relational stores and scratch files.
///
/// The directory is removed when the workspace is dropped, so every exit path
/// of a session cleans up after itself.
#[derive(Debug)]
pub struct SessionWorkspace {
    id: Uuid,
    dir: TempDir,
}

impl SessionWorkspace {
    pub fn create(root: &Path) -> AppResult<Self> {
        fs::create_dir_all(root)?;
        let id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", SESSION_PREFIX, id))
            .tempdir_in(root)?;
        debug!(session = %id, dir = %dir.path().display(), "Created session workspace");
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `temp_<base>.db` for uploads, `<base>.db` for everything else
    pub fn store_path(&self, descriptor: &SourceDescriptor) -> PathBuf {
        self.numbered_store_path(descriptor, 1)
    }

    /// Like [`store_path`](Self::store_path), with `-<n>` before the extension for `n > 1`.
    ///
    /// Distinct base names can collide once made path-safe; callers pick the
    /// next number so each store still holds a single table.
    pub fn numbered_store_path(&self, descriptor: &SourceDescriptor, n: usize) -> PathBuf {
        // The table keeps the raw base name; only the file name is made path-safe
        let mut base: String = descriptor
            .base_name()
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                other => other,
            })
            .collect();
        if n > 1 {
            base = format!("{}-{}", base, n);
        }
        let file_name = match descriptor.origin {
            OriginKind::Upload => format!("temp_{}.db", base),
            _ => format!("{}.db", base),
        };
        self.dir.path().join(file_name)
    }

    /// Remove the directory now and report failures instead of ignoring them.
    pub fn close(self) -> AppResult<()> {
        let id = self.id;
        self.dir.close()?;
        debug!(session = %id, "Removed session workspace");
        Ok(())
    }
}

/// Delete session directories left behind by a previous run.
pub fn sweep_stale(root: &Path) -> AppResult<usize> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let is_session = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(SESSION_PREFIX))
            .unwrap_or(false);
        if !is_session || !entry.file_type()?.is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(dir = %entry.path().display(), error = %e, "Failed to remove stale session"),
        }
    }

    if removed > 0 {
        info!(root = %root.display(), removed, "Swept stale session workspaces");
    }
    Ok(removed)
}
