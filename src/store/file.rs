//! JSON file token store with atomic replace.

use super::{decode_record, TokenSet, TokenStore};
use crate::error::StoreError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Persists the token set as a single JSON document.
///
/// Writes go to a sibling temp file that is then renamed over the target, so a crash
/// mid-write leaves either the old record or the new one.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tokens".to_string());
        self.path.with_file_name(format!(
            "{}.{}.{}.tmp",
            name,
            std::process::id(),
            Uuid::new_v4().simple()
        ))
    }
}

impl TokenStore for FileTokenStore {
    fn set(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let json =
            serde_json::to_vec_pretty(tokens).map_err(|e| StoreError::StoreFailed(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::StoreFailed(e.to_string()))?;
        }

        let tmp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            restrict_permissions(&tmp)?;
            fs::rename(&tmp, &self.path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::StoreFailed(format!("{}: {}", self.path.display(), e))
        })
    }

    fn get(&self) -> Option<TokenSet> {
        match fs::read(&self.path) {
            Ok(bytes) => decode_record(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Could not read token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::DeleteFailed(e.to_string())),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
