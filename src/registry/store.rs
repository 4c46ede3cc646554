//! Registry persistence
//!
//! A registry file is a JSON array of mapping records. Writes go to a temp
//! file in the same directory which then replaces the target, so a crash
//! mid-write leaves the previous file intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::migration::migrate_records;
use crate::error::{Result, SessionError};
use crate::types::SurfaceSessionMapping;

/// Storage abstraction for a registry's routing table
pub trait MappingStore: Send + Sync {
    /// Read every persisted mapping
    ///
    /// # Errors
    /// Returns error if the storage exists but cannot be read or decoded
    fn load(&self) -> Result<Vec<SurfaceSessionMapping>>;

    /// Replace the persisted table with `mappings`
    ///
    /// # Errors
    /// Returns error if the table could not be written
    fn save(&self, mappings: &[SurfaceSessionMapping]) -> Result<()>;
}

/// File-backed store, one JSON file per surface
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    surface: String,
}

impl JsonFileStore {
    /// Store at `path` for records owned by `surface`
    pub fn new(path: impl Into<PathBuf>, surface: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            surface: surface.into(),
        }
    }

    /// File backing this store
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MappingStore for JsonFileStore {
    fn load(&self) -> Result<Vec<SurfaceSessionMapping>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
        Ok(migrate_records(records, &self.surface))
    }

    fn save(&self, mappings: &[SurfaceSessionMapping]) -> Result<()> {
        let content = serde_json::to_string_pretty(mappings)?;
        write_atomic(&self.path, &content)
    }
}

/// Write `content` to `path` via tempfile + rename
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    // Same directory, so the rename cannot cross filesystems
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(path).map_err(|e| {
        SessionError::persistence(format!("failed to replace {}: {}", path.display(), e.error))
    })?;

    Ok(())
}
