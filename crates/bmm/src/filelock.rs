//! Cross-process access to the YAML-backed stores.
//!
//! Writers hold an exclusive advisory lock on `<file>.lock` while they
//! re-read, modify and replace the data file. Replacement goes through a
//! sibling temp file and a rename, so a reader never sees a partial
//! document and needs no lock.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::error::{BmmError, Result};

/// Exclusive lock on a data file, released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    _file: File,
}

impl FileLock {
    /// Block until no other holder, in this or any other process, has the
    /// lock for `data_path`.
    pub(crate) async fn exclusive(data_path: &Path) -> Result<Self> {
        let lock_path = sibling(data_path, ".lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let waited = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&waited)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!(path = %lock_path.display(), "Store lock acquired");
        Ok(Self { _file: file })
    }
}

/// Parse a YAML file; a missing file yields `T::default()`.
pub(crate) async fn read_yaml<T>(path: &Path, err: fn(String) -> BmmError) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path).await {
        Ok(contents) => serde_yaml::from_str(&contents)
            .map_err(|e| err(format!("Failed to parse {}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Replace `path` with the YAML form of `value` through a rename.
pub(crate) async fn write_yaml<T>(path: &Path, value: &T, err: fn(String) -> BmmError) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let contents = serde_yaml::to_string(value)
        .map_err(|e| err(format!("Failed to serialize {}: {e}", path.display())))?;

    let staged = sibling(path, ".tmp");
    fs::write(&staged, contents).await?;
    fs::rename(&staged, path).await?;
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
