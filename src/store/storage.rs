//! Durable homes for the store's persisted blob.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// A place the store can read its blob from and write it back to.
pub trait Storage: Send {
    /// Read the stored blob; `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<String>>;

    /// Replace the stored blob.
    fn save(&mut self, blob: &str) -> Result<()>;
}

//////////////////////////////////////////// FileStorage ///////////////////////////////////////////

/// A single JSON file.
///
/// Saves go through a sibling temporary file and a rename, so a crash mid-write leaves the
/// previous blob in place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage backed by the file at `path`.  Missing parent directories are created on save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this storage writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(
                format!("failed to read {}", self.path.display()),
                err,
            )),
        }
    }

    fn save(&mut self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                Error::io(format!("failed to create {}", parent.display()), err)
            })?;
        }
        let temp = self.temp_path();
        let write = |temp: &Path| -> std::io::Result<()> {
            let mut file = File::create(temp)?;
            file.write_all(blob.as_bytes())?;
            file.sync_all()
        };
        write(&temp)
            .map_err(|err| Error::io(format!("failed to write {}", temp.display()), err))?;
        fs::rename(&temp, &self.path).map_err(|err| {
            Error::io(format!("failed to replace {}", self.path.display()), err)
        })
    }
}

/////////////////////////////////////////// MemoryStorage //////////////////////////////////////////

/// An in-memory blob.
///
/// Clones share the same blob, so a test can hand one clone to a store and inspect or reload
/// through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blob: Arc<Mutex<Option<String>>>,
    fail_saves: Arc<Mutex<bool>>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `blob`.
    pub fn with_blob(blob: impl Into<String>) -> Self {
        let storage = Self::default();
        if let Ok(mut slot) = storage.blob.lock() {
            *slot = Some(blob.into());
        }
        storage
    }

    /// The current blob.
    pub fn blob(&self) -> Option<String> {
        self.blob.lock().ok().and_then(|blob| blob.clone())
    }

    /// Make every later save fail, as a full disk would.
    pub fn fail_saves(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_saves.lock() {
            *flag = fail;
        }
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.blob())
    }

    fn save(&mut self, blob: &str) -> Result<()> {
        if self.fail_saves.lock().map(|flag| *flag).unwrap_or(false) {
            return Err(Error::io(
                "memory storage refused the write",
                std::io::Error::other("saves disabled"),
            ));
        }
        let mut slot = self
            .blob
            .lock()
            .map_err(|_| Error::validation("memory storage lock poisoned", None))?;
        *slot = Some(blob.to_string());
        Ok(())
    }
}
