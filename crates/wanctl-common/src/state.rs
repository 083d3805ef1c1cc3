//! Persisted state files
//!
//! Writers hold an exclusive non-blocking `flock` on `<path>.lock`, write
//! `<path>.tmp`, fsync and rename over `path`. Readers never observe a
//! partially written file. A writer that cannot take the lock skips the save;
//! the next cycle writes again.
//!
//! Loading never fails the caller: a missing file is `None`, an undecodable
//! file is moved to `<path>.corrupt` and reported as `None`.

use crate::{WanctlError, WanctlResult};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Schema-versioned state record
///
/// Implementors give every field a serde default so records written by
/// older versions still decode after `migrate`.
pub trait VersionedState: Serialize + DeserializeOwned {
    /// Current schema version
    const VERSION: u32;

    /// Upgrade a raw record written by `from_version`
    fn migrate(value: Value, _from_version: u32) -> Value {
        value
    }
}

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct StateLock {
    _file: File,
}

/// A state file shared between processes
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Try to take the writer lock without blocking
    ///
    /// Returns `Ok(None)` when another writer holds it.
    pub fn try_lock(&self) -> WanctlResult<Option<StateLock>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.sibling(".lock"))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Some(StateLock { _file: file })),
            Err(errno) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err(errno) => Err(WanctlError::Io(errno.into())),
        }
    }

    /// Atomically write `state`
    ///
    /// `Ok(false)` means the lock was busy and nothing was written.
    pub fn save<T: VersionedState>(&self, state: &T) -> WanctlResult<bool> {
        let Some(_lock) = self.try_lock()? else {
            tracing::debug!(path = %self.path.display(), "state file locked by another writer, skipping save");
            return Ok(false);
        };

        let mut value = serde_json::to_value(state)?;
        if let Value::Object(map) = &mut value {
            map.insert("version".into(), Value::from(T::VERSION));
        }
        let content = serde_json::to_vec_pretty(&value)?;

        let tmp = self.sibling(".tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(true)
    }

    /// Read the raw JSON document
    pub fn load_value(&self) -> Option<Value> {
        let content = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read state file");
                return None;
            }
        };

        match serde_json::from_slice::<Value>(&content) {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => {
                self.quarantine("top-level value is not an object");
                None
            }
            Err(e) => {
                self.quarantine(&e.to_string());
                None
            }
        }
    }

    /// Read the raw JSON document of a file another process owns
    ///
    /// Unlike [`StateFile::load_value`] a corrupt file is left in place for
    /// its owner to deal with.
    pub fn peek_value(&self) -> Option<Value> {
        let content = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "state file not readable");
                return None;
            }
        };
        match serde_json::from_slice::<Value>(&content) {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "state file not decodable");
                None
            }
        }
    }

    /// Read, migrate and decode a typed record
    pub fn load<T: VersionedState>(&self) -> Option<T> {
        let value = self.load_value()?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        let value = if version < T::VERSION {
            tracing::info!(
                path = %self.path.display(),
                from = version,
                to = T::VERSION,
                "migrating state file"
            );
            T::migrate(value, version)
        } else {
            if version > T::VERSION {
                tracing::warn!(
                    path = %self.path.display(),
                    version,
                    supported = T::VERSION,
                    "state file written by newer version"
                );
            }
            value
        };

        match serde_json::from_value::<T>(value) {
            Ok(state) => Some(state),
            Err(e) => {
                self.quarantine(&e.to_string());
                None
            }
        }
    }

    /// Move a corrupt file aside for forensics
    fn quarantine(&self, reason: &str) {
        let backup = self.sibling(".corrupt");
        match fs::rename(&self.path, &backup) {
            Ok(()) => tracing::warn!(
                path = %self.path.display(),
                backup = %backup.display(),
                reason,
                "state file corrupt, backed up and using defaults"
            ),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                reason,
                error = %e,
                "state file corrupt and could not be backed up"
            ),
        }
    }
}
