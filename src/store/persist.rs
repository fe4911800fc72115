use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PersistenceError;

/// Persistence hook invoked synchronously after every store mutation.
///
/// The in-memory store stays authoritative: a failed write is reported to
/// the caller but never rolled back.
pub trait RecordSink<T>: Send {
    fn persist(&self, records: &[T]) -> Result<(), PersistenceError>;
}

/// Writes each store as a single JSON array file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored array. A missing file is an empty store.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>, PersistenceError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw).map_err(|source| PersistenceError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl<T: Serialize> RecordSink<T> for JsonFileSink {
    fn persist(&self, records: &[T]) -> Result<(), PersistenceError> {
        let encoded =
            serde_json::to_vec_pretty(records).map_err(|source| PersistenceError::Encode {
                path: self.path.clone(),
                source,
            })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        // Stage next to the target, then rename over it
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, encoded).map_err(|e| self.io_error(e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!(
            "Persisted {} records to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory sink, used when persistence is disabled and in tests.
#[derive(Debug)]
pub struct MemorySink<T> {
    records: Arc<Mutex<Vec<T>>>,
    writes: Arc<Mutex<usize>>,
    fail: bool,
}

impl<T> Clone for MemorySink<T> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            writes: self.writes.clone(),
            fail: self.fail,
        }
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(Mutex::new(0)),
            fail: false,
        }
    }
}

impl<T: Clone> MemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails with an I/O error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn writes(&self) -> usize {
        self.writes.lock().map(|writes| *writes).unwrap_or_default()
    }
}

impl<T: Clone + Send> RecordSink<T> for MemorySink<T> {
    fn persist(&self, records: &[T]) -> Result<(), PersistenceError> {
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        if self.fail {
            return Err(PersistenceError::Io {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::other("sink configured to fail"),
            });
        }
        if let Ok(mut stored) = self.records.lock() {
            *stored = records.to_vec();
        }
        Ok(())
    }
}
