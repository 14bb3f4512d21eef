use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::domain::{InterviewRecord, PipelineState};

/// A JSON document the pipeline keeps on disk.
pub trait Document: Serialize + DeserializeOwned + Default + Clone + Send + 'static {
    /// Parse raw file contents. The flag reports that an older layout was upgraded.
    fn decode(raw: &str) -> Result<(Self, bool), serde_json::Error> {
        serde_json::from_str(raw).map(|document| (document, false))
    }
}

impl Document for PipelineState {
    fn decode(raw: &str) -> Result<(Self, bool), serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.is_array() {
            let interview_records: Vec<InterviewRecord> = serde_json::from_value(value)?;
            return Ok((
                Self {
                    interview_records,
                    ..Self::default()
                },
                true,
            ));
        }
        serde_json::from_value(value).map(|state| (state, false))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a valid document: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a mutation whose in-memory effect stands even when the disk write failed.
#[must_use]
#[derive(Debug)]
pub struct Committed<R> {
    pub value: R,
    pub persisted: Result<(), StoreError>,
}

/// Whole-document JSON store with an in-memory copy and atomic replace-on-save.
///
/// Readers and writers go through the in-memory copy under a short synchronous lock.
/// Saves are serialized by an async gate and always write the snapshot taken after the
/// gate is held, so the last save to finish reflects the latest state.
#[derive(Debug)]
pub struct JsonDocumentStore<T> {
    path: Option<PathBuf>,
    cache: Mutex<T>,
    gate: tokio::sync::Mutex<()>,
}

impl<T: Document> JsonDocumentStore<T> {
    /// Load the document at `path`. A missing file starts empty; an older layout is
    /// upgraded and saved back immediately; an unparseable file is refused.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let (document, upgraded) = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => T::decode(&raw).map_err(|source| {
                error!(path = %path.display(), error = %source, "document failed to parse");
                StoreError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no document on disk; starting empty");
                (T::default(), false)
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };

        let store = Self {
            path: Some(path),
            cache: Mutex::new(document),
            gate: tokio::sync::Mutex::new(()),
        };

        if upgraded {
            warn!(path = %store.display_path(), "upgrading document from legacy layout");
            store.save().await?;
        }

        Ok(store)
    }

    /// Store that never touches disk.
    pub fn in_memory(document: T) -> Self {
        Self {
            path: None,
            cache: Mutex::new(document),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutate the in-memory copy without saving.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn snapshot(&self) -> T {
        self.read(T::clone)
    }

    /// Write the current in-memory copy to disk.
    pub async fn save(&self) -> Result<(), StoreError> {
        let _gate = self.gate.lock().await;
        let snapshot = self.snapshot();
        self.write(&snapshot).await.map_err(|err| {
            error!(path = %self.display_path(), error = %err, "document save failed");
            err
        })
    }

    /// Mutate and save as one step.
    pub async fn transact<R>(&self, f: impl FnOnce(&mut T) -> R) -> Committed<R> {
        let value = self.update(f);
        let persisted = self.save().await;
        Committed { value, persisted }
    }

    async fn write(&self, snapshot: &T) -> Result<(), StoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let payload = serde_json::to_vec_pretty(snapshot).map_err(StoreError::Encode)?;
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(source) = tokio::fs::write(&temp_path, payload).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Write {
                path: temp_path,
                source,
            });
        }

        if let Err(source) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Write {
                path: path.clone(),
                source,
            });
        }

        debug!(path = %path.display(), "document saved");
        Ok(())
    }

    fn display_path(&self) -> String {
        self.path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }
}
