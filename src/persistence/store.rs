//! File-backed task document store.
//!
//! Each task lives in its own directory under `task_dir`:
//!
//! - `task_specs.json`: operator input, never written by the pipeline.
//! - `task_specs_processed.json`: pipeline output, rewritten after every
//!   merged stage.
//!
//! Saves are atomic (temp file + rename) and guarded by an optimistic
//! version check: a save only succeeds when the stored
//! `pipeline.version` still equals the version the caller loaded. Within one
//! process a task can additionally be leased by a single session at a time.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::models::document::TaskSpecs;
use crate::{AppError, Result};

/// File name of the operator-supplied document.
pub const INPUT_FILE: &str = "task_specs.json";
/// File name of the pipeline-maintained document.
pub const PROCESSED_FILE: &str = "task_specs_processed.json";

type LeaseSet = Arc<Mutex<HashSet<String>>>;

/// Task document storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    leases: LeaseSet,
}

/// Exclusive in-process claim on a task; released on drop.
#[derive(Debug)]
pub struct DocumentLease {
    task: String,
    leases: LeaseSet,
}

impl Drop for DocumentLease {
    fn drop(&mut self) {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task);
        debug!(task = %self.task, "document lease released");
    }
}

impl DocumentStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            leases: Arc::default(),
        }
    }

    /// Directory holding `task`'s documents.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if `task` is not a plain name.
    pub fn task_dir(&self, task: &str) -> Result<PathBuf> {
        validate_task_name(task)?;
        Ok(self.root.join(task))
    }

    /// Claim `task` for the calling session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if another session holds the lease.
    pub fn lease(&self, task: &str) -> Result<DocumentLease> {
        validate_task_name(task)?;
        let mut held = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(task.to_owned()) {
            return Err(AppError::Conflict(format!(
                "task '{task}' is in use by another session"
            )));
        }
        Ok(DocumentLease {
            task: task.to_owned(),
            leases: Arc::clone(&self.leases),
        })
    }

    /// Load the latest document for `task`: the processed document when one
    /// exists, otherwise the operator input.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if neither file exists or the file is
    /// malformed.
    pub async fn load(&self, task: &str) -> Result<TaskSpecs> {
        let dir = self.task_dir(task)?;
        let processed = dir.join(PROCESSED_FILE);
        if let Some(doc) = read_document(&processed).await? {
            debug!(task, version = doc.pipeline.version, "loaded processed document");
            return Ok(doc);
        }
        let input = dir.join(INPUT_FILE);
        match read_document(&input).await? {
            Some(doc) => {
                debug!(task, "loaded input document");
                Ok(doc)
            }
            None => Err(AppError::Persistence(format!(
                "no task document found for '{task}'"
            ))),
        }
    }

    /// Persist `doc` as the processed document for `task`.
    ///
    /// The document's `pipeline.version` is the version the caller loaded;
    /// the returned copy carries the new stored version.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the stored document changed since it
    /// was loaded, or `AppError::Persistence` if the write fails.
    pub async fn save(&self, task: &str, doc: &TaskSpecs) -> Result<TaskSpecs> {
        let dir = self.task_dir(task)?;
        let path = dir.join(PROCESSED_FILE);

        let stored_version = read_document(&path)
            .await?
            .map_or(0, |stored| stored.pipeline.version);
        let expected = doc.pipeline.version;
        if stored_version != expected {
            return Err(AppError::Conflict(format!(
                "task '{task}' changed on disk (expected version {expected}, found {stored_version})"
            )));
        }

        let mut next = doc.clone();
        next.pipeline.version = expected + 1;
        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|err| AppError::Persistence(format!("failed to serialise document: {err}")))?;

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes))
            .await
            .map_err(|err| AppError::Persistence(format!("write task panicked: {err}")))??;

        info!(task, version = next.pipeline.version, "task document persisted");
        Ok(next)
    }
}

fn validate_task_name(task: &str) -> Result<()> {
    let valid = !task.is_empty()
        && task
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::Persistence(format!("invalid task name '{task}'")))
    }
}

async fn read_document(path: &Path) -> Result<Option<TaskSpecs>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => TaskSpecs::from_json_str(&raw).map(Some).map_err(|err| {
            AppError::Persistence(format!("{}: {err}", path.display()))
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Persistence(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|err| AppError::Persistence(format!("failed to create temp file: {err}")))?;
    file.write_all(bytes)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|err| AppError::Persistence(format!("failed to write document: {err}")))?;
    file.persist(path)
        .map_err(|err| AppError::Persistence(format!("failed to replace document: {err}")))?;
    Ok(())
}
