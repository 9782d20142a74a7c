//! Collaborator seams of the engine.
//!
//! Each trait is handed to [`crate::engine::LocationEngine`] at construction
//! as an `Arc<dyn …>`; nothing is looked up ambiently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::diff::StructuralDiff;
use crate::error::Result;
use crate::types::{CommitHash, CommitKey, FileId, FileStream, Marker, MarkerLocationsById};

/// Version-control access for a single file path.
///
/// `Ok(None)` means "does not exist" (no repository, untracked file,
/// unreachable commit); `Err` means the lookup itself failed.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    async fn repo_root(&self, path: &Path) -> Result<Option<PathBuf>>;

    /// Latest commit that changed the file, if the file is committed.
    async fn current_revision(&self, path: &Path) -> Result<Option<CommitHash>>;

    async fn file_content_at(&self, path: &Path, commit: &str) -> Result<Option<String>>;

    /// Diff of the file from `from` to `to`.
    async fn diff_between(&self, from: &str, to: &str, path: &Path)
        -> Result<Option<StructuralDiff>>;

    /// Commits after `from`, up to and including `to`, that changed the file,
    /// oldest first. `None` when history cannot be walked.
    async fn file_history(
        &self,
        _path: &Path,
        _from: &str,
        _to: &str,
    ) -> Result<Option<Vec<CommitHash>>> {
        Ok(None)
    }
}

/// Maps filesystem paths to stable file identifiers and back.
#[async_trait]
pub trait FileIdentityResolver: Send + Sync {
    async fn file_id_for_path(&self, path: &Path) -> Result<Option<FileId>>;

    async fn file_stream(&self, file_id: &str) -> Result<Option<FileStream>>;
}

/// Durable committed-location records, keyed by `(file_id, commit_hash)`.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Stored mapping for the key; empty if nothing was written yet.
    async fn get(&self, key: &CommitKey) -> Result<MarkerLocationsById>;

    /// Merges `locations` into the record: per marker id the new entry wins,
    /// markers absent from `locations` are left untouched.
    async fn put(&self, key: &CommitKey, locations: &MarkerLocationsById) -> Result<()>;
}

#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn markers_for_file(&self, file_id: &str) -> Result<Vec<Marker>>;

    async fn marker(&self, id: &str) -> Result<Option<Marker>>;

    async fn update_marker_commit_hash(&self, id: &str, commit: &str) -> Result<()>;
}

/// Live text of files open in an editor.
#[async_trait]
pub trait BufferSource: Send + Sync {
    async fn buffer_text(&self, path: &Path) -> Option<String>;
}

/// In-memory [`BufferSource`]: path → current text.
#[derive(Debug, Default)]
pub struct OpenDocuments {
    docs: RwLock<HashMap<PathBuf, String>>,
}

impl OpenDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.docs.write().await.insert(path.into(), text.into());
    }

    pub async fn close(&self, path: &Path) {
        self.docs.write().await.remove(path);
    }
}

#[async_trait]
impl BufferSource for OpenDocuments {
    async fn buffer_text(&self, path: &Path) -> Option<String> {
        self.docs.read().await.get(path).cloned()
    }
}
