//! Per-repository store of uncommitted marker locations.
//!
//! One JSON file per repository root. Writes only reach disk on
//! [`UncommittedStore::flush`], which replaces the file atomically.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::{MarkerId, UncommittedLocation};

const STORE_FILE: &str = "uncommitted.json";
const STORE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    version: u32,
    #[serde(default)]
    uncommitted_locations: BTreeMap<MarkerId, UncommittedLocation>,
}

/// Disk-backed marker id → [`UncommittedLocation`] collection.
#[derive(Debug)]
pub struct UncommittedStore {
    path: PathBuf,
    entries: BTreeMap<MarkerId, UncommittedLocation>,
}

impl UncommittedStore {
    /// Loads the store at `path`; a missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreFile>(&bytes)?.uncommitted_locations,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, id: &str) -> Option<&UncommittedLocation> {
        self.entries.get(id)
    }

    pub fn set(&mut self, id: impl Into<MarkerId>, value: UncommittedLocation) {
        self.entries.insert(id.into(), value);
    }

    pub fn delete(&mut self, id: &str) -> Option<UncommittedLocation> {
        self.entries.remove(id)
    }

    /// Snapshot of the current keys.
    pub fn keys(&self) -> Vec<MarkerId> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the store to disk. On return the data is durable: it is written
    /// to a sibling temp file, synced, then renamed over the store file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or any write fails.
    pub async fn flush(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(&StoreFile {
            version: STORE_VERSION,
            uncommitted_locations: self.entries.clone(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Hands out one lock-guarded [`UncommittedStore`] per repository root.
///
/// Holding the guard serialises save and flush passes within a repository;
/// stores of different repositories are independent.
#[derive(Debug)]
pub struct LocalStores {
    dir_name: String,
    open: Mutex<HashMap<PathBuf, Arc<Mutex<UncommittedStore>>>>,
}

impl LocalStores {
    /// `dir_name` is the directory under each repository root holding the store.
    pub fn new(dir_name: impl Into<String>) -> Self {
        Self { dir_name: dir_name.into(), open: Mutex::new(HashMap::new()) }
    }

    pub fn store_path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.dir_name).join(STORE_FILE)
    }

    /// Returns the store for `repo_root`, loading it from disk on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store file exists but cannot be loaded.
    pub async fn for_repo(&self, repo_root: &Path) -> Result<Arc<Mutex<UncommittedStore>>> {
        let mut open = self.open.lock().await;
        if let Some(store) = open.get(repo_root) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(Mutex::new(UncommittedStore::load(self.store_path(repo_root)).await?));
        open.insert(repo_root.to_path_buf(), Arc::clone(&store));
        Ok(store)
    }
}
