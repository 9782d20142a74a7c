//! In-memory collaborators for engine tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use waymark_core::diff::StructuralDiff;
use waymark_core::source::{
    FileIdentityResolver, LocationStore, MarkerStore, OpenDocuments, RevisionSource,
};
use waymark_core::types::{
    CommitHash, CommitKey, FileStream, Marker, MarkerLocation, MarkerLocationsById,
};
use waymark_core::{Collaborators, EngineOptions, Error, LocationEngine, Result};

pub fn loc(ls: u32, cs: u32, le: u32, ce: u32) -> MarkerLocation {
    MarkerLocation::new(ls, cs, le, ce)
}

/// Linear commit history of a single repository.
#[derive(Default)]
struct History {
    commits: Vec<(CommitHash, HashMap<PathBuf, String>)>,
    unreachable: HashSet<CommitHash>,
}

impl History {
    fn index(&self, commit: &str) -> Option<usize> {
        self.commits.iter().position(|(c, _)| c == commit)
    }

    fn content(&self, idx: usize, path: &Path) -> Option<&String> {
        self.commits.get(idx).and_then(|(_, files)| files.get(path))
    }

    fn changed_at(&self, idx: usize, path: &Path) -> bool {
        let now = self.content(idx, path);
        let before = idx.checked_sub(1).and_then(|i| self.content(i, path));
        now.is_some() && now != before
    }
}

pub struct FakeRepo {
    root: PathBuf,
    history: Mutex<History>,
    pub diff_calls: AtomicUsize,
    broken: AtomicBool,
}

impl FakeRepo {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            history: Mutex::new(History::default()),
            diff_calls: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
        }
    }

    /// Makes repository root lookups fail instead of answering.
    pub fn break_root_lookup(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Records a commit that sets `path` to `text`, keeping every other file.
    pub fn commit(&self, hash: &str, path: &Path, text: &str) {
        let mut history = self.history.lock().unwrap();
        let mut files = history.commits.last().map(|(_, f)| f.clone()).unwrap_or_default();
        files.insert(path.to_path_buf(), text.to_owned());
        history.commits.push((hash.to_owned(), files));
    }

    /// Makes `hash` unreachable: no content, no diffs, no history through it.
    pub fn lose(&self, hash: &str) {
        self.history.lock().unwrap().unreachable.insert(hash.to_owned());
    }

    pub fn diffs(&self) -> usize {
        self.diff_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RevisionSource for FakeRepo {
    async fn repo_root(&self, path: &Path) -> Result<Option<PathBuf>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Revision("repository is unreadable".to_owned()));
        }
        Ok(path.starts_with(&self.root).then(|| self.root.clone()))
    }

    async fn current_revision(&self, path: &Path) -> Result<Option<CommitHash>> {
        let history = self.history.lock().unwrap();
        let last = history.commits.len().checked_sub(1);
        let Some(last) = last.filter(|&i| history.content(i, path).is_some()) else {
            return Ok(None);
        };
        Ok((0..=last)
            .rev()
            .find(|&i| history.changed_at(i, path))
            .map(|i| history.commits[i].0.clone()))
    }

    async fn file_content_at(&self, path: &Path, commit: &str) -> Result<Option<String>> {
        let history = self.history.lock().unwrap();
        if history.unreachable.contains(commit) {
            return Ok(None);
        }
        Ok(history.index(commit).and_then(|i| history.content(i, path)).cloned())
    }

    async fn diff_between(
        &self,
        from: &str,
        to: &str,
        path: &Path,
    ) -> Result<Option<StructuralDiff>> {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        let history = self.history.lock().unwrap();
        if history.unreachable.contains(from) || history.unreachable.contains(to) {
            return Ok(None);
        }
        let old = history.index(from).and_then(|i| history.content(i, path));
        let new = history.index(to).and_then(|i| history.content(i, path));
        Ok(match (old, new) {
            (Some(old), Some(new)) => Some(StructuralDiff::between(old, new)),
            _ => None,
        })
    }

    async fn file_history(
        &self,
        path: &Path,
        from: &str,
        to: &str,
    ) -> Result<Option<Vec<CommitHash>>> {
        let history = self.history.lock().unwrap();
        if history.unreachable.contains(from) {
            return Ok(None);
        }
        let (Some(from), Some(to)) = (history.index(from), history.index(to)) else {
            return Ok(None);
        };
        Ok(Some(
            (from + 1..=to)
                .filter(|&i| history.changed_at(i, path))
                .map(|i| history.commits[i].0.clone())
                .collect(),
        ))
    }
}

/// Durable store, marker store and file resolver in one, with call counters.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<CommitKey, MarkerLocationsById>>,
    markers: Mutex<BTreeMap<String, Marker>>,
    files: Mutex<Vec<(PathBuf, FileStream)>>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
}

impl MemoryStore {
    pub fn add_file(&self, root: &Path, rel_path: &str) -> FileStream {
        let mut files = self.files.lock().unwrap();
        let stream = FileStream {
            id: format!("file-{}", files.len() + 1),
            repo_root: root.to_path_buf(),
            rel_path: rel_path.to_owned(),
        };
        files.push((root.join(rel_path), stream.clone()));
        stream
    }

    pub fn add_marker(
        &self,
        id: &str,
        file_id: &str,
        commit: Option<&str>,
        location: Option<MarkerLocation>,
    ) -> Marker {
        let marker = Marker {
            id: id.to_owned(),
            file_id: file_id.to_owned(),
            commit_hash_when_created: commit.map(str::to_owned),
            location_when_created: location,
        };
        self.markers.lock().unwrap().insert(id.to_owned(), marker.clone());
        marker
    }

    pub fn marker_by_id(&self, id: &str) -> Marker {
        self.markers.lock().unwrap()[id].clone()
    }

    pub fn remove_marker(&self, id: &str) {
        self.markers.lock().unwrap().remove(id);
    }

    pub fn record(&self, file_id: &str, commit: &str) -> MarkerLocationsById {
        self.records
            .lock()
            .unwrap()
            .get(&CommitKey::new(file_id, commit))
            .cloned()
            .unwrap_or_default()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn get(&self, key: &CommitKey) -> Result<MarkerLocationsById> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    async fn put(&self, key: &CommitKey, locations: &MarkerLocationsById) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        records.entry(key.clone()).or_default().extend(locations.clone());
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for MemoryStore {
    async fn markers_for_file(&self, file_id: &str) -> Result<Vec<Marker>> {
        Ok(self
            .markers
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.file_id == file_id)
            .cloned()
            .collect())
    }

    async fn marker(&self, id: &str) -> Result<Option<Marker>> {
        Ok(self.markers.lock().unwrap().get(id).cloned())
    }

    async fn update_marker_commit_hash(&self, id: &str, commit: &str) -> Result<()> {
        if let Some(m) = self.markers.lock().unwrap().get_mut(id) {
            m.commit_hash_when_created = Some(commit.to_owned());
        }
        Ok(())
    }
}

#[async_trait]
impl FileIdentityResolver for MemoryStore {
    async fn file_id_for_path(&self, path: &Path) -> Result<Option<String>> {
        let files = self.files.lock().unwrap();
        Ok(files.iter().find(|(p, _)| p == path).map(|(_, s)| s.id.clone()))
    }

    async fn file_stream(&self, file_id: &str) -> Result<Option<FileStream>> {
        let files = self.files.lock().unwrap();
        Ok(files.iter().find(|(_, s)| s.id == file_id).map(|(_, s)| s.clone()))
    }
}

/// A repository root in a temp dir, wired to a fresh engine.
pub struct Harness {
    pub dir: TempDir,
    pub repo: Arc<FakeRepo>,
    pub store: Arc<MemoryStore>,
    pub docs: Arc<OpenDocuments>,
    pub engine: LocationEngine,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(FakeRepo::new(dir.path().to_path_buf()));
        let store = Arc::new(MemoryStore::default());
        let docs = Arc::new(OpenDocuments::new());
        let engine = LocationEngine::new(
            Collaborators {
                revisions: repo.clone(),
                files: store.clone(),
                markers: store.clone(),
                locations: store.clone(),
                buffers: docs.clone(),
            },
            EngineOptions::default(),
        );
        Self { dir, repo, store, docs, engine }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A second engine over the same collaborators (cold caches).
    pub fn fresh_engine(&self) -> LocationEngine {
        LocationEngine::new(
            Collaborators {
                revisions: self.repo.clone(),
                files: self.store.clone(),
                markers: self.store.clone(),
                locations: self.store.clone(),
                buffers: self.docs.clone(),
            },
            EngineOptions::default(),
        )
    }
}
