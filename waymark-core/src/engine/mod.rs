//! Location resolution engine.
//!
//! Answers "where is marker M now" (committed locations carried through a
//! diff of the current revision against the live buffer, or uncommitted
//! locations carried from the buffer they were recorded against) and
//! "where was marker M at commit C" (see [`recovery`]). Uncommitted
//! locations are moved into the durable store by [`uncommitted`] once their
//! edit is committed.

mod recovery;
mod uncommitted;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

pub use uncommitted::FlushReport;

use crate::cache::{KeyedLocks, MissPolicy, ReadThroughCache};
use crate::diff::{translate_location, StructuralDiff};
use crate::error::{Error, Result};
use crate::local::LocalStores;
use crate::source::{BufferSource, FileIdentityResolver, LocationStore, MarkerStore, RevisionSource};
use crate::types::{
    flag_if_deleted, merge_locations, CommitKey, FileId, LocationsResult, Marker, MarkerLocation,
    MarkerLocationsById, UncommittedLocation,
};

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Longest per-commit walk the recovery attempts before diffing the
    /// origin commit against the target directly.
    pub max_history_hops: usize,
    /// Directory under each repository root holding the uncommitted store.
    pub local_dir: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { max_history_hops: 64, local_dir: ".waymark".to_owned() }
    }
}

/// Handles to every collaborator the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub revisions: Arc<dyn RevisionSource>,
    pub files: Arc<dyn FileIdentityResolver>,
    pub markers: Arc<dyn MarkerStore>,
    pub locations: Arc<dyn LocationStore>,
    pub buffers: Arc<dyn BufferSource>,
}

pub struct LocationEngine {
    revisions: Arc<dyn RevisionSource>,
    files: Arc<dyn FileIdentityResolver>,
    markers: Arc<dyn MarkerStore>,
    locations: Arc<dyn LocationStore>,
    buffers: Arc<dyn BufferSource>,
    local: LocalStores,
    location_cache: ReadThroughCache<CommitKey, MarkerLocationsById>,
    marker_cache: ReadThroughCache<FileId, Vec<Marker>>,
    recovery_locks: KeyedLocks<CommitKey>,
    options: EngineOptions,
}

/// Markers split by where their current location comes from.
#[derive(Debug, Default)]
struct Classified {
    committed: MarkerLocationsById,
    uncommitted: Vec<(String, UncommittedLocation)>,
}

impl LocationEngine {
    pub fn new(collaborators: Collaborators, options: EngineOptions) -> Self {
        let Collaborators { revisions, files, markers, locations, buffers } = collaborators;
        Self {
            revisions,
            files,
            markers,
            locations,
            buffers,
            local: LocalStores::new(options.local_dir.clone()),
            location_cache: ReadThroughCache::new(MissPolicy::ServeStale),
            marker_cache: ReadThroughCache::new(MissPolicy::ForceFetch),
            recovery_locks: KeyedLocks::new(),
            options,
        }
    }

    /// Where the uncommitted store of `repo_root` lives on disk.
    pub fn local_store_path(&self, repo_root: &Path) -> std::path::PathBuf {
        self.local.store_path(repo_root)
    }

    /// Current location of every marker of the file at `path`.
    ///
    /// `file_id` and `markers` may be supplied when the caller already has
    /// them. A file outside any repository, or one that no longer exists,
    /// yields a partial (possibly empty) result rather than an error.
    ///
    /// # Errors
    ///
    /// [`Error::Revision`] when the repository root lookup itself fails (as
    /// opposed to finding no repository). Also fails when the content of the
    /// file's current revision cannot be read, or a store access fails.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn get_current_locations(
        &self,
        path: &Path,
        file_id: Option<FileId>,
        markers: Option<Vec<Marker>>,
    ) -> Result<LocationsResult> {
        let mut result = LocationsResult::default();

        let Some(repo_root) = self.revisions.repo_root(path).await? else {
            debug!("no repository root");
            return Ok(result);
        };

        let file_id = match file_id {
            Some(id) => id,
            None => match self.files.file_id_for_path(path).await? {
                Some(id) => id,
                None => {
                    debug!("file is not tracked");
                    return Ok(result);
                }
            },
        };
        let markers = match markers {
            Some(markers) => markers,
            None => self.markers_for_file(&file_id).await?,
        };

        let current_commit = self.revisions.current_revision(path).await?;
        let committed = match &current_commit {
            Some(commit) => {
                self.get_commit_locations(path, Some(commit), Some(file_id.clone()), Some(markers.clone()))
                    .await?
            }
            None => LocationsResult::default(),
        };
        result.missing_locations = committed.missing_locations;

        info!(markers = markers.len(), "classifying locations");
        let classified = self.classify(&repo_root, &markers, committed.locations).await?;
        for (id, _) in &classified.uncommitted {
            result.missing_locations.remove(id);
        }

        let Some(buffer_text) = self.current_text(path).await else {
            info!("no buffer or file on disk; file does not exist in the current branch");
            return Ok(result);
        };

        if let (Some(commit), false) = (&current_commit, classified.committed.is_empty()) {
            let commit_text = self
                .revisions
                .file_content_at(path, commit)
                .await?
                .ok_or_else(|| Error::MissingRevisionContent {
                    path: path.to_path_buf(),
                    commit: commit.clone(),
                })?;
            let diff = StructuralDiff::between(&commit_text, &buffer_text);
            let translated = translate_all(&classified.committed, &diff);
            result.locations.extend(translated);
        }

        for (id, uncommitted) in classified.uncommitted {
            let diff = StructuralDiff::between(&uncommitted.file_contents, &buffer_text);
            let location = translate_location(&uncommitted.location, &diff);
            debug!(marker = %id, from = %uncommitted.location, to = %location, "uncommitted");
            result.locations.insert(id, location);
        }

        for marker in &markers {
            if let Some(location) = result.locations.get_mut(&marker.id) {
                flag_if_deleted(location, marker.location_when_created.as_ref());
            }
        }

        Ok(result)
    }

    /// Maps `location`, given in coordinates of the unsaved `text`, back to
    /// the file's current revision. Returned unchanged when the file has no
    /// revision.
    ///
    /// # Errors
    ///
    /// Fails when the current revision's content cannot be read.
    #[tracing::instrument(skip_all, fields(path = %path.display(), location = %location))]
    pub async fn backtrack_location(
        &self,
        path: &Path,
        text: &str,
        location: &MarkerLocation,
    ) -> Result<MarkerLocation> {
        let Some(commit) = self.revisions.current_revision(path).await? else {
            return Ok(*location);
        };
        let commit_text = self
            .revisions
            .file_content_at(path, &commit)
            .await?
            .ok_or_else(|| Error::MissingRevisionContent { path: path.to_path_buf(), commit })?;
        let diff = StructuralDiff::between(text, &commit_text);
        Ok(translate_location(location, &diff))
    }

    /// Routes each marker to the uncommitted path when the repository's
    /// local store holds an entry for it, else keeps its committed location.
    async fn classify(
        &self,
        repo_root: &Path,
        markers: &[Marker],
        mut committed: MarkerLocationsById,
    ) -> Result<Classified> {
        let store = self.local.for_repo(repo_root).await?;
        let store = store.lock().await;
        let mut classified = Classified::default();
        for marker in markers {
            if let Some(uncommitted) = store.get(&marker.id) {
                debug!(marker = %marker.id, "uncommitted");
                classified.uncommitted.push((marker.id.clone(), uncommitted.clone()));
            } else if let Some(location) = committed.remove(&marker.id) {
                debug!(marker = %marker.id, "committed");
                classified.committed.insert(marker.id.clone(), location);
            }
        }
        Ok(classified)
    }

    /// Live buffer text, falling back to the file on disk.
    async fn current_text(&self, path: &Path) -> Option<String> {
        if let Some(text) = self.buffers.buffer_text(path).await {
            return Some(text);
        }
        debug!("no open buffer, reading from disk");
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("cannot read file: {e}");
                None
            }
        }
    }

    async fn markers_for_file(&self, file_id: &str) -> Result<Vec<Marker>> {
        let key = file_id.to_owned();
        self.marker_cache
            .get_or_fetch(&key, || self.markers.markers_for_file(file_id))
            .await
    }

    /// Stored committed locations for `key`, through the location cache.
    async fn stored_locations(&self, key: &CommitKey) -> Result<MarkerLocationsById> {
        self.location_cache
            .get_or_fetch(key, || self.locations.get(key))
            .await
    }

    /// Writes `locations` to the durable store and folds them into the cache.
    async fn persist_locations(&self, key: &CommitKey, locations: &MarkerLocationsById) -> Result<()> {
        if locations.is_empty() {
            return Ok(());
        }
        info!(
            file_id = %key.file_id,
            commit = %key.commit_hash,
            count = locations.len(),
            "saving calculated locations"
        );
        self.locations.put(key, locations).await?;
        let fresh = locations.clone();
        self.location_cache
            .update(key, move |cached| merge_locations(cached, fresh))
            .await;
        Ok(())
    }
}

/// Translates every location through one shared diff. `content_changed`
/// sticks once set.
fn translate_all(locations: &MarkerLocationsById, diff: &StructuralDiff) -> MarkerLocationsById {
    let _span = tracing::debug_span!("translate", count = locations.len()).entered();
    locations
        .iter()
        .map(|(id, from)| {
            let mut to = translate_location(from, diff);
            to.meta.content_changed |= from.meta.content_changed;
            debug!(marker = %id, %from, %to, "translated");
            (id.clone(), to)
        })
        .collect()
}
