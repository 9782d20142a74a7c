//! Uncommitted-location lifecycle: saving locations for edits no commit
//! contains yet, and moving them into the durable store once one does.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn, Instrument};

use super::LocationEngine;
use crate::diff::{translate_location, StructuralDiff};
use crate::error::{Error, Result};
use crate::local::UncommittedStore;
use crate::types::{
    flag_if_deleted, CommitHash, CommitKey, MarkerId, MarkerLocation, MarkerLocationsById,
    UncommittedLocation,
};

/// What one flush pass did with each uncommitted entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Persisted under the commit that now contains the edit.
    pub committed: Vec<(MarkerId, CommitHash)>,
    /// Removed without persisting: the marker no longer exists, or the
    /// commit deleted its whole range.
    pub dropped: Vec<MarkerId>,
    /// File has no commit newer than the marker's origin yet; retried on the
    /// next pass.
    pub skipped: Vec<MarkerId>,
    /// Failed this pass; entry kept.
    pub failed: Vec<MarkerId>,
}

enum Outcome {
    Committed(CommitHash),
    Dropped,
    Skipped,
}

impl LocationEngine {
    /// Records `location` (relative to the buffer `text`) as the marker's
    /// uncommitted location and flushes the repository's local store.
    ///
    /// # Errors
    ///
    /// [`Error::NotInRepository`] when `path` is outside any repository;
    /// repository lookup and disk errors are propagated.
    #[tracing::instrument(skip_all, fields(path = %path.display(), marker = %marker_id))]
    pub async fn save_uncommitted_location(
        &self,
        path: &Path,
        text: &str,
        marker_id: &str,
        location: &MarkerLocation,
    ) -> Result<()> {
        let repo_root = self
            .revisions
            .repo_root(path)
            .await?
            .ok_or_else(|| Error::NotInRepository { path: path.to_path_buf() })?;

        let store = self.local.for_repo(&repo_root).await?;
        let mut store = store.lock().await;
        store.set(
            marker_id,
            UncommittedLocation { file_contents: text.to_owned(), location: location.bare() },
        );
        store.flush().await?;
        debug!("uncommitted location saved");
        Ok(())
    }

    /// Moves every uncommitted location of `repo_root` whose file now has a
    /// commit into the durable store under that commit, and updates the
    /// marker's origin commit.
    ///
    /// Each entry is handled on its own: a failure is logged and reported,
    /// and the pass goes on. The local store is flushed after every removal,
    /// so an interrupted pass only repeats the entries it had not finished.
    ///
    /// # Errors
    ///
    /// Fails only when the local store itself cannot be loaded.
    pub async fn flush_uncommitted_locations(&self, repo_root: &Path) -> Result<FlushReport> {
        let span = tracing::info_span!("flush", repo = %repo_root.display());
        async move {
            let store = self.local.for_repo(repo_root).await?;
            let mut store = store.lock().await;
            let mut report = FlushReport::default();

            for id in store.keys() {
                debug!(marker = %id, "checking uncommitted marker");
                match self.flush_one(repo_root, &mut store, &id).await {
                    Ok(Outcome::Committed(commit)) => report.committed.push((id, commit)),
                    Ok(Outcome::Dropped) => report.dropped.push(id),
                    Ok(Outcome::Skipped) => report.skipped.push(id),
                    Err(e) => {
                        warn!(marker = %id, "flush failed: {e}");
                        report.failed.push(id);
                    }
                }
            }

            info!(
                committed = report.committed.len(),
                dropped = report.dropped.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "uncommitted locations flushed"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn flush_one(
        &self,
        repo_root: &Path,
        store: &mut UncommittedStore,
        id: &str,
    ) -> Result<Outcome> {
        let Some(uncommitted) = store.get(id).cloned() else {
            return Ok(Outcome::Skipped);
        };

        let Some(marker) = self.markers.marker(id).await? else {
            warn!(marker = %id, "marker no longer exists, dropping its uncommitted location");
            store.delete(id);
            store.flush().await?;
            return Ok(Outcome::Dropped);
        };
        let stream = self
            .files
            .file_stream(&marker.file_id)
            .await?
            .ok_or_else(|| Error::UnknownFile(marker.file_id.clone()))?;
        let abs_path = repo_root.join(&stream.rel_path);

        let Some(commit) = self.revisions.current_revision(&abs_path).await? else {
            debug!(file = %stream.rel_path, "not committed yet");
            return Ok(Outcome::Skipped);
        };
        // The entry was saved on top of this commit, so it holds nothing new.
        if marker.commit_hash_when_created.as_ref() == Some(&commit) {
            debug!(marker = %id, commit = %commit, "no commit since the marker's origin");
            return Ok(Outcome::Skipped);
        }
        let commit_text = self
            .revisions
            .file_content_at(&abs_path, &commit)
            .await?
            .ok_or_else(|| Error::MissingRevisionContent { path: abs_path.clone(), commit: commit.clone() })?;

        let diff = StructuralDiff::between(&uncommitted.file_contents, &commit_text);
        let mut location = translate_location(&uncommitted.location, &diff);
        flag_if_deleted(&mut location, Some(&uncommitted.location));

        if location.meta.entirely_deleted {
            info!(marker = %id, commit = %commit, "range deleted by commit, dropping it");
            store.delete(id);
            store.flush().await?;
            return Ok(Outcome::Dropped);
        }

        info!(marker = %id, commit = %commit, %location, "committed");
        let key = CommitKey::new(stream.id.clone(), commit.clone());
        let mut locations = MarkerLocationsById::new();
        locations.insert(id.to_owned(), location);
        self.persist_locations(&key, &locations).await?;
        self.markers.update_marker_commit_hash(id, &commit).await?;

        store.delete(id);
        store.flush().await?;
        Ok(Outcome::Committed(commit))
    }
}
