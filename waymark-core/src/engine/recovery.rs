//! Commit-history recovery: locations of markers as of a given commit.
//!
//! Locations missing from the durable record of the target commit are
//! recovered per origin commit (the commit each marker was created at). A
//! batch starts from the origin record, or from the marker's creation
//! location, and is carried forward one file-changing commit at a time;
//! each hop's result is persisted, so later queries for any commit on the
//! way are answered by the store.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, info_span, warn, Instrument};

use super::{translate_all, LocationEngine};
use crate::error::Result;
use crate::types::{
    merge_locations, CommitHash, CommitKey, FileId, LocationsResult, Marker, MarkerLocationsById,
    MissingLocation, MissingLocationsById, MissingReason,
};

#[derive(Debug, Default)]
struct BatchOutcome {
    locations: MarkerLocationsById,
    missing: MissingLocationsById,
}

impl LocationEngine {
    /// Locations of the file's markers as of `commit`, recovering and
    /// persisting any the durable store does not know yet.
    ///
    /// A `None` commit or an untracked file yields an empty result. A batch
    /// that cannot be recovered is reported per marker and does not affect
    /// other batches.
    ///
    /// # Errors
    ///
    /// Fails when the target record cannot be read or the file's markers
    /// cannot be listed.
    #[tracing::instrument(skip_all, fields(path = %path.display(), commit = ?commit))]
    pub async fn get_commit_locations(
        &self,
        path: &Path,
        commit: Option<&str>,
        file_id: Option<FileId>,
        markers: Option<Vec<Marker>>,
    ) -> Result<LocationsResult> {
        let Some(commit) = commit else {
            return Ok(LocationsResult::default());
        };
        let file_id = match file_id {
            Some(id) => id,
            None => match self.files.file_id_for_path(path).await? {
                Some(id) => id,
                None => {
                    debug!("cannot find file id");
                    return Ok(LocationsResult::default());
                }
            },
        };
        let markers = match markers {
            Some(markers) => markers,
            None => self.markers_for_file(&file_id).await?,
        };

        let key = CommitKey::new(file_id, commit);
        let _guard = self.recovery_locks.lock(&key).await;

        let mut locations = self.stored_locations(&key).await?;
        let mut missing = MissingLocationsById::new();
        let batches = missing_by_origin(&markers, &locations, &mut missing);
        if batches.is_empty() {
            debug!("no missing locations");
        }

        for (origin, batch) in batches {
            let span = info_span!("recover batch", origin = %origin, markers = batch.len());
            match self.recover_batch(path, &key, &origin, &batch).instrument(span).await {
                Ok(outcome) => {
                    merge_locations(&mut locations, outcome.locations);
                    missing.extend(outcome.missing);
                }
                Err(e) => {
                    warn!(origin = %origin, "recovery failed: {e}");
                    let details = format!("recovery from {origin} to {commit} failed: {e}");
                    for marker in batch {
                        missing.insert(
                            marker.id.clone(),
                            MissingLocation::new(MissingReason::MissingOriginalCommit, details.clone()),
                        );
                    }
                }
            }
        }

        Ok(LocationsResult { locations, missing_locations: missing })
    }

    /// Recovers one batch of markers created at `origin`.
    async fn recover_batch(
        &self,
        path: &Path,
        target: &CommitKey,
        origin: &str,
        batch: &[&Marker],
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        let origin_key = CommitKey::new(target.file_id.clone(), origin);
        let at_origin = self.stored_locations(&origin_key).await?;

        let mut start = MarkerLocationsById::new();
        for marker in batch {
            let original = at_origin
                .get(&marker.id)
                .copied()
                .or_else(|| marker.location_when_created.map(|l| l.bare()));
            match original {
                Some(location) => {
                    start.insert(marker.id.clone(), location);
                }
                None => {
                    let details = format!("could not find original location for marker {}", marker.id);
                    warn!(marker = %marker.id, "{details}");
                    outcome.missing.insert(
                        marker.id.clone(),
                        MissingLocation::new(MissingReason::MissingOriginalLocation, details),
                    );
                }
            }
        }
        if start.is_empty() {
            return Ok(outcome);
        }

        if origin == target.commit_hash {
            self.persist_locations(target, &start).await?;
            outcome.locations = start;
            return Ok(outcome);
        }

        let hops = self.hops(path, origin, &target.commit_hash).await;
        let mut walked = self.walk(path, &target.file_id, origin, &hops, start.clone()).await?;
        if walked.is_none() && hops.len() > 1 {
            debug!("per-commit walk broke off, diffing origin against target directly");
            walked = self
                .walk(path, &target.file_id, origin, std::slice::from_ref(&target.commit_hash), start.clone())
                .await?;
        }

        match walked {
            Some(locations) => outcome.locations = locations,
            None => {
                let details = format!(
                    "cannot obtain diff - skipping calculation from {origin} to {}",
                    target.commit_hash
                );
                info!("{details}");
                for id in start.into_keys() {
                    outcome.missing.insert(
                        id,
                        MissingLocation::new(MissingReason::MissingOriginalCommit, details.clone()),
                    );
                }
            }
        }
        Ok(outcome)
    }

    /// The commits to step through from `origin` to `target`; always ends
    /// with `target`.
    async fn hops(&self, path: &Path, origin: &str, target: &str) -> Vec<CommitHash> {
        match self.revisions.file_history(path, origin, target).await {
            Ok(Some(mut commits)) if commits.len() <= self.options.max_history_hops => {
                if commits.last().map(String::as_str) != Some(target) {
                    commits.push(target.to_owned());
                }
                commits
            }
            Ok(Some(commits)) => {
                debug!(hops = commits.len(), "history too long for a per-commit walk");
                vec![target.to_owned()]
            }
            Ok(None) => vec![target.to_owned()],
            Err(e) => {
                debug!("file history unavailable: {e}");
                vec![target.to_owned()]
            }
        }
    }

    /// Carries `current` (locations at `origin`) across every hop. At each
    /// hop, locations already stored win; the rest are translated and
    /// persisted. `None` when a needed diff is unobtainable.
    async fn walk(
        &self,
        path: &Path,
        file_id: &str,
        origin: &str,
        hops: &[CommitHash],
        mut current: MarkerLocationsById,
    ) -> Result<Option<MarkerLocationsById>> {
        let mut prev = origin.to_owned();
        for hop in hops {
            let key = CommitKey::new(file_id, hop.clone());
            let known = self.stored_locations(&key).await?;

            let (reused, pending): (MarkerLocationsById, MarkerLocationsById) = current
                .into_iter()
                .partition(|(id, _)| known.contains_key(id));
            let mut next: MarkerLocationsById = reused
                .into_keys()
                .filter_map(|id| known.get(&id).map(|l| (id, *l)))
                .collect();

            if !pending.is_empty() {
                debug!(from = %prev, to = %hop, "diffing");
                let Some(diff) = self.revisions.diff_between(&prev, hop, path).await? else {
                    return Ok(None);
                };
                let translated = translate_all(&pending, &diff);
                self.persist_locations(&key, &translated).await?;
                next.extend(translated);
            }

            current = next;
            prev = hop.clone();
        }
        Ok(Some(current))
    }
}

/// Markers absent from `known`, grouped by origin commit in discovery
/// order. Markers without an origin commit go straight to `missing`.
fn missing_by_origin<'m>(
    markers: &'m [Marker],
    known: &MarkerLocationsById,
    missing: &mut MissingLocationsById,
) -> Vec<(CommitHash, Vec<&'m Marker>)> {
    let mut batches: Vec<(CommitHash, Vec<&Marker>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for marker in markers.iter().filter(|m| !known.contains_key(&m.id)) {
        let Some(origin) = marker.commit_hash_when_created.as_deref() else {
            missing.insert(
                marker.id.clone(),
                MissingLocation::new(
                    MissingReason::MissingOriginalCommit,
                    format!("marker {} has no origin commit", marker.id),
                ),
            );
            continue;
        };
        match index.get(origin) {
            Some(&i) => batches[i].1.push(marker),
            None => {
                index.insert(origin, batches.len());
                batches.push((origin.to_owned(), vec![marker]));
            }
        }
    }
    batches
}
