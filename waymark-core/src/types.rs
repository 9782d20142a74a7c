use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque marker identifier (UUID v4 text for markers created locally).
pub type MarkerId = String;
/// Stable identifier of a tracked file, independent of its path.
pub type FileId = String;
/// Full hex object id of a commit.
pub type CommitHash = String;

/// Marker id → location. Ordered so results and logs are deterministic.
pub type MarkerLocationsById = BTreeMap<MarkerId, MarkerLocation>;

/// Marker id → reason the marker could not be placed.
pub type MissingLocationsById = BTreeMap<MarkerId, MissingLocation>;

/// Flags attached to a translated location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMeta {
    /// Some line inside the range was edited by the diff it was translated through.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub content_changed: bool,
    /// The range collapsed to zero width although it was created non-empty.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub entirely_deleted: bool,
}

/// A 0-based line/column range. The end position is exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerLocation {
    pub line_start: u32,
    pub col_start: u32,
    pub line_end: u32,
    pub col_end: u32,
    #[serde(default)]
    pub meta: LocationMeta,
}

impl MarkerLocation {
    pub fn new(line_start: u32, col_start: u32, line_end: u32, col_end: u32) -> Self {
        Self { line_start, col_start, line_end, col_end, meta: LocationMeta::default() }
    }

    /// True when start and end coincide.
    pub fn is_zero_width(&self) -> bool {
        self.line_start == self.line_end && self.col_start == self.col_end
    }

    /// Same coordinates, metadata cleared.
    pub fn bare(&self) -> Self {
        Self::new(self.line_start, self.col_start, self.line_end, self.col_end)
    }
}

impl std::fmt::Display for MarkerLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}:{}", self.line_start, self.col_start, self.line_end, self.col_end)
    }
}

impl std::str::FromStr for MarkerLocation {
    type Err = String;

    /// Parses `line:col-line:col`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected line:col-line:col, got {s:?}"))?;
        let pos = |p: &str| -> Result<(u32, u32), String> {
            let (l, c) = p
                .split_once(':')
                .ok_or_else(|| format!("expected line:col, got {p:?}"))?;
            let l = l.trim().parse::<u32>().map_err(|e| format!("bad line {l:?}: {e}"))?;
            let c = c.trim().parse::<u32>().map_err(|e| format!("bad column {c:?}: {e}"))?;
            Ok((l, c))
        };
        let (ls, cs) = pos(start)?;
        let (le, ce) = pos(end)?;
        Ok(Self::new(ls, cs, le, ce))
    }
}

/// A user annotation anchored to a file at the commit where it was created.
///
/// `commit_hash_when_created` is `None` for markers created before the file
/// had any commit; it is filled in once, when the uncommitted location is
/// flushed to the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: MarkerId,
    pub file_id: FileId,
    pub commit_hash_when_created: Option<CommitHash>,
    pub location_when_created: Option<MarkerLocation>,
}

/// A tracked file: its identifier and where it lives inside its repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStream {
    pub id: FileId,
    pub repo_root: PathBuf,
    /// Path relative to `repo_root`, `/`-separated.
    pub rel_path: String,
}

/// Typed composite key of a committed-location record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitKey {
    pub file_id: FileId,
    pub commit_hash: CommitHash,
}

impl CommitKey {
    pub fn new(file_id: impl Into<FileId>, commit_hash: impl Into<CommitHash>) -> Self {
        Self { file_id: file_id.into(), commit_hash: commit_hash.into() }
    }
}

/// Why a marker has no location in a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingReason {
    /// No diff could be obtained from the marker's origin commit.
    MissingOriginalCommit,
    /// The marker's location at its origin commit is unknown.
    MissingOriginalLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingLocation {
    pub reason: MissingReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MissingLocation {
    pub fn new(reason: MissingReason, details: impl Into<String>) -> Self {
        Self { reason, details: Some(details.into()) }
    }
}

/// Output of every resolution call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsResult {
    pub locations: MarkerLocationsById,
    pub missing_locations: MissingLocationsById,
}

/// A location recorded against an edit that no commit contains yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncommittedLocation {
    /// Buffer text at the time of the edit; `location` is relative to it.
    pub file_contents: String,
    pub location: MarkerLocation,
}

/// Merges `newer` into `base`: entries of `newer` win per marker id, entries
/// only present in `base` are kept.
pub fn merge_locations(base: &mut MarkerLocationsById, newer: MarkerLocationsById) {
    base.extend(newer);
}

/// Sets `entirely_deleted` when `location` collapsed to zero width while the
/// reference range it descends from was not zero-width.
pub fn flag_if_deleted(location: &mut MarkerLocation, reference: Option<&MarkerLocation>) {
    if location.is_zero_width() && reference.is_some_and(|r| !r.is_zero_width()) {
        location.meta.entirely_deleted = true;
    }
}
