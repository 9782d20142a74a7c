//! Wires the location engine to git, the SQLite store and the buffer map,
//! and implements the operation behind each subcommand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, info};
use waymark_core::db::SqliteStore;
use waymark_core::diff::normalize;
use waymark_core::source::{BufferSource, MarkerStore, OpenDocuments, RevisionSource};
use waymark_core::types::{LocationsResult, Marker, MarkerLocation};
use waymark_core::{Collaborators, Error, FlushReport, LocationEngine, Result};

use crate::config::Config;
use crate::git::{self, GitRevisions};
use crate::watch::{self, CommitWatcher};

/// Everything one invocation needs, opened for the repository containing
/// the anchor path.
pub struct App {
    pub config: Config,
    pub git: Arc<GitRevisions>,
    pub store: Arc<SqliteStore>,
    pub docs: Arc<OpenDocuments>,
    pub engine: Arc<LocationEngine>,
    pub repo_root: PathBuf,
}

impl App {
    /// Finds the repository containing `anchor` and opens its database,
    /// creating the database directory if needed.
    ///
    /// # Errors
    ///
    /// [`Error::NotInRepository`] when `anchor` is outside any repository;
    /// database and discovery failures are propagated.
    pub async fn open(config: Config, anchor: &Path) -> Result<Self> {
        let git = Arc::new(GitRevisions::new());
        let anchor = git::absolute(anchor);
        let repo_root = git
            .repo_root(&anchor)
            .await?
            .ok_or_else(|| Error::NotInRepository { path: anchor.clone() })?;

        let db_path = config.database_path(&repo_root);
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(db = %db_path.display(), "opening database");
        let store = Arc::new(SqliteStore::open(&db_path.to_string_lossy()).await?);
        let docs = Arc::new(OpenDocuments::new());
        let engine = Arc::new(LocationEngine::new(
            Collaborators {
                revisions: git.clone(),
                files: store.clone(),
                markers: store.clone(),
                locations: store.clone(),
                buffers: docs.clone(),
            },
            config.engine_options(),
        ));

        Ok(Self { config, git, store, docs, engine, repo_root })
    }

    /// Uses `text` as the live buffer of `path` for this invocation.
    pub async fn open_buffer(&self, path: &Path, text: String) {
        self.docs.open(git::absolute(path), text).await;
    }

    /// Live buffer text, else the file on disk.
    async fn live_text(&self, path: &Path) -> Result<String> {
        match self.docs.buffer_text(path).await {
            Some(text) => Ok(text),
            None => Ok(tokio::fs::read_to_string(path).await?),
        }
    }

    /// Creates a marker on `range` of the live text of `path`.
    ///
    /// The marker is anchored at the file's current revision. When the live
    /// text differs from that revision, the creation location is the range
    /// mapped back to the revision and the live range is kept as an
    /// uncommitted location. A file without a revision gets a marker with no
    /// origin commit whose live range is both its creation location and its
    /// uncommitted location.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is outside the repository, or a
    /// store access fails.
    pub async fn track(&self, path: &Path, range: &MarkerLocation) -> Result<Marker> {
        let path = git::absolute(path);
        let rel_path = path
            .strip_prefix(&self.repo_root)
            .map_err(|_| Error::NotInRepository { path: path.clone() })?
            .to_string_lossy()
            .into_owned();
        let file = self.store.register_file(&self.repo_root, &rel_path).await?;
        let text = self.live_text(&path).await?;

        let Some(commit) = self.git.current_revision(&path).await? else {
            let marker = self.store.create_marker(&file.id, None, Some(*range)).await?;
            self.engine.save_uncommitted_location(&path, &text, &marker.id, range).await?;
            info!(marker = %marker.id, "tracking uncommitted file");
            return Ok(marker);
        };

        let committed = self
            .git
            .file_content_at(&path, &commit)
            .await?
            .ok_or_else(|| Error::MissingRevisionContent { path: path.clone(), commit: commit.clone() })?;
        if normalize(&committed) == normalize(&text) {
            let marker = self.store.create_marker(&file.id, Some(&commit), Some(*range)).await?;
            info!(marker = %marker.id, %commit, "tracking");
            return Ok(marker);
        }

        let at_commit = self.engine.backtrack_location(&path, &text, range).await?;
        let marker = self.store.create_marker(&file.id, Some(&commit), Some(at_commit)).await?;
        self.engine.save_uncommitted_location(&path, &text, &marker.id, range).await?;
        info!(marker = %marker.id, %commit, %at_commit, "tracking edited file");
        Ok(marker)
    }

    /// Current locations of every path, resolved concurrently.
    ///
    /// # Errors
    ///
    /// Fails if any single resolution fails.
    pub async fn locate(&self, paths: &[PathBuf]) -> Result<BTreeMap<String, LocationsResult>> {
        let lookups = paths.iter().map(|p| async move {
            let path = git::absolute(p);
            let result = self.engine.get_current_locations(&path, None, None).await?;
            Ok::<_, Error>((p.display().to_string(), result))
        });
        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    /// Locations as of `commit`.
    ///
    /// # Errors
    ///
    /// Fails when the stored record or the marker list cannot be read.
    pub async fn at(&self, path: &Path, commit: &str) -> Result<LocationsResult> {
        let path = git::absolute(path);
        self.engine.get_commit_locations(&path, Some(commit), None, None).await
    }

    /// Maps `range` of the live text back to the current revision.
    ///
    /// # Errors
    ///
    /// Fails when the file or its revision cannot be read.
    pub async fn backtrack(&self, path: &Path, range: &MarkerLocation) -> Result<MarkerLocation> {
        let path = git::absolute(path);
        let text = self.live_text(&path).await?;
        self.engine.backtrack_location(&path, &text, range).await
    }

    /// Records `range` of the live text as the marker's uncommitted location.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMarker`] for an id the store does not know; read and
    /// store failures are propagated.
    pub async fn save(&self, path: &Path, marker_id: &str, range: &MarkerLocation) -> Result<()> {
        if self.store.marker(marker_id).await?.is_none() {
            return Err(Error::UnknownMarker(marker_id.to_owned()));
        }
        let path = git::absolute(path);
        let text = self.live_text(&path).await?;
        self.engine.save_uncommitted_location(&path, &text, marker_id, range).await
    }

    /// One flush-on-commit pass over the repository.
    ///
    /// # Errors
    ///
    /// Fails when the local store cannot be loaded.
    pub async fn flush(&self) -> Result<FlushReport> {
        self.engine.flush_uncommitted_locations(&self.repo_root).await
    }

    /// Watches the repository for commits until SIGTERM or Ctrl-C.
    ///
    /// # Errors
    ///
    /// Fails when the SIGTERM handler cannot be registered.
    pub async fn watch(&self) -> Result<()> {
        let term = watch::register_sigterm()?;
        let period = Duration::from_millis(self.config.poll_interval_ms.max(1));
        CommitWatcher::new(self.engine.clone(), self.git.clone(), self.repo_root.clone())
            .run(period, term)
            .await;
        Ok(())
    }
}
