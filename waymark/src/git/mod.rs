//! Git-backed revision source.
//!
//! [`GitRevisions`] keeps one background `std::thread::spawn` worker per
//! repository. Each worker holds its `git2::Repository` for its lifetime
//! (Repository is !Send, so it must never cross a thread boundary); the async
//! side talks to it over a `crossbeam_channel` and awaits a `oneshot` reply.
pub mod types;
pub mod worker;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use crossbeam_channel::Sender;
use git2::{ErrorCode, Repository};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use waymark_core::diff::StructuralDiff;
use waymark_core::source::RevisionSource;
use waymark_core::types::CommitHash;
use waymark_core::{Error, Result};

use types::{GitRequest, Reply};

/// Makes `path` absolute and resolves symlinks in its longest existing
/// prefix, keeping the not-yet-existing tail as written.
pub fn absolute(path: &Path) -> PathBuf {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    for existing in path.ancestors() {
        if let Ok(resolved) = std::fs::canonicalize(existing) {
            let tail = path.strip_prefix(existing).unwrap_or(Path::new(""));
            return clean(&resolved.join(tail));
        }
    }
    clean(&path)
}

/// Drops `.` and trailing separators; resolves `..` lexically.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn discover_root(start: &Path) -> Result<Option<PathBuf>> {
    let dir = start.ancestors().find(|p| p.is_dir()).unwrap_or(start);
    match Repository::discover(dir) {
        Ok(repo) => Ok(repo.workdir().map(clean)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(Error::Revision(e.message().to_owned())),
    }
}

fn worker_gone(root: &Path) -> Error {
    Error::Revision(format!("git worker for {} stopped", root.display()))
}

/// [`RevisionSource`] over the git repositories found on disk.
#[derive(Default)]
pub struct GitRevisions {
    workers: Mutex<HashMap<PathBuf, Sender<GitRequest>>>,
}

impl GitRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel to the worker of `root`, spawning it on first use.
    async fn worker(&self, root: &Path) -> Sender<GitRequest> {
        let mut workers = self.workers.lock().await;
        if let Some(tx) = workers.get(root) {
            return tx.clone();
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let repo_root = root.to_path_buf();
        std::thread::spawn(move || worker::git_worker_loop(repo_root, rx));
        workers.insert(root.to_path_buf(), tx.clone());
        tx
    }

    async fn request<T>(&self, root: &Path, build: impl FnOnce(Reply<T>) -> GitRequest) -> Result<T> {
        let tx = self.worker(root).await;
        let (reply, rx) = oneshot::channel();
        if tx.send(build(reply)).is_err() {
            self.workers.lock().await.remove(root);
            return Err(worker_gone(root));
        }
        match rx.await {
            Ok(answer) => answer.map_err(|e| Error::Revision(e.message().to_owned())),
            Err(_) => {
                self.workers.lock().await.remove(root);
                Err(worker_gone(root))
            }
        }
    }

    /// Repository root and repository-relative path of `path`.
    async fn locate(&self, path: &Path) -> Result<Option<(PathBuf, PathBuf)>> {
        let path = absolute(path);
        let Some(root) = self.repo_root(&path).await? else {
            return Ok(None);
        };
        match path.strip_prefix(&root) {
            Ok(rel) => Ok(Some((root.clone(), rel.to_path_buf()))),
            Err(_) => {
                debug!(path = %path.display(), root = %root.display(), "path outside its repository");
                Ok(None)
            }
        }
    }

    /// Commit HEAD of the repository at `root` points at.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Revision`] if the repository cannot be read.
    pub async fn head(&self, root: &Path) -> Result<Option<CommitHash>> {
        self.request(root, |reply| GitRequest::Head { reply }).await
    }
}

#[async_trait]
impl RevisionSource for GitRevisions {
    async fn repo_root(&self, path: &Path) -> Result<Option<PathBuf>> {
        let start = absolute(path);
        tokio::task::spawn_blocking(move || discover_root(&start))
            .await
            .map_err(|e| Error::Revision(e.to_string()))?
    }

    async fn current_revision(&self, path: &Path) -> Result<Option<CommitHash>> {
        let Some((root, rel_path)) = self.locate(path).await? else {
            return Ok(None);
        };
        self.request(&root, |reply| GitRequest::CurrentRevision { rel_path, reply })
            .await
    }

    async fn file_content_at(&self, path: &Path, commit: &str) -> Result<Option<String>> {
        let Some((root, rel_path)) = self.locate(path).await? else {
            return Ok(None);
        };
        let commit = commit.to_owned();
        self.request(&root, |reply| GitRequest::FileContentAt { rel_path, commit, reply })
            .await
    }

    async fn diff_between(
        &self,
        from: &str,
        to: &str,
        path: &Path,
    ) -> Result<Option<StructuralDiff>> {
        let Some((root, rel_path)) = self.locate(path).await? else {
            return Ok(None);
        };
        let (from, to) = (from.to_owned(), to.to_owned());
        self.request(&root, |reply| GitRequest::DiffBetween { rel_path, from, to, reply })
            .await
    }

    async fn file_history(
        &self,
        path: &Path,
        from: &str,
        to: &str,
    ) -> Result<Option<Vec<CommitHash>>> {
        let Some((root, rel_path)) = self.locate(path).await? else {
            return Ok(None);
        };
        let (from, to) = (from.to_owned(), to.to_owned());
        self.request(&root, |reply| GitRequest::FileHistory { rel_path, from, to, reply })
            .await
    }
}
