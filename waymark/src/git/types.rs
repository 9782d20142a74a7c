//! Requests understood by the git worker thread.
//!
//! Every request carries its own `oneshot` reply sender, so callers on the
//! async side simply await the answer. Payloads are fully owned and `Send`;
//! nothing borrowed from the `git2::Repository` leaves the worker.

use std::path::PathBuf;

use tokio::sync::oneshot;
use waymark_core::diff::StructuralDiff;

/// Reply channel for one request.
pub type Reply<T> = oneshot::Sender<Result<T, git2::Error>>;

/// Commands sent to the worker that owns a repository.
///
/// `rel_path` is always relative to the repository's working directory.
#[derive(Debug)]
pub enum GitRequest {
    /// Latest first-parent commit reachable from HEAD that changed the file.
    CurrentRevision {
        rel_path: PathBuf,
        reply: Reply<Option<String>>,
    },
    /// Blob content of the file at a commit.
    FileContentAt {
        rel_path: PathBuf,
        commit: String,
        reply: Reply<Option<String>>,
    },
    /// Zero-context line diff of the file between two commits.
    DiffBetween {
        rel_path: PathBuf,
        from: String,
        to: String,
        reply: Reply<Option<StructuralDiff>>,
    },
    /// First-parent commits after `from` up to `to` that changed the file,
    /// oldest first.
    FileHistory {
        rel_path: PathBuf,
        from: String,
        to: String,
        reply: Reply<Option<Vec<String>>>,
    },
    /// Commit HEAD points at; `None` on an unborn branch.
    Head { reply: Reply<Option<String>> },
}
