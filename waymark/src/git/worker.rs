//! Background thread that owns a git2::Repository for its lifetime.
//!
//! git2::Repository is !Send; it must be opened inside the thread, not passed in.
//! All communication is via channels: GitRequest in, a oneshot reply out.

use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;
use git2::{Commit, DiffOptions, ErrorCode, Oid, Patch, Repository};
use tracing::{debug, warn};
use waymark_core::diff::{normalize, Hunk, StructuralDiff};

use crate::git::types::GitRequest;

/// Entry point for the background thread that owns the git Repository.
///
/// Opens the Repository at `root` and loops over incoming `GitRequest` messages
/// until the channel is closed (every sender dropped). If the repository
/// cannot be opened the loop exits at once; pending callers then observe a
/// dropped reply channel.
pub fn git_worker_loop(root: PathBuf, rx: Receiver<GitRequest>) {
    let repo = match Repository::open(&root) {
        Ok(r) => r,
        Err(e) => {
            warn!(root = %root.display(), "cannot open repository: {}", e.message());
            return;
        }
    };
    debug!(root = %root.display(), "git worker started");

    for request in rx {
        handle_request(&repo, request);
    }
    debug!(root = %root.display(), "git worker stopped");
}

/// Runs one request and sends its answer. A caller that stopped waiting is
/// not an error.
fn handle_request(repo: &Repository, request: GitRequest) {
    match request {
        GitRequest::CurrentRevision { rel_path, reply } => {
            let _ = reply.send(current_revision(repo, &rel_path));
        }
        GitRequest::FileContentAt { rel_path, commit, reply } => {
            let _ = reply.send(content_at(repo, &rel_path, &commit));
        }
        GitRequest::DiffBetween { rel_path, from, to, reply } => {
            let _ = reply.send(diff_between(repo, &rel_path, &from, &to));
        }
        GitRequest::FileHistory { rel_path, from, to, reply } => {
            let _ = reply.send(file_history(repo, &rel_path, &from, &to));
        }
        GitRequest::Head { reply } => {
            let _ = reply.send(head_commit(repo).map(|c| c.map(|c| c.id().to_string())));
        }
    }
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, git2::Error> {
    match repo.head() {
        Ok(head) => head.peel_to_commit().map(Some),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Resolves a commit id, or `None` when the object is not in the repository.
fn find_commit<'r>(repo: &'r Repository, commit: &str) -> Result<Option<Commit<'r>>, git2::Error> {
    let oid = match Oid::from_str(commit) {
        Ok(oid) => oid,
        Err(_) => return Ok(None),
    };
    match repo.find_commit(oid) {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Blob id of `rel_path` in the commit's tree.
fn blob_id(commit: &Commit<'_>, rel_path: &Path) -> Result<Option<Oid>, git2::Error> {
    match commit.tree()?.get_path(rel_path) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whether `commit` changed `rel_path` relative to its first parent.
fn changed_file(commit: &Commit<'_>, rel_path: &Path) -> Result<bool, git2::Error> {
    let here = blob_id(commit, rel_path)?;
    if commit.parent_count() == 0 {
        return Ok(here.is_some());
    }
    Ok(here != blob_id(&commit.parent(0)?, rel_path)?)
}

fn current_revision(repo: &Repository, rel_path: &Path) -> Result<Option<String>, git2::Error> {
    let Some(mut commit) = head_commit(repo)? else {
        return Ok(None);
    };
    if blob_id(&commit, rel_path)?.is_none() {
        return Ok(None);
    }
    while !changed_file(&commit, rel_path)? {
        commit = commit.parent(0)?;
    }
    Ok(Some(commit.id().to_string()))
}

fn content_at(repo: &Repository, rel_path: &Path, commit: &str) -> Result<Option<String>, git2::Error> {
    let Some(commit) = find_commit(repo, commit)? else {
        return Ok(None);
    };
    let Some(id) = blob_id(&commit, rel_path)? else {
        return Ok(None);
    };
    let blob = repo.find_blob(id)?;
    Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
}

/// Diffs the normalised blob contents with git's own line diff at zero
/// context. Both buffers get one `\n` back so that the last line is
/// terminated on both sides.
fn diff_between(
    repo: &Repository,
    rel_path: &Path,
    from: &str,
    to: &str,
) -> Result<Option<StructuralDiff>, git2::Error> {
    let (Some(old), Some(new)) = (content_at(repo, rel_path, from)?, content_at(repo, rel_path, to)?)
    else {
        return Ok(None);
    };
    let new = normalize(&new);
    let old_buf = format!("{}\n", normalize(&old));
    let new_buf = format!("{new}\n");

    let mut opts = DiffOptions::new();
    opts.context_lines(0);
    let patch = Patch::from_buffers(
        old_buf.as_bytes(),
        Some(rel_path),
        new_buf.as_bytes(),
        Some(rel_path),
        Some(&mut opts),
    )?;

    let mut hunks = Vec::with_capacity(patch.num_hunks());
    for idx in 0..patch.num_hunks() {
        let (hunk, _lines) = patch.hunk(idx)?;
        hunks.push(Hunk {
            old_start: zero_based(hunk.old_start(), hunk.old_lines()),
            old_len: hunk.old_lines(),
            new_start: zero_based(hunk.new_start(), hunk.new_lines()),
            new_len: hunk.new_lines(),
        });
    }
    Ok(Some(StructuralDiff::from_hunks(hunks, &new)))
}

/// Git numbers hunk lines from 1, except that an empty side names the line
/// *after which* the change sits, which is already the 0-based insertion index.
fn zero_based(start: u32, len: u32) -> u32 {
    if len == 0 {
        start
    } else {
        start.saturating_sub(1)
    }
}

fn file_history(
    repo: &Repository,
    rel_path: &Path,
    from: &str,
    to: &str,
) -> Result<Option<Vec<String>>, git2::Error> {
    let (Some(origin), Some(mut commit)) = (find_commit(repo, from)?, find_commit(repo, to)?) else {
        return Ok(None);
    };
    let mut changed = Vec::new();
    while commit.id() != origin.id() {
        if changed_file(&commit, rel_path)? {
            changed.push(commit.id().to_string());
        }
        if commit.parent_count() == 0 {
            // `from` is not a first-parent ancestor of `to`.
            return Ok(None);
        }
        commit = commit.parent(0)?;
    }
    changed.reverse();
    Ok(Some(changed))
}

#[cfg(test)]
mod tests {
    use super::zero_based;

    #[test]
    fn hunk_starts_become_zero_based() {
        // @@ -3,2 +3,0 @@ deletes old lines 3..4 (1-based)
        assert_eq!(zero_based(3, 2), 2);
        // @@ -2,0 +3,1 @@ inserts after old line 2
        assert_eq!(zero_based(2, 0), 2);
        assert_eq!(zero_based(0, 0), 0);
    }
}
