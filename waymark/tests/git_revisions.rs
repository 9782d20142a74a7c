//! Integration tests for the git-backed revision source and the binary's
//! wiring, against real repositories created in temp dirs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Commit, Repository, Signature};
use tempfile::TempDir;
use waymark::app::App;
use waymark::config::Config;
use waymark::git::{absolute, GitRevisions};
use waymark::watch::CommitWatcher;
use waymark_core::diff::{Hunk, StructuralDiff};
use waymark_core::source::RevisionSource;
use waymark_core::types::MarkerLocation;

struct GitRepo {
    dir: TempDir,
    repo: Repository,
}

impl GitRepo {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self { dir, repo }
    }

    fn root(&self) -> PathBuf {
        absolute(self.dir.path())
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn write(&self, rel: &str, text: &str) {
        std::fs::write(self.path(rel), text).unwrap();
    }

    /// Writes `rel` and commits it on HEAD; returns the commit id.
    fn commit(&self, rel: &str, text: &str) -> String {
        self.write(rel, text);
        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(rel)).unwrap();
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, &format!("update {rel}"), &tree, &parents)
            .unwrap()
            .to_string()
    }
}

fn loc(ls: u32, cs: u32, le: u32, ce: u32) -> MarkerLocation {
    MarkerLocation::new(ls, cs, le, ce)
}

#[tokio::test]
async fn repository_root_discovery() {
    let repo = GitRepo::new();
    std::fs::create_dir(repo.path("src")).unwrap();
    let git = GitRevisions::new();

    let root = git.repo_root(&repo.path("src/not-yet-created.rs")).await.unwrap();
    assert_eq!(root, Some(repo.root()));

    let outside = TempDir::new().unwrap();
    assert_eq!(git.repo_root(&outside.path().join("a.txt")).await.unwrap(), None);
}

#[tokio::test]
async fn revisions_follow_the_commits_that_touch_the_file() {
    let repo = GitRepo::new();
    let git = GitRevisions::new();
    let a = repo.path("a.txt");

    assert_eq!(git.current_revision(&a).await.unwrap(), None, "unborn HEAD");

    let c1 = repo.commit("a.txt", "foo\nbar\n");
    let c2 = repo.commit("b.txt", "unrelated\n");
    assert_eq!(git.current_revision(&a).await.unwrap(), Some(c1.clone()));
    assert_eq!(git.current_revision(&repo.path("b.txt")).await.unwrap(), Some(c2.clone()));
    assert_eq!(git.current_revision(&repo.path("c.txt")).await.unwrap(), None);

    let c3 = repo.commit("a.txt", "baz\nfoo\nbar\n");
    assert_eq!(git.current_revision(&a).await.unwrap(), Some(c3.clone()));

    assert_eq!(git.file_content_at(&a, &c1).await.unwrap().as_deref(), Some("foo\nbar\n"));
    assert_eq!(git.file_content_at(&a, &c2).await.unwrap().as_deref(), Some("foo\nbar\n"));
    assert_eq!(git.file_content_at(&repo.path("b.txt"), &c1).await.unwrap(), None);
    let bogus = "0".repeat(40);
    assert_eq!(git.file_content_at(&a, &bogus).await.unwrap(), None);

    assert_eq!(git.file_history(&a, &c1, &c3).await.unwrap(), Some(vec![c3.clone()]));
    assert_eq!(git.file_history(&a, &c1, &c2).await.unwrap(), Some(vec![]));
    assert_eq!(git.file_history(&a, &c3, &c1).await.unwrap(), None, "not an ancestor");
}

#[tokio::test]
async fn git_diff_matches_line_diff() {
    let repo = GitRepo::new();
    let git = GitRevisions::new();
    let a = repo.path("a.txt");
    let c1 = repo.commit("a.txt", "foo\nbar\n");
    let c2 = repo.commit("a.txt", "baz\nfoo\nbar");
    let c3 = repo.commit("a.txt", "baz\nbar\n");

    let diff = git.diff_between(&c1, &c2, &a).await.unwrap().unwrap();
    assert_eq!(
        diff.hunks(),
        &[Hunk { old_start: 0, old_len: 0, new_start: 0, new_len: 1 }],
        "missing final newline is not a change"
    );
    assert_eq!(diff, StructuralDiff::between("foo\nbar\n", "baz\nfoo\nbar"));

    let deletion = git.diff_between(&c2, &c3, &a).await.unwrap().unwrap();
    assert_eq!(deletion.hunks(), &[Hunk { old_start: 1, old_len: 1, new_start: 1, new_len: 0 }]);

    let bogus = "0".repeat(40);
    assert_eq!(git.diff_between(&bogus, &c3, &a).await.unwrap(), None);
}

#[tokio::test]
async fn tracked_marker_follows_edits_and_commits() {
    let repo = GitRepo::new();
    let a = repo.path("a.txt");
    repo.commit("a.txt", "foo\nbar\n");

    let app = App::open(Config::default(), &a).await.unwrap();
    assert_eq!(app.repo_root, repo.root());
    let marker = app.track(&a, &loc(0, 0, 0, 3)).await.unwrap();
    assert_eq!(marker.location_when_created, Some(loc(0, 0, 0, 3)));

    // Unsaved edit in the working copy.
    repo.write("a.txt", "baz\nfoo\nbar\n");
    let located = app.locate(&[a.clone()]).await.unwrap();
    let result = &located[&a.display().to_string()];
    assert_eq!(result.locations[&marker.id], loc(1, 0, 1, 3));
    assert!(result.missing_locations.is_empty());

    // Committed: resolved through recovery from the origin commit.
    let c2 = repo.commit("a.txt", "baz\nfoo\nbar\n");
    let at = app.at(&a, &c2).await.unwrap();
    assert_eq!(at.locations[&marker.id], loc(1, 0, 1, 3));

    // A fresh process answers from the database.
    let reopened = App::open(Config::default(), &a).await.unwrap();
    let again = reopened.at(&a, &c2).await.unwrap();
    assert_eq!(again, at);
}

#[tokio::test]
async fn marker_on_an_uncommitted_line_is_flushed_by_the_watcher() {
    let repo = GitRepo::new();
    let a = repo.path("a.txt");
    repo.commit("a.txt", "foo\n");

    let app = App::open(Config::default(), &a).await.unwrap();
    app.open_buffer(&a, "foo\nnew line\n".to_owned()).await;
    let marker = app.track(&a, &loc(1, 0, 1, 8)).await.unwrap();

    let mut watcher =
        CommitWatcher::new(app.engine.clone(), Arc::clone(&app.git), app.repo_root.clone());
    let first = watcher.poll().await.unwrap().unwrap();
    assert_eq!(first.skipped, vec![marker.id.clone()], "line not committed yet");
    assert!(watcher.poll().await.unwrap().is_none(), "HEAD did not move");

    let located = app.locate(&[a.clone()]).await.unwrap();
    assert_eq!(located[&a.display().to_string()].locations[&marker.id], loc(1, 0, 1, 8));

    let c2 = repo.commit("a.txt", "foo\nnew line\n");
    let report = watcher.poll().await.unwrap().unwrap();
    assert_eq!(report.committed, vec![(marker.id.clone(), c2.clone())]);

    let at = app.at(&a, &c2).await.unwrap();
    assert_eq!(at.locations[&marker.id], loc(1, 0, 1, 8));
}

#[tokio::test]
async fn marker_tracked_before_the_first_commit_detects_deletion() {
    let repo = GitRepo::new();
    let a = repo.path("a.txt");
    repo.write("a.txt", "keep\ngone\n");

    let app = App::open(Config::default(), &a).await.unwrap();
    let marker = app.track(&a, &loc(1, 0, 1, 4)).await.unwrap();
    assert_eq!(marker.commit_hash_when_created, None);
    assert_eq!(marker.location_when_created, Some(loc(1, 0, 1, 4)));

    let c1 = repo.commit("a.txt", "keep\ngone\n");
    let report = app.flush().await.unwrap();
    assert_eq!(report.committed, vec![(marker.id.clone(), c1)]);

    repo.write("a.txt", "keep\n");
    let located = app.locate(&[a.clone()]).await.unwrap();
    let location = located[&a.display().to_string()].locations[&marker.id];
    assert!(location.meta.entirely_deleted, "got {location}");
}

#[tokio::test]
async fn save_rejects_unknown_markers() {
    let repo = GitRepo::new();
    let a = repo.path("a.txt");
    repo.commit("a.txt", "foo\n");

    let app = App::open(Config::default(), &a).await.unwrap();
    let err = app.save(&a, "nope", &loc(0, 0, 0, 1)).await.unwrap_err();
    assert!(matches!(err, waymark_core::Error::UnknownMarker(id) if id == "nope"));
}

#[tokio::test]
async fn opening_outside_a_repository_fails() {
    let outside = TempDir::new().unwrap();
    let result = App::open(Config::default(), &outside.path().join("a.txt")).await;
    assert!(matches!(result, Err(waymark_core::Error::NotInRepository { .. })));
}
