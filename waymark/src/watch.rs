//! Commit watcher: polls HEAD of one repository and runs a flush-on-commit
//! pass whenever it moves.
//!
//! The loop exits when the SIGTERM flag is raised or on Ctrl-C. A heartbeat
//! arm guarantees the flag is checked at least once per poll period even
//! when nothing else happens.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::SIGTERM;
use signal_hook::flag::register;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use waymark_core::types::CommitHash;
use waymark_core::{FlushReport, LocationEngine, Result};

use crate::git::GitRevisions;

/// Registers a SIGTERM handler that sets the returned flag.
///
/// # Errors
///
/// Returns the I/O error of the signal registration.
pub fn register_sigterm() -> std::io::Result<Arc<AtomicBool>> {
    let term = Arc::new(AtomicBool::new(false));
    // Safety: signal_hook::flag::register is safe for AtomicBool targets;
    // the handler only calls atomic_store, which is async-signal-safe.
    register(SIGTERM, Arc::clone(&term))?;
    Ok(term)
}

pub struct CommitWatcher {
    engine: Arc<LocationEngine>,
    git: Arc<GitRevisions>,
    repo_root: PathBuf,
    /// HEAD at the last poll; `None` before the first one.
    last_head: Option<Option<CommitHash>>,
}

impl CommitWatcher {
    pub fn new(engine: Arc<LocationEngine>, git: Arc<GitRevisions>, repo_root: PathBuf) -> Self {
        Self { engine, git, repo_root, last_head: None }
    }

    /// Reads HEAD and flushes when it differs from the last observed one.
    /// The first poll always flushes, picking up commits made while nobody
    /// was watching.
    ///
    /// # Errors
    ///
    /// Fails when HEAD cannot be read or the local store cannot be loaded.
    pub async fn poll(&mut self) -> Result<Option<FlushReport>> {
        let head = self.git.head(&self.repo_root).await?;
        if self.last_head.as_ref() == Some(&head) {
            return Ok(None);
        }
        match &head {
            Some(h) => info!(head = %h, "new commit observed"),
            None => debug!("repository has no commits"),
        }
        let report = self.engine.flush_uncommitted_locations(&self.repo_root).await?;
        self.last_head = Some(head);
        Ok(Some(report))
    }

    /// Polls every `period` until `term` is raised or Ctrl-C arrives.
    pub async fn run(mut self, period: Duration, term: Arc<AtomicBool>) {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!(repo = %self.repo_root.display(), period_ms = period.as_millis() as u64, "watching");
        'watch: loop {
            tokio::select! {
                _ = &mut ctrl_c => break 'watch,
                _ = ticks.tick() => {
                    if term.load(Ordering::Relaxed) {
                        break 'watch;
                    }
                    if let Err(e) = self.poll().await {
                        warn!("poll failed: {e}");
                    }
                }
            }
        }
        info!("watcher stopped");
    }
}
