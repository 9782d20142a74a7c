//! waymark: keeps markers attached to line ranges of files in git
//! repositories as the files are edited and committed.
//!
//! The binary's pieces live here so that integration tests can drive them:
//! the git-backed revision source (`git`), configuration (`config`),
//! logging setup (`telemetry`), the commit watcher (`watch`) and the
//! per-invocation wiring (`app`).

pub mod app;
pub mod config;
pub mod git;
pub mod telemetry;
pub mod watch;
