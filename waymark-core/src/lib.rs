//! Core of waymark: tracks where markers anchored to lines of a file are as
//! the file moves through commits and uncommitted edits.

pub mod cache;
pub mod db;
pub mod diff;
pub mod engine;
pub mod error;
pub mod local;
pub mod schema;
pub mod source;
pub mod types;

pub use engine::{Collaborators, EngineOptions, FlushReport, LocationEngine};
pub use error::{Error, Result};
