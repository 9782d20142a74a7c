use std::path::PathBuf;

use thiserror::Error;

/// Crate-level error.
///
/// Conditions the engine expects (no repository, no diff, no origin location)
/// are reported per marker in `LocationsResult::missing_locations` and never
/// surface here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Db(#[from] tokio_rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("local store is corrupt: {0}")]
    LocalStore(#[from] serde_json::Error),

    /// The revision source failed to answer (as opposed to answering "none").
    #[error("revision source: {0}")]
    Revision(String),

    /// Content of a known revision could not be read back.
    #[error("could not retrieve contents for {}@{commit}", path.display())]
    MissingRevisionContent { path: PathBuf, commit: String },

    #[error("could not find repository root for {}", path.display())]
    NotInRepository { path: PathBuf },

    #[error("unknown marker {0}")]
    UnknownMarker(String),

    #[error("unknown file {0}")]
    UnknownFile(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
