use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::source::{FileIdentityResolver, LocationStore, MarkerStore};
use crate::types::{
    CommitKey, FileStream, LocationMeta, Marker, MarkerLocation, MarkerLocationsById,
};

/// Opens (or creates) the SQLite database at `path`, configures WAL mode,
/// and applies schema migrations via the `schema_version` table.
///
/// This function is the single entry point for all database connections.
/// It sets `busy_timeout` via the `Connection` method (not a PRAGMA string) to
/// ensure the setting takes effect regardless of pragma caching.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL configuration
/// fails, or schema DDL fails.
pub async fn open_db(path: &str) -> Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path).await?;

    conn.call(|db| -> rusqlite::Result<()> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    })
    .await?;

    conn.call(|db| -> rusqlite::Result<()> {
        db.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    })
    .await?;

    conn.call(|db| -> rusqlite::Result<()> {
        crate::schema::migrate(db)?;
        Ok(())
    })
    .await?;

    Ok(conn)
}

/// Returns the current Unix timestamp in seconds.
fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Reads the four nullable range columns starting at `first`.
fn optional_location(r: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<Option<MarkerLocation>> {
    let ls: Option<u32> = r.get(first)?;
    let cs: Option<u32> = r.get(first + 1)?;
    let le: Option<u32> = r.get(first + 2)?;
    let ce: Option<u32> = r.get(first + 3)?;
    Ok(match (ls, cs, le, ce) {
        (Some(ls), Some(cs), Some(le), Some(ce)) => Some(MarkerLocation::new(ls, cs, le, ce)),
        _ => None,
    })
}

fn marker_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Marker> {
    Ok(Marker {
        id: r.get(0)?,
        file_id: r.get(1)?,
        commit_hash_when_created: r.get(2)?,
        location_when_created: optional_location(r, 3)?,
    })
}

const MARKER_COLUMNS: &str =
    "id, file_id, commit_hash_when_created, line_start, col_start, line_end, col_end";

/// SQLite-backed durable store. Serves as the location store, the marker
/// store and the file identity resolver.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Opens the database at `path` via [`open_db`].
    pub async fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_db(path).await?))
    }

    /// Finds the file registered under `repo_root`/`rel_path`, or registers it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or the insert transaction fails.
    pub async fn register_file(&self, repo_root: &Path, rel_path: &str) -> Result<FileStream> {
        let repo_root = repo_root.to_path_buf();
        let rel_path = rel_path.replace('\\', "/");
        let abs_path = path_text(&repo_root.join(&rel_path));
        let root_text = path_text(&repo_root);

        let stream = self
            .conn
            .call(move |db| -> rusqlite::Result<FileStream> {
                let existing: Option<String> = db
                    .query_row(
                        "SELECT id FROM files WHERE repo_root = ?1 AND rel_path = ?2",
                        rusqlite::params![&root_text, &rel_path],
                        |r| r.get(0),
                    )
                    .optional()?;

                let id = match existing {
                    Some(id) => id,
                    None => {
                        let id = uuid::Uuid::new_v4().to_string();
                        let tx =
                            db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                        tx.execute(
                            "INSERT INTO files (id, repo_root, rel_path, abs_path, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            rusqlite::params![&id, &root_text, &rel_path, &abs_path, now_secs()],
                        )?;
                        tx.commit()?;
                        id
                    }
                };
                Ok(FileStream { id, repo_root, rel_path })
            })
            .await?;
        Ok(stream)
    }

    /// Creates a marker with a fresh UUID v4 id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. unknown `file_id`).
    pub async fn create_marker(
        &self,
        file_id: &str,
        commit_hash_when_created: Option<&str>,
        location_when_created: Option<MarkerLocation>,
    ) -> Result<Marker> {
        let marker = Marker {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file_id.to_owned(),
            commit_hash_when_created: commit_hash_when_created.map(str::to_owned),
            location_when_created: location_when_created.map(|l| l.bare()),
        };
        let row = marker.clone();

        self.conn
            .call(move |db| -> rusqlite::Result<()> {
                let loc = row.location_when_created;
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT INTO markers (id, file_id, commit_hash_when_created,
                                          line_start, col_start, line_end, col_end, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        &row.id,
                        &row.file_id,
                        &row.commit_hash_when_created,
                        loc.map(|l| l.line_start),
                        loc.map(|l| l.col_start),
                        loc.map(|l| l.line_end),
                        loc.map(|l| l.col_end),
                        now_secs(),
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(marker)
    }
}

#[async_trait]
impl LocationStore for SqliteStore {
    async fn get(&self, key: &CommitKey) -> Result<MarkerLocationsById> {
        let key = key.clone();
        let locations = self
            .conn
            .call(move |db| -> rusqlite::Result<MarkerLocationsById> {
                let mut stmt = db.prepare(
                    "SELECT marker_id, line_start, col_start, line_end, col_end,
                            content_changed, entirely_deleted
                     FROM marker_locations
                     WHERE file_id = ?1 AND commit_hash = ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![&key.file_id, &key.commit_hash], |r| {
                        let id: String = r.get(0)?;
                        let location = MarkerLocation {
                            line_start: r.get(1)?,
                            col_start: r.get(2)?,
                            line_end: r.get(3)?,
                            col_end: r.get(4)?,
                            meta: LocationMeta {
                                content_changed: r.get(5)?,
                                entirely_deleted: r.get(6)?,
                            },
                        };
                        Ok((id, location))
                    })?
                    .collect::<rusqlite::Result<MarkerLocationsById>>()?;
                Ok(rows)
            })
            .await?;
        Ok(locations)
    }

    async fn put(&self, key: &CommitKey, locations: &MarkerLocationsById) -> Result<()> {
        if locations.is_empty() {
            return Ok(());
        }
        let key = key.clone();
        let locations = locations.clone();

        self.conn
            .call(move |db| -> rusqlite::Result<()> {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO marker_locations
                             (file_id, commit_hash, marker_id, line_start, col_start,
                              line_end, col_end, content_changed, entirely_deleted)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(file_id, commit_hash, marker_id)
                         DO UPDATE SET line_start = excluded.line_start,
                                       col_start = excluded.col_start,
                                       line_end = excluded.line_end,
                                       col_end = excluded.col_end,
                                       content_changed = excluded.content_changed,
                                       entirely_deleted = excluded.entirely_deleted",
                    )?;
                    for (id, l) in &locations {
                        stmt.execute(rusqlite::params![
                            &key.file_id,
                            &key.commit_hash,
                            id,
                            l.line_start,
                            l.col_start,
                            l.line_end,
                            l.col_end,
                            l.meta.content_changed,
                            l.meta.entirely_deleted,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for SqliteStore {
    async fn markers_for_file(&self, file_id: &str) -> Result<Vec<Marker>> {
        let file_id = file_id.to_owned();
        let markers = self
            .conn
            .call(move |db| -> rusqlite::Result<Vec<Marker>> {
                let mut stmt = db.prepare(&format!(
                    "SELECT {MARKER_COLUMNS} FROM markers WHERE file_id = ?1 ORDER BY created_at, id"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![&file_id], marker_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(markers)
    }

    async fn marker(&self, id: &str) -> Result<Option<Marker>> {
        let id = id.to_owned();
        let marker = self
            .conn
            .call(move |db| -> rusqlite::Result<Option<Marker>> {
                db.query_row(
                    &format!("SELECT {MARKER_COLUMNS} FROM markers WHERE id = ?1"),
                    rusqlite::params![&id],
                    marker_from_row,
                )
                .optional()
            })
            .await?;
        Ok(marker)
    }

    async fn update_marker_commit_hash(&self, id: &str, commit: &str) -> Result<()> {
        let id = id.to_owned();
        let commit = commit.to_owned();
        self.conn
            .call(move |db| -> rusqlite::Result<()> {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                tx.execute(
                    "UPDATE markers SET commit_hash_when_created = ?1 WHERE id = ?2",
                    rusqlite::params![&commit, &id],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FileIdentityResolver for SqliteStore {
    async fn file_id_for_path(&self, path: &Path) -> Result<Option<String>> {
        let abs_path = path_text(path);
        let id = self
            .conn
            .call(move |db| -> rusqlite::Result<Option<String>> {
                db.query_row(
                    "SELECT id FROM files WHERE abs_path = ?1",
                    rusqlite::params![&abs_path],
                    |r| r.get(0),
                )
                .optional()
            })
            .await?;
        Ok(id)
    }

    async fn file_stream(&self, file_id: &str) -> Result<Option<FileStream>> {
        let file_id = file_id.to_owned();
        let stream = self
            .conn
            .call(move |db| -> rusqlite::Result<Option<FileStream>> {
                db.query_row(
                    "SELECT id, repo_root, rel_path FROM files WHERE id = ?1",
                    rusqlite::params![&file_id],
                    |r| {
                        let root: String = r.get(1)?;
                        Ok(FileStream {
                            id: r.get(0)?,
                            repo_root: PathBuf::from(root),
                            rel_path: r.get(2)?,
                        })
                    },
                )
                .optional()
            })
            .await?;
        Ok(stream)
    }
}
