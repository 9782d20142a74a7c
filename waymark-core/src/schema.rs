/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every DB open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the full v1 schema.
///
/// Contains three tables:
/// - `files`: stable file identity, keyed by UUID v4 text, with the
///   repository root and repo-relative path it was registered under.
/// - `markers`: one row per marker; the creation range columns are nullable
///   for markers whose creation location was never recorded.
/// - `marker_locations`: committed locations, one row per
///   `(file_id, commit_hash, marker_id)`. Rows are upserted, never deleted.
///
/// All tables use `STRICT` mode for type enforcement.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS files (
        id          TEXT    PRIMARY KEY,
        repo_root   TEXT    NOT NULL,
        rel_path    TEXT    NOT NULL,
        abs_path    TEXT    NOT NULL UNIQUE,
        created_at  INTEGER NOT NULL,
        UNIQUE (repo_root, rel_path)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS markers (
        id                       TEXT    PRIMARY KEY,
        file_id                  TEXT    NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        commit_hash_when_created TEXT,
        line_start               INTEGER,
        col_start                INTEGER,
        line_end                 INTEGER,
        col_end                  INTEGER,
        created_at               INTEGER NOT NULL
    ) STRICT;

    CREATE INDEX IF NOT EXISTS markers_by_file ON markers(file_id);

    CREATE TABLE IF NOT EXISTS marker_locations (
        file_id          TEXT    NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        commit_hash      TEXT    NOT NULL,
        marker_id        TEXT    NOT NULL,
        line_start       INTEGER NOT NULL,
        col_start        INTEGER NOT NULL,
        line_end         INTEGER NOT NULL,
        col_end          INTEGER NOT NULL,
        content_changed  INTEGER NOT NULL DEFAULT 0,
        entirely_deleted INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (file_id, commit_hash, marker_id)
    ) STRICT;
";

/// Runs forward-only schema migration to migrate the DB to the latest version.
///
/// Idempotent: safe to call on every open.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the DDL fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if version < 1 {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA_V1_SQL)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
    }

    Ok(())
}
