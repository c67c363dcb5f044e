use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS authors (
    author_id BLOB PRIMARY KEY CHECK (length(author_id) = 16),
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    website TEXT
);

CREATE TABLE IF NOT EXISTS game_versions (
    game_vsn_id BLOB PRIMARY KEY CHECK (length(game_vsn_id) = 16),
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS stored_files (
    hash BLOB PRIMARY KEY CHECK (length(hash) = 32),
    file_id BLOB NOT NULL UNIQUE CHECK (length(file_id) = 16),
    name TEXT NOT NULL,
    length INTEGER NOT NULL,
    content BLOB NOT NULL,
    uploaded_at INTEGER NOT NULL DEFAULT (unixepoch())
);

CREATE TABLE IF NOT EXISTS mods (
    mod_id BLOB PRIMARY KEY CHECK (length(mod_id) = 16),
    correlation_id BLOB NOT NULL UNIQUE CHECK (length(correlation_id) = 16),
    slug TEXT NOT NULL UNIQUE,
    redist INTEGER NOT NULL DEFAULT 1,
    name TEXT NOT NULL,
    description TEXT,
    website TEXT,
    authors BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS mod_versions (
    mod_id BLOB NOT NULL CHECK (length(mod_id) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    url TEXT,
    game_versions BLOB NOT NULL,
    PRIMARY KEY (mod_id, correlation_id)
);

CREATE TABLE IF NOT EXISTS mod_files (
    mod_id BLOB NOT NULL CHECK (length(mod_id) = 16),
    version_correlation BLOB NOT NULL CHECK (length(version_correlation) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    position INTEGER NOT NULL,
    filename TEXT NOT NULL,
    description TEXT,
    stored_hash BLOB CHECK (stored_hash IS NULL OR length(stored_hash) = 32),
    page_url TEXT,
    redirect_url TEXT,
    direct_url TEXT,
    PRIMARY KEY (mod_id, version_correlation, correlation_id)
);

CREATE TABLE IF NOT EXISTS log_mods (
    log_id BLOB PRIMARY KEY CHECK (length(log_id) = 16),
    mod_id BLOB CHECK (mod_id IS NULL OR length(mod_id) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    idx INTEGER NOT NULL,
    created_at BLOB NOT NULL CHECK (length(created_at) = 12),
    author BLOB CHECK (author IS NULL OR length(author) = 32),
    approved_by BLOB CHECK (approved_by IS NULL OR length(approved_by) = 32),
    signed_by BLOB NOT NULL CHECK (length(signed_by) = 32),
    checksum BLOB NOT NULL CHECK (length(checksum) = 32),
    signature BLOB NOT NULL CHECK (length(signature) = 64),
    name TEXT NOT NULL,
    description TEXT,
    website TEXT,
    authors BLOB NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_log_mods_chain ON log_mods (mod_id, idx);

CREATE TABLE IF NOT EXISTS log_mod_versions (
    log_id BLOB NOT NULL CHECK (length(log_id) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    url TEXT,
    game_versions BLOB NOT NULL,
    PRIMARY KEY (log_id, correlation_id)
);

CREATE TABLE IF NOT EXISTS log_mod_files (
    log_id BLOB NOT NULL CHECK (length(log_id) = 16),
    version_correlation BLOB NOT NULL CHECK (length(version_correlation) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    position INTEGER NOT NULL,
    filename TEXT NOT NULL,
    description TEXT,
    stored_hash BLOB CHECK (stored_hash IS NULL OR length(stored_hash) = 32),
    page_url TEXT,
    redirect_url TEXT,
    direct_url TEXT,
    PRIMARY KEY (log_id, version_correlation, correlation_id)
);

CREATE TABLE IF NOT EXISTS draft_mods (
    draft_id BLOB PRIMARY KEY CHECK (length(draft_id) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    owner BLOB NOT NULL CHECK (length(owner) = 32),
    base_id BLOB CHECK (base_id IS NULL OR length(base_id) = 16),
    state TEXT NOT NULL,
    created_at BLOB NOT NULL CHECK (length(created_at) = 12),
    last_changed BLOB NOT NULL CHECK (length(last_changed) = 12),
    ready_at BLOB CHECK (ready_at IS NULL OR length(ready_at) = 12),
    closed_at BLOB CHECK (closed_at IS NULL OR length(closed_at) = 12),
    name TEXT NOT NULL,
    description TEXT,
    website TEXT,
    authors BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_draft_mods_owner ON draft_mods (owner);

CREATE TABLE IF NOT EXISTS draft_mod_versions (
    draft_id BLOB NOT NULL CHECK (length(draft_id) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    url TEXT,
    game_versions BLOB NOT NULL,
    PRIMARY KEY (draft_id, correlation_id)
);

CREATE TABLE IF NOT EXISTS draft_mod_files (
    draft_id BLOB NOT NULL CHECK (length(draft_id) = 16),
    version_correlation BLOB NOT NULL CHECK (length(version_correlation) = 16),
    correlation_id BLOB NOT NULL CHECK (length(correlation_id) = 16),
    position INTEGER NOT NULL,
    filename TEXT NOT NULL,
    description TEXT,
    stored_hash BLOB CHECK (stored_hash IS NULL OR length(stored_hash) = 32),
    page_url TEXT,
    redirect_url TEXT,
    direct_url TEXT,
    PRIMARY KEY (draft_id, version_correlation, correlation_id)
);
";
