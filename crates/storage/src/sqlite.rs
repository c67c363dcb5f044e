use std::collections::BTreeSet;

use rusqlite::Connection;

use modarch_core::hlc::Hlc;
use modarch_core::ids::*;
use modarch_core::model::{
    Author, DraftMod, DraftModFile, DraftModVersion, DraftState, FileFields, GameVersion, LogMod,
    LogModFile, LogModVersion, Mod, ModFields, ModFile, ModVersion, StoredFile, VersionFields,
};

use crate::error::StorageError;
use crate::traits::Storage;

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn id_set_to_blob<'a, I>(ids: I) -> Result<Vec<u8>, StorageError>
where
    I: IntoIterator<Item = &'a [u8; 16]>,
{
    let raw: Vec<Vec<u8>> = ids.into_iter().map(|b| b.to_vec()).collect();
    rmp_serde::to_vec(&raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn id_set_from_blob(bytes: &[u8]) -> Result<Vec<[u8; 16]>, StorageError> {
    let raw: Vec<Vec<u8>> =
        rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    raw.into_iter().map(|v| to_array::<16>(v, "id")).collect()
}

fn authors_to_blob(set: &BTreeSet<AuthorId>) -> Result<Vec<u8>, StorageError> {
    id_set_to_blob(set.iter().map(|a| a.as_bytes()))
}

fn authors_from_blob(bytes: &[u8]) -> Result<BTreeSet<AuthorId>, StorageError> {
    Ok(id_set_from_blob(bytes)?
        .into_iter()
        .map(AuthorId::from_bytes)
        .collect())
}

fn game_vsns_to_blob(set: &BTreeSet<GameVersionId>) -> Result<Vec<u8>, StorageError> {
    id_set_to_blob(set.iter().map(|v| v.as_bytes()))
}

fn game_vsns_from_blob(bytes: &[u8]) -> Result<BTreeSet<GameVersionId>, StorageError> {
    Ok(id_set_from_blob(bytes)?
        .into_iter()
        .map(GameVersionId::from_bytes)
        .collect())
}

fn opt_hlc(bytes: Option<Vec<u8>>) -> Result<Option<Hlc>, StorageError> {
    match bytes {
        Some(b) => Ok(Some(Hlc::from_bytes(&to_array::<12>(b, "hlc")?)?)),
        None => Ok(None),
    }
}

fn opt_actor(bytes: Option<Vec<u8>>) -> Result<Option<ActorId>, StorageError> {
    match bytes {
        Some(b) => Ok(Some(ActorId::from_bytes(to_array::<32>(b, "actor_id")?))),
        None => Ok(None),
    }
}

fn opt_blob_hash(bytes: Option<Vec<u8>>) -> Result<Option<BlobHash>, StorageError> {
    match bytes {
        Some(b) => Ok(Some(BlobHash::from_bytes(to_array::<32>(b, "hash")?))),
        None => Ok(None),
    }
}

/// Table names for one kind's child rows. The three kinds persist the same
/// version/file shape under different tables, keyed by their own parent
/// column; one set of read/write routines serves all of them.
struct TreeTables {
    versions: &'static str,
    files: &'static str,
    parent_col: &'static str,
}

const MOD_TABLES: TreeTables = TreeTables {
    versions: "mod_versions",
    files: "mod_files",
    parent_col: "mod_id",
};

const LOG_TABLES: TreeTables = TreeTables {
    versions: "log_mod_versions",
    files: "log_mod_files",
    parent_col: "log_id",
};

const DRAFT_TABLES: TreeTables = TreeTables {
    versions: "draft_mod_versions",
    files: "draft_mod_files",
    parent_col: "draft_id",
};

struct VersionRow<'a> {
    correlation_id: CorrelationId,
    fields: &'a VersionFields,
    files: Vec<FileRow<'a>>,
}

struct FileRow<'a> {
    correlation_id: CorrelationId,
    fields: &'a FileFields,
}

struct LoadedVersion {
    correlation_id: CorrelationId,
    fields: VersionFields,
    files: Vec<LoadedFile>,
}

struct LoadedFile {
    correlation_id: CorrelationId,
    fields: FileFields,
}

fn mod_version_rows(versions: &[ModVersion]) -> Vec<VersionRow<'_>> {
    versions
        .iter()
        .map(|v| VersionRow {
            correlation_id: v.correlation_id,
            fields: &v.fields,
            files: v
                .files
                .iter()
                .map(|f| FileRow {
                    correlation_id: f.correlation_id,
                    fields: &f.fields,
                })
                .collect(),
        })
        .collect()
}

fn log_version_rows(versions: &[LogModVersion]) -> Vec<VersionRow<'_>> {
    versions
        .iter()
        .map(|v| VersionRow {
            correlation_id: v.correlation_id,
            fields: &v.fields,
            files: v
                .files
                .iter()
                .map(|f| FileRow {
                    correlation_id: f.correlation_id,
                    fields: &f.fields,
                })
                .collect(),
        })
        .collect()
}

fn draft_version_rows(versions: &[DraftModVersion]) -> Vec<VersionRow<'_>> {
    versions
        .iter()
        .map(|v| VersionRow {
            correlation_id: v.correlation_id,
            fields: &v.fields,
            files: v
                .files
                .iter()
                .map(|f| FileRow {
                    correlation_id: f.correlation_id,
                    fields: &f.fields,
                })
                .collect(),
        })
        .collect()
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Replace all child rows under `parent` with the given tree, inside a
    /// savepoint so the swap nests correctly in an ambient transaction.
    fn write_children(
        &self,
        tables: &TreeTables,
        parent: &[u8],
        versions: &[VersionRow<'_>],
    ) -> Result<(), StorageError> {
        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                tables.files, tables.parent_col
            ),
            rusqlite::params![parent],
        )?;
        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                tables.versions, tables.parent_col
            ),
            rusqlite::params![parent],
        )?;

        let vsn_sql = format!(
            "INSERT INTO {} ({}, correlation_id, position, name, description, url, game_versions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            tables.versions, tables.parent_col
        );
        let file_sql = format!(
            "INSERT INTO {} ({}, version_correlation, correlation_id, position, filename, description, stored_hash, page_url, redirect_url, direct_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            tables.files, tables.parent_col
        );

        for (pos, vsn) in versions.iter().enumerate() {
            self.conn.execute(
                &vsn_sql,
                rusqlite::params![
                    parent,
                    vsn.correlation_id.as_bytes().as_slice(),
                    pos as i64,
                    vsn.fields.name,
                    vsn.fields.desc,
                    vsn.fields.url,
                    game_vsns_to_blob(&vsn.fields.game_versions)?,
                ],
            )?;
            for (fpos, file) in vsn.files.iter().enumerate() {
                self.conn.execute(
                    &file_sql,
                    rusqlite::params![
                        parent,
                        vsn.correlation_id.as_bytes().as_slice(),
                        file.correlation_id.as_bytes().as_slice(),
                        fpos as i64,
                        file.fields.filename,
                        file.fields.desc,
                        file.fields.stored.as_ref().map(|h| h.as_bytes().as_slice()),
                        file.fields.page_url,
                        file.fields.redirect_url,
                        file.fields.direct_url,
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn load_children(
        &self,
        tables: &TreeTables,
        parent: &[u8],
    ) -> Result<Vec<LoadedVersion>, StorageError> {
        let vsn_sql = format!(
            "SELECT correlation_id, name, description, url, game_versions FROM {}
             WHERE {} = ?1 ORDER BY position",
            tables.versions, tables.parent_col
        );
        let mut stmt = self.conn.prepare(&vsn_sql)?;
        let raw_versions: Vec<(Vec<u8>, String, Option<String>, Option<String>, Vec<u8>)> = stmt
            .query_map(rusqlite::params![parent], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let file_sql = format!(
            "SELECT correlation_id, filename, description, stored_hash, page_url, redirect_url, direct_url
             FROM {} WHERE {} = ?1 AND version_correlation = ?2 ORDER BY position",
            tables.files, tables.parent_col
        );
        let mut file_stmt = self.conn.prepare(&file_sql)?;

        let mut versions = Vec::new();
        for (corr_bytes, name, desc, url, gv_blob) in raw_versions {
            let correlation_id = CorrelationId::from_bytes(to_array::<16>(corr_bytes, "correlation_id")?);
            let raw_files: Vec<(
                Vec<u8>,
                String,
                Option<String>,
                Option<Vec<u8>>,
                Option<String>,
                Option<String>,
                Option<String>,
            )> = file_stmt
                .query_map(
                    rusqlite::params![parent, correlation_id.as_bytes().as_slice()],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;

            let mut files = Vec::new();
            for (fcorr, filename, fdesc, stored, page_url, redirect_url, direct_url) in raw_files {
                files.push(LoadedFile {
                    correlation_id: CorrelationId::from_bytes(to_array::<16>(
                        fcorr,
                        "correlation_id",
                    )?),
                    fields: FileFields {
                        filename,
                        desc: fdesc,
                        stored: opt_blob_hash(stored)?,
                        page_url,
                        redirect_url,
                        direct_url,
                    },
                });
            }

            versions.push(LoadedVersion {
                correlation_id,
                fields: VersionFields {
                    name,
                    desc,
                    url,
                    game_versions: game_vsns_from_blob(&gv_blob)?,
                },
                files,
            });
        }
        Ok(versions)
    }

    fn in_savepoint<T>(
        &self,
        name: &str,
        body: impl FnOnce(&Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        match body(self) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(e) => {
                let _ = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"));
                Err(e)
            }
        }
    }
}

impl Storage for SqliteStorage {
    fn save_mod(&mut self, subject: &Mod) -> Result<(), StorageError> {
        self.in_savepoint("save_mod", |this| {
            this.conn.execute(
                "INSERT INTO mods (mod_id, correlation_id, slug, redist, name, description, website, authors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(mod_id) DO UPDATE SET
                     correlation_id = excluded.correlation_id,
                     slug = excluded.slug,
                     redist = excluded.redist,
                     name = excluded.name,
                     description = excluded.description,
                     website = excluded.website,
                     authors = excluded.authors",
                rusqlite::params![
                    subject.id.as_bytes().as_slice(),
                    subject.correlation_id.as_bytes().as_slice(),
                    subject.slug,
                    subject.redist,
                    subject.fields.name,
                    subject.fields.desc,
                    subject.fields.website,
                    authors_to_blob(&subject.fields.authors)?,
                ],
            )?;
            this.write_children(
                &MOD_TABLES,
                subject.id.as_bytes().as_slice(),
                &mod_version_rows(&subject.versions),
            )
        })
    }

    fn load_mod(&self, id: ModId) -> Result<Option<Mod>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT correlation_id, slug, redist, name, description, website, authors
             FROM mods WHERE mod_id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Vec<u8>>(6)?,
            ))
        })?;

        let (corr, slug, redist, name, desc, website, authors_blob) = match rows.next() {
            Some(row) => row?,
            None => return Ok(None),
        };

        let versions = self
            .load_children(&MOD_TABLES, id.as_bytes().as_slice())?
            .into_iter()
            .map(|v| ModVersion {
                correlation_id: v.correlation_id,
                fields: v.fields,
                files: v
                    .files
                    .into_iter()
                    .map(|f| ModFile {
                        correlation_id: f.correlation_id,
                        fields: f.fields,
                    })
                    .collect(),
            })
            .collect();

        Ok(Some(Mod {
            id,
            correlation_id: CorrelationId::from_bytes(to_array::<16>(corr, "correlation_id")?),
            slug,
            redist,
            fields: ModFields {
                name,
                desc,
                website,
                authors: authors_from_blob(&authors_blob)?,
            },
            versions,
        }))
    }

    fn mod_id_by_slug(&self, slug: &str) -> Result<Option<ModId>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT mod_id FROM mods WHERE slug = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![slug], |row| row.get::<_, Vec<u8>>(0))?;
        match rows.next() {
            Some(bytes) => Ok(Some(ModId::from_bytes(to_array::<16>(bytes?, "mod_id")?))),
            None => Ok(None),
        }
    }

    fn list_mods(&self, include_delisted: bool) -> Result<Vec<Mod>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT mod_id FROM mods WHERE (?1 OR redist = 1) ORDER BY slug")?;
        let ids: Vec<Vec<u8>> = stmt
            .query_map(rusqlite::params![include_delisted], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut mods = Vec::new();
        for bytes in ids {
            let id = ModId::from_bytes(to_array::<16>(bytes, "mod_id")?);
            if let Some(m) = self.load_mod(id)? {
                mods.push(m);
            }
        }
        Ok(mods)
    }

    fn delete_mod(&mut self, id: ModId) -> Result<(), StorageError> {
        self.in_savepoint("delete_mod", |this| {
            let id_bytes = id.as_bytes().as_slice();
            this.conn.execute(
                "DELETE FROM mod_files WHERE mod_id = ?1",
                rusqlite::params![id_bytes],
            )?;
            this.conn.execute(
                "DELETE FROM mod_versions WHERE mod_id = ?1",
                rusqlite::params![id_bytes],
            )?;
            this.conn.execute(
                "DELETE FROM mods WHERE mod_id = ?1",
                rusqlite::params![id_bytes],
            )?;
            Ok(())
        })
    }

    fn append_log_entry(&mut self, entry: &LogMod) -> Result<(), StorageError> {
        self.in_savepoint("append_log_entry", |this| {
            let result = this.conn.execute(
                "INSERT INTO log_mods (log_id, mod_id, correlation_id, idx, created_at, author,
                                       approved_by, signed_by, checksum, signature, name,
                                       description, website, authors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    entry.id.as_bytes().as_slice(),
                    entry.current.as_ref().map(|m| m.as_bytes().as_slice()),
                    entry.correlation_id.as_bytes().as_slice(),
                    entry.index as i64,
                    &entry.created_at.to_bytes()[..],
                    entry.author.as_ref().map(|a| a.as_bytes().as_slice()),
                    entry.approved_by.as_ref().map(|a| a.as_bytes().as_slice()),
                    entry.signed_by.as_bytes().as_slice(),
                    entry.checksum.as_bytes().as_slice(),
                    entry.signature.as_bytes().as_slice(),
                    entry.fields.name,
                    entry.fields.desc,
                    entry.fields.website,
                    authors_to_blob(&entry.fields.authors)?,
                ],
            );
            match result {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(StorageError::ConstraintViolation(format!(
                        "history entry {} for index {} already exists",
                        entry.id, entry.index
                    )));
                }
                Err(e) => return Err(StorageError::Sqlite(e)),
            }
            this.write_children(
                &LOG_TABLES,
                entry.id.as_bytes().as_slice(),
                &log_version_rows(&entry.versions),
            )
        })
    }

    fn load_log_entry(&self, id: LogId) -> Result<Option<LogMod>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT mod_id, correlation_id, idx, created_at, author, approved_by, signed_by,
                    checksum, signature, name, description, website, authors
             FROM log_mods WHERE log_id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Option<Vec<u8>>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Option<Vec<u8>>>(4)?,
                row.get::<_, Option<Vec<u8>>>(5)?,
                row.get::<_, Vec<u8>>(6)?,
                row.get::<_, Vec<u8>>(7)?,
                row.get::<_, Vec<u8>>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, Vec<u8>>(12)?,
            ))
        })?;

        let (
            mod_id,
            corr,
            idx,
            created_at,
            author,
            approved_by,
            signed_by,
            checksum,
            signature,
            name,
            desc,
            website,
            authors_blob,
        ) = match rows.next() {
            Some(row) => row?,
            None => return Ok(None),
        };

        let versions = self
            .load_children(&LOG_TABLES, id.as_bytes().as_slice())?
            .into_iter()
            .map(|v| LogModVersion {
                correlation_id: v.correlation_id,
                fields: v.fields,
                files: v
                    .files
                    .into_iter()
                    .map(|f| LogModFile {
                        correlation_id: f.correlation_id,
                        fields: f.fields,
                    })
                    .collect(),
            })
            .collect();

        Ok(Some(LogMod {
            id,
            correlation_id: CorrelationId::from_bytes(to_array::<16>(corr, "correlation_id")?),
            current: match mod_id {
                Some(b) => Some(ModId::from_bytes(to_array::<16>(b, "mod_id")?)),
                None => None,
            },
            index: idx as u32,
            created_at: Hlc::from_bytes(&to_array::<12>(created_at, "created_at")?)?,
            author: opt_actor(author)?,
            approved_by: opt_actor(approved_by)?,
            signed_by: ActorId::from_bytes(to_array::<32>(signed_by, "signed_by")?),
            checksum: BlobHash::from_bytes(to_array::<32>(checksum, "checksum")?),
            signature: Signature::from_bytes(to_array::<64>(signature, "signature")?),
            fields: ModFields {
                name,
                desc,
                website,
                authors: authors_from_blob(&authors_blob)?,
            },
            versions,
        }))
    }

    fn log_entries_for_mod(&self, id: ModId) -> Result<Vec<LogMod>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT log_id FROM log_mods WHERE mod_id = ?1 ORDER BY idx")?;
        let ids: Vec<Vec<u8>> = stmt
            .query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::new();
        for bytes in ids {
            let log_id = LogId::from_bytes(to_array::<16>(bytes, "log_id")?);
            match self.load_log_entry(log_id)? {
                Some(entry) => entries.push(entry),
                None => {
                    return Err(StorageError::NotFound(format!(
                        "history entry {log_id} vanished during load"
                    )));
                }
            }
        }
        Ok(entries)
    }

    fn log_entry_count(&self, id: ModId) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM log_mods WHERE mod_id = ?1",
            rusqlite::params![id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn save_draft(&mut self, draft: &DraftMod) -> Result<(), StorageError> {
        self.in_savepoint("save_draft", |this| {
            this.conn.execute(
                "INSERT INTO draft_mods (draft_id, correlation_id, owner, base_id, state,
                                         created_at, last_changed, ready_at, closed_at,
                                         name, description, website, authors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(draft_id) DO UPDATE SET
                     correlation_id = excluded.correlation_id,
                     owner = excluded.owner,
                     base_id = excluded.base_id,
                     state = excluded.state,
                     created_at = excluded.created_at,
                     last_changed = excluded.last_changed,
                     ready_at = excluded.ready_at,
                     closed_at = excluded.closed_at,
                     name = excluded.name,
                     description = excluded.description,
                     website = excluded.website,
                     authors = excluded.authors",
                rusqlite::params![
                    draft.id.as_bytes().as_slice(),
                    draft.correlation_id.as_bytes().as_slice(),
                    draft.owner.as_bytes().as_slice(),
                    draft.base.as_ref().map(|b| b.as_bytes().as_slice()),
                    draft.state.as_str(),
                    &draft.created_at.to_bytes()[..],
                    &draft.last_changed.to_bytes()[..],
                    draft.ready_at.as_ref().map(|h| h.to_bytes().to_vec()),
                    draft.closed_at.as_ref().map(|h| h.to_bytes().to_vec()),
                    draft.fields.name,
                    draft.fields.desc,
                    draft.fields.website,
                    authors_to_blob(&draft.fields.authors)?,
                ],
            )?;
            this.write_children(
                &DRAFT_TABLES,
                draft.id.as_bytes().as_slice(),
                &draft_version_rows(&draft.versions),
            )
        })
    }

    fn load_draft(&self, id: DraftId) -> Result<Option<DraftMod>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT correlation_id, owner, base_id, state, created_at, last_changed,
                    ready_at, closed_at, name, description, website, authors
             FROM draft_mods WHERE draft_id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, Option<Vec<u8>>>(6)?,
                row.get::<_, Option<Vec<u8>>>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, Vec<u8>>(11)?,
            ))
        })?;

        let (
            corr,
            owner,
            base_id,
            state,
            created_at,
            last_changed,
            ready_at,
            closed_at,
            name,
            desc,
            website,
            authors_blob,
        ) = match rows.next() {
            Some(row) => row?,
            None => return Ok(None),
        };

        let versions = self
            .load_children(&DRAFT_TABLES, id.as_bytes().as_slice())?
            .into_iter()
            .map(|v| DraftModVersion {
                correlation_id: v.correlation_id,
                fields: v.fields,
                files: v
                    .files
                    .into_iter()
                    .map(|f| DraftModFile {
                        correlation_id: f.correlation_id,
                        fields: f.fields,
                    })
                    .collect(),
            })
            .collect();

        Ok(Some(DraftMod {
            id,
            correlation_id: CorrelationId::from_bytes(to_array::<16>(corr, "correlation_id")?),
            owner: ActorId::from_bytes(to_array::<32>(owner, "owner")?),
            base: match base_id {
                Some(b) => Some(LogId::from_bytes(to_array::<16>(b, "base_id")?)),
                None => None,
            },
            state: DraftState::parse(&state)?,
            created_at: Hlc::from_bytes(&to_array::<12>(created_at, "created_at")?)?,
            last_changed: Hlc::from_bytes(&to_array::<12>(last_changed, "last_changed")?)?,
            ready_at: opt_hlc(ready_at)?,
            closed_at: opt_hlc(closed_at)?,
            fields: ModFields {
                name,
                desc,
                website,
                authors: authors_from_blob(&authors_blob)?,
            },
            versions,
        }))
    }

    fn delete_draft(&mut self, id: DraftId) -> Result<(), StorageError> {
        self.in_savepoint("delete_draft", |this| {
            let id_bytes = id.as_bytes().as_slice();
            this.conn.execute(
                "DELETE FROM draft_mod_files WHERE draft_id = ?1",
                rusqlite::params![id_bytes],
            )?;
            this.conn.execute(
                "DELETE FROM draft_mod_versions WHERE draft_id = ?1",
                rusqlite::params![id_bytes],
            )?;
            this.conn.execute(
                "DELETE FROM draft_mods WHERE draft_id = ?1",
                rusqlite::params![id_bytes],
            )?;
            Ok(())
        })
    }

    fn list_drafts(&self) -> Result<Vec<DraftMod>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT draft_id FROM draft_mods ORDER BY created_at")?;
        let ids: Vec<Vec<u8>> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut drafts = Vec::new();
        for bytes in ids {
            let id = DraftId::from_bytes(to_array::<16>(bytes, "draft_id")?);
            if let Some(d) = self.load_draft(id)? {
                drafts.push(d);
            }
        }
        Ok(drafts)
    }

    fn insert_author(&mut self, author: &Author) -> Result<(), StorageError> {
        let result = self.conn.execute(
            "INSERT INTO authors (author_id, name, description, website) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                author.id.as_bytes().as_slice(),
                author.name,
                author.desc,
                author.website,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ConstraintViolation(format!(
                    "author already exists: {}",
                    author.name
                )))
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn get_author(&self, id: AuthorId) -> Result<Option<Author>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, description, website FROM authors WHERE author_id = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        match rows.next() {
            Some(row) => {
                let (name, desc, website) = row?;
                Ok(Some(Author {
                    id,
                    name,
                    desc,
                    website,
                }))
            }
            None => Ok(None),
        }
    }

    fn author_by_name(&self, name: &str) -> Result<Option<Author>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT author_id, description, website FROM authors WHERE name = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![name], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        match rows.next() {
            Some(row) => {
                let (id_bytes, desc, website) = row?;
                Ok(Some(Author {
                    id: AuthorId::from_bytes(to_array::<16>(id_bytes, "author_id")?),
                    name: name.to_string(),
                    desc,
                    website,
                }))
            }
            None => Ok(None),
        }
    }

    fn list_authors(&self) -> Result<Vec<Author>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT author_id, name, description, website FROM authors ORDER BY name")?;
        let authors = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        authors
            .into_iter()
            .map(|(id_bytes, name, desc, website)| {
                Ok(Author {
                    id: AuthorId::from_bytes(to_array::<16>(id_bytes, "author_id")?),
                    name,
                    desc,
                    website,
                })
            })
            .collect()
    }

    fn insert_game_version(&mut self, vsn: &GameVersion) -> Result<(), StorageError> {
        let result = self.conn.execute(
            "INSERT INTO game_versions (game_vsn_id, name) VALUES (?1, ?2)",
            rusqlite::params![vsn.id.as_bytes().as_slice(), vsn.name],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ConstraintViolation(format!(
                    "game version already exists: {}",
                    vsn.name
                )))
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn get_game_version(&self, id: GameVersionId) -> Result<Option<GameVersion>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM game_versions WHERE game_vsn_id = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
            row.get::<_, String>(0)
        })?;
        match rows.next() {
            Some(name) => Ok(Some(GameVersion { id, name: name? })),
            None => Ok(None),
        }
    }

    fn list_game_versions(&self) -> Result<Vec<GameVersion>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT game_vsn_id, name FROM game_versions ORDER BY name")?;
        let versions = stmt
            .query_map([], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        versions
            .into_iter()
            .map(|(id_bytes, name)| {
                Ok(GameVersion {
                    id: GameVersionId::from_bytes(to_array::<16>(id_bytes, "game_vsn_id")?),
                    name,
                })
            })
            .collect()
    }

    fn put_file(
        &mut self,
        bytes: &[u8],
        declared_name: &str,
        expected_hash: BlobHash,
    ) -> Result<StoredFile, StorageError> {
        let computed = BlobHash::from_bytes(*blake3::hash(bytes).as_bytes());
        if computed != expected_hash {
            return Err(StorageError::IntegrityFailure {
                declared: expected_hash.to_string(),
                computed: computed.to_string(),
            });
        }

        // Content-addressed: identical bytes already stored are a no-op.
        if let Some(existing) = self.file_meta(computed)? {
            return Ok(existing);
        }

        let meta = StoredFile {
            id: StoredFileId::new(),
            name: declared_name.to_string(),
            hash: computed,
            length: bytes.len() as u64,
        };
        self.conn.execute(
            "INSERT INTO stored_files (hash, file_id, name, length, content) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                meta.hash.as_bytes().as_slice(),
                meta.id.as_bytes().as_slice(),
                meta.name,
                meta.length as i64,
                bytes,
            ],
        )?;
        Ok(meta)
    }

    fn get_file(&self, hash: BlobHash) -> Result<Option<(StoredFile, Vec<u8>)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT file_id, name, length, content FROM stored_files WHERE hash = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![hash.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;
        match rows.next() {
            Some(row) => {
                let (id_bytes, name, length, content) = row?;
                Ok(Some((
                    StoredFile {
                        id: StoredFileId::from_bytes(to_array::<16>(id_bytes, "file_id")?),
                        name,
                        hash,
                        length: length as u64,
                    },
                    content,
                )))
            }
            None => Ok(None),
        }
    }

    fn file_meta(&self, hash: BlobHash) -> Result<Option<StoredFile>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_id, name, length FROM stored_files WHERE hash = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![hash.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        match rows.next() {
            Some(row) => {
                let (id_bytes, name, length) = row?;
                Ok(Some(StoredFile {
                    id: StoredFileId::from_bytes(to_array::<16>(id_bytes, "file_id")?),
                    name,
                    hash,
                    length: length as u64,
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mod() -> Mod {
        let mut m = Mod::blank("journeymap");
        m.fields.name = "JourneyMap".into();
        m.fields.desc = Some("Real-time mapping".into());
        m.fields.authors = [AuthorId::new()].into();
        let mut vsn = ModVersion::blank();
        vsn.fields.name = "5.1.4".into();
        vsn.fields.game_versions = [GameVersionId::new()].into();
        let mut file = ModFile::blank();
        file.fields.filename = "journeymap-5.1.4.jar".into();
        file.fields.stored = Some(BlobHash::from_bytes([7; 32]));
        vsn.files.push(file);
        m.versions.push(vsn);
        m
    }

    #[test]
    fn mod_save_load_roundtrip() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let m = sample_mod();
        storage.save_mod(&m).unwrap();

        let loaded = storage.load_mod(m.id).unwrap().unwrap();
        assert_eq!(loaded.slug, "journeymap");
        assert_eq!(loaded.correlation_id, m.correlation_id);
        assert_eq!(loaded.fields, m.fields);
        assert_eq!(loaded.versions.len(), 1);
        assert_eq!(loaded.versions[0].fields, m.versions[0].fields);
        assert_eq!(loaded.versions[0].files[0].fields, m.versions[0].files[0].fields);
    }

    #[test]
    fn save_mod_replaces_children() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let mut m = sample_mod();
        storage.save_mod(&m).unwrap();

        m.versions.clear();
        storage.save_mod(&m).unwrap();

        let loaded = storage.load_mod(m.id).unwrap().unwrap();
        assert!(loaded.versions.is_empty());
    }

    #[test]
    fn slug_uniqueness_enforced() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.save_mod(&sample_mod()).unwrap();
        // A different mod with the same slug must be rejected.
        let result = storage.save_mod(&sample_mod());
        assert!(result.is_err());
    }

    #[test]
    fn put_file_verifies_hash() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let bytes = b"jar contents";
        let good = BlobHash::of(bytes);
        let bad = BlobHash::from_bytes([0xFF; 32]);

        let err = storage.put_file(bytes, "mod.jar", bad);
        assert!(matches!(err, Err(StorageError::IntegrityFailure { .. })));

        let meta = storage.put_file(bytes, "mod.jar", good).unwrap();
        assert_eq!(meta.hash, good);
        assert_eq!(meta.length, bytes.len() as u64);

        // Idempotent for identical content.
        let again = storage.put_file(bytes, "renamed.jar", good).unwrap();
        assert_eq!(again.id, meta.id);

        let (_, content) = storage.get_file(good).unwrap().unwrap();
        assert_eq!(content, bytes);
    }

    #[test]
    fn on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let path = path.to_str().unwrap();

        let m = sample_mod();
        {
            let mut storage = SqliteStorage::open(path).unwrap();
            storage.save_mod(&m).unwrap();
        }
        let storage = SqliteStorage::open(path).unwrap();
        let loaded = storage.load_mod(m.id).unwrap().unwrap();
        assert_eq!(loaded.fields.name, "JourneyMap");
    }
}
