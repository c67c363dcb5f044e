use modarch_core::ids::{AuthorId, BlobHash, DraftId, GameVersionId, LogId, ModId};
use modarch_core::model::{Author, DraftMod, GameVersion, LogMod, Mod, StoredFile};

use crate::error::StorageError;

/// The persistence boundary the engine talks to.
///
/// Loads return fully hydrated trees; saves replace a tree's child rows
/// wholesale. Callers that need several operations to commit or fail as one
/// unit wrap them in a transaction on the underlying connection; the
/// individual methods nest correctly inside one via savepoints.
pub trait Storage {
    // Live mods
    fn save_mod(&mut self, subject: &Mod) -> Result<(), StorageError>;
    fn load_mod(&self, id: ModId) -> Result<Option<Mod>, StorageError>;
    fn mod_id_by_slug(&self, slug: &str) -> Result<Option<ModId>, StorageError>;
    fn list_mods(&self, include_delisted: bool) -> Result<Vec<Mod>, StorageError>;
    fn delete_mod(&mut self, id: ModId) -> Result<(), StorageError>;

    // History entries
    fn append_log_entry(&mut self, entry: &LogMod) -> Result<(), StorageError>;
    fn load_log_entry(&self, id: LogId) -> Result<Option<LogMod>, StorageError>;
    fn log_entries_for_mod(&self, id: ModId) -> Result<Vec<LogMod>, StorageError>;
    fn log_entry_count(&self, id: ModId) -> Result<u32, StorageError>;

    // Drafts
    fn save_draft(&mut self, draft: &DraftMod) -> Result<(), StorageError>;
    fn load_draft(&self, id: DraftId) -> Result<Option<DraftMod>, StorageError>;
    fn delete_draft(&mut self, id: DraftId) -> Result<(), StorageError>;
    fn list_drafts(&self) -> Result<Vec<DraftMod>, StorageError>;

    // Shared reference records
    fn insert_author(&mut self, author: &Author) -> Result<(), StorageError>;
    fn get_author(&self, id: AuthorId) -> Result<Option<Author>, StorageError>;
    fn author_by_name(&self, name: &str) -> Result<Option<Author>, StorageError>;
    fn list_authors(&self) -> Result<Vec<Author>, StorageError>;
    fn insert_game_version(&mut self, vsn: &GameVersion) -> Result<(), StorageError>;
    fn get_game_version(&self, id: GameVersionId) -> Result<Option<GameVersion>, StorageError>;
    fn list_game_versions(&self) -> Result<Vec<GameVersion>, StorageError>;

    // Content store
    fn put_file(
        &mut self,
        bytes: &[u8],
        declared_name: &str,
        expected_hash: BlobHash,
    ) -> Result<StoredFile, StorageError>;
    fn get_file(&self, hash: BlobHash) -> Result<Option<(StoredFile, Vec<u8>)>, StorageError>;
    fn file_meta(&self, hash: BlobHash) -> Result<Option<StoredFile>, StorageError>;
}
