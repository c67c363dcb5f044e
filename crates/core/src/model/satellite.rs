use crate::ids::{AuthorId, BlobHash, GameVersionId, StoredFileId};

/// A mod author. Shared by reference across every kind of the entity tree;
/// never cloned per copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
    pub desc: Option<String>,
    pub website: Option<String>,
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            id: AuthorId::new(),
            name: name.to_string(),
            desc: None,
            website: None,
        }
    }
}

/// A game release a mod version can target. Shared by reference like
/// `Author`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameVersion {
    pub id: GameVersionId,
    pub name: String,
}

impl GameVersion {
    pub fn new(name: &str) -> Self {
        Self {
            id: GameVersionId::new(),
            name: name.to_string(),
        }
    }
}

/// Metadata for content held in the archive's file store, keyed by blake3
/// hash. File entities reference this by hash; the bytes live in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: StoredFileId,
    pub name: String,
    pub hash: BlobHash,
    pub length: u64,
}
