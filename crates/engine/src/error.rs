use modarch_core::CoreError;
use modarch_core::identity::UserRole;
use modarch_core::ids::{LogId, ModId};
use modarch_core::model::DraftState;
use modarch_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("mod not found: {0}")]
    ModNotFound(String),

    #[error("draft not found: {0}")]
    DraftNotFound(String),

    #[error("history entry not found: {0}")]
    LogEntryNotFound(String),

    #[error("version not found in draft: {0}")]
    VersionNotFound(String),

    #[error("this action requires the {required} role")]
    PermissionDenied { required: UserRole },

    #[error("only the draft's owner may do this")]
    NotDraftOwner,

    #[error("cannot {action} a draft in the {from} state")]
    InvalidTransition {
        from: DraftState,
        action: &'static str,
    },

    #[error("draft contains no changes")]
    NothingToMerge,

    #[error("a slug is required to publish a new mod")]
    SlugRequired,

    #[error("slug already in use: {0}")]
    SlugTaken(String),

    #[error("history entry {log_id} does not belong to mod {mod_id}")]
    MismatchedEntity { log_id: LogId, mod_id: ModId },
}
