pub mod error;
pub mod history;
pub mod notify;

pub use error::ArchiveError;
pub use history::{HistoryEntry, HistoryIter, gen_diffs};
pub use notify::{NotifyError, NotifyEvent, Notifier, NullNotifier};

use modarch_core::diff::{TreeDiff, apply_diff, diff};
use modarch_core::hlc::HlcClock;
use modarch_core::identity::{ActorIdentity, UserRole};
use modarch_core::ids::*;
use modarch_core::model::{
    Author, DraftMod, DraftModFile, DraftState, GameVersion, LogMod, Mod,
};
use modarch_core::node::{EntityNode, copy_into};
use modarch_storage::{SqliteStorage, Storage, StorageError};

/// The acting principal for one request: who is doing this, and with what
/// role. Authentication happens elsewhere; the archive only records and
/// compares the identity, and signs history entries with it.
pub struct Session {
    pub identity: ActorIdentity,
    pub role: UserRole,
}

impl Session {
    pub fn new(identity: ActorIdentity, role: UserRole) -> Self {
        Self { identity, role }
    }

    pub fn actor_id(&self) -> ActorId {
        self.identity.actor_id()
    }
}

/// The archive service: draft lifecycle, merge, history, and revert over one
/// backing store.
///
/// Compound operations (merge, revert) run inside a `BEGIN IMMEDIATE`
/// envelope so the live mutation and its history entry commit or roll back
/// as one unit; storage methods nest inside it via savepoints.
pub struct Archive {
    clock: HlcClock,
    storage: SqliteStorage,
    notifier: Box<dyn Notifier>,
}

impl Archive {
    pub fn new(storage: SqliteStorage) -> Self {
        Self::with_notifier(storage, Box::new(NullNotifier))
    }

    pub fn with_notifier(storage: SqliteStorage, notifier: Box<dyn Notifier>) -> Self {
        Self {
            clock: HlcClock::new(),
            storage,
            notifier,
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    /// Execute a batch SQL statement on the underlying connection, mapping errors.
    fn exec_batch(&self, sql: &str) -> Result<(), ArchiveError> {
        self.storage
            .conn()
            .execute_batch(sql)
            .map_err(|e| ArchiveError::Storage(StorageError::Sqlite(e)))
    }

    fn require_role(&self, session: &Session, required: UserRole) -> Result<(), ArchiveError> {
        if session.role >= required {
            Ok(())
        } else {
            Err(ArchiveError::PermissionDenied { required })
        }
    }

    /// Edits are restricted to the draft's owner; admins may step in.
    fn require_edit_access(&self, session: &Session, draft: &DraftMod) -> Result<(), ArchiveError> {
        if draft.owner == session.actor_id() || session.role >= UserRole::Admin {
            Ok(())
        } else {
            Err(ArchiveError::NotDraftOwner)
        }
    }

    /// Lifecycle actions are open to the owner and to moderators.
    fn require_lifecycle_access(
        &self,
        session: &Session,
        draft: &DraftMod,
    ) -> Result<(), ArchiveError> {
        if draft.owner == session.actor_id() || session.role >= UserRole::Moderator {
            Ok(())
        } else {
            Err(ArchiveError::NotDraftOwner)
        }
    }

    fn load_draft_required(&self, id: DraftId) -> Result<DraftMod, ArchiveError> {
        self.storage
            .load_draft(id)?
            .ok_or_else(|| ArchiveError::DraftNotFound(id.to_string()))
    }

    fn load_mod_required(&self, id: ModId) -> Result<Mod, ArchiveError> {
        self.storage
            .load_mod(id)?
            .ok_or_else(|| ArchiveError::ModNotFound(id.to_string()))
    }

    fn load_log_required(&self, id: LogId) -> Result<LogMod, ArchiveError> {
        self.storage
            .load_log_entry(id)?
            .ok_or_else(|| ArchiveError::LogEntryNotFound(id.to_string()))
    }

    fn emit(&mut self, event: NotifyEvent) {
        if let Err(e) = self.notifier.notify(&event) {
            tracing::warn!(error = %e, "notification delivery failed");
        }
    }

    // ========================================================================
    // Shared reference records
    // ========================================================================

    pub fn create_author(
        &mut self,
        session: &Session,
        name: &str,
        desc: Option<&str>,
        website: Option<&str>,
    ) -> Result<Author, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let mut author = Author::new(name);
        author.desc = desc.map(str::to_string);
        author.website = website.map(str::to_string);
        self.storage.insert_author(&author)?;
        Ok(author)
    }

    pub fn create_game_version(
        &mut self,
        session: &Session,
        name: &str,
    ) -> Result<GameVersion, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let vsn = GameVersion::new(name);
        self.storage.insert_game_version(&vsn)?;
        Ok(vsn)
    }

    pub fn get_author(&self, id: AuthorId) -> Result<Option<Author>, ArchiveError> {
        Ok(self.storage.get_author(id)?)
    }

    pub fn author_by_name(&self, name: &str) -> Result<Option<Author>, ArchiveError> {
        Ok(self.storage.author_by_name(name)?)
    }

    pub fn list_authors(&self) -> Result<Vec<Author>, ArchiveError> {
        Ok(self.storage.list_authors()?)
    }

    pub fn get_game_version(&self, id: GameVersionId) -> Result<Option<GameVersion>, ArchiveError> {
        Ok(self.storage.get_game_version(id)?)
    }

    pub fn list_game_versions(&self) -> Result<Vec<GameVersion>, ArchiveError> {
        Ok(self.storage.list_game_versions()?)
    }

    // ========================================================================
    // Browsing
    // ========================================================================

    pub fn get_mod(&self, id: ModId) -> Result<Option<Mod>, ArchiveError> {
        Ok(self.storage.load_mod(id)?)
    }

    pub fn mod_by_slug(&self, slug: &str) -> Result<Option<Mod>, ArchiveError> {
        match self.storage.mod_id_by_slug(slug)? {
            Some(id) => Ok(self.storage.load_mod(id)?),
            None => Ok(None),
        }
    }

    pub fn list_mods(&self, include_delisted: bool) -> Result<Vec<Mod>, ArchiveError> {
        Ok(self.storage.list_mods(include_delisted)?)
    }

    /// Filtered listing for the browse pages. All filters are optional and
    /// conjunctive; keyword matching is case-insensitive on the mod name.
    pub fn search_mods(
        &self,
        keyword: Option<&str>,
        author: Option<AuthorId>,
        game_version: Option<GameVersionId>,
        include_delisted: bool,
    ) -> Result<Vec<Mod>, ArchiveError> {
        let mods = self.storage.list_mods(include_delisted)?;
        Ok(mods
            .into_iter()
            .filter(|m| {
                keyword.is_none_or(|k| {
                    m.fields.name.to_lowercase().contains(&k.to_lowercase())
                })
            })
            .filter(|m| author.is_none_or(|a| m.fields.authors.contains(&a)))
            .filter(|m| {
                game_version.is_none_or(|g| {
                    m.versions.iter().any(|v| v.fields.game_versions.contains(&g))
                })
            })
            .collect())
    }

    pub fn get_draft(&self, id: DraftId) -> Result<Option<DraftMod>, ArchiveError> {
        Ok(self.storage.load_draft(id)?)
    }

    pub fn list_drafts(&self) -> Result<Vec<DraftMod>, ArchiveError> {
        Ok(self.storage.list_drafts()?)
    }

    /// Delist or relist a mod. Moderation metadata only; leaves the content
    /// tree and its history untouched.
    pub fn set_redist(
        &mut self,
        session: &Session,
        mod_id: ModId,
        redist: bool,
    ) -> Result<Mod, ArchiveError> {
        self.require_role(session, UserRole::Moderator)?;
        let mut live = self.load_mod_required(mod_id)?;
        live.redist = redist;
        self.storage.save_mod(&live)?;
        Ok(live)
    }

    /// Remove a live mod from the catalog entirely. Its history entries
    /// remain, with their live pointer now stale.
    pub fn delete_mod(&mut self, session: &Session, mod_id: ModId) -> Result<(), ArchiveError> {
        self.require_role(session, UserRole::Admin)?;
        self.load_mod_required(mod_id)?;
        self.storage.delete_mod(mod_id)?;
        Ok(())
    }

    // ========================================================================
    // Draft creation & editing
    // ========================================================================

    /// Start a draft for a brand-new mod. It has no base; merging it will
    /// publish a new live mod under a caller-supplied slug.
    pub fn new_draft(&mut self, session: &Session, name: &str) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let now = self.clock.tick()?;
        let mut draft = DraftMod::blank(session.actor_id(), now);
        draft.fields.name = name.to_string();
        self.storage.save_draft(&draft)?;
        Ok(draft)
    }

    /// Branch a draft of changes from the tip of a mod's history. The draft's
    /// base pointer records exactly which snapshot the edits started from.
    pub fn start_draft(
        &mut self,
        session: &Session,
        mod_id: ModId,
    ) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let entries = self.storage.log_entries_for_mod(mod_id)?;
        let tip = entries
            .last()
            .ok_or_else(|| ArchiveError::LogEntryNotFound(format!("mod {mod_id} has no history")))?;

        let now = self.clock.tick()?;
        let mut draft = DraftMod::blank(session.actor_id(), now);
        copy_into(tip, &mut draft)?;
        draft.base = Some(tip.id);
        self.storage.save_draft(&draft)?;
        Ok(draft)
    }

    /// The changes this draft proposes, relative to its base snapshot. A
    /// baseless draft diffs against an empty tree, so a new mod shows up as
    /// everything-added.
    pub fn draft_diff(&self, draft_id: DraftId) -> Result<TreeDiff, ArchiveError> {
        let draft = self.load_draft_required(draft_id)?;
        self.diff_against_base(&draft)
    }

    fn diff_against_base(&self, draft: &DraftMod) -> Result<TreeDiff, ArchiveError> {
        match draft.base {
            Some(log_id) => {
                let base = self.load_log_required(log_id)?;
                Ok(diff(&base, draft))
            }
            None => Ok(diff(&LogMod::blank(), draft)),
        }
    }

    /// Persist edits to a draft's content tree.
    ///
    /// Callers mutate the tree through ordinary field access and hand it
    /// back; lifecycle fields (owner, base, state, timestamps) are engine
    /// owned and taken from the stored row, not from the caller.
    pub fn save_draft(
        &mut self,
        session: &Session,
        draft: &DraftMod,
    ) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let stored = self.load_draft_required(draft.id)?;
        self.require_edit_access(session, &stored)?;
        if stored.state != DraftState::Editable {
            return Err(ArchiveError::InvalidTransition {
                from: stored.state,
                action: "edit",
            });
        }

        let mut updated = draft.clone();
        updated.owner = stored.owner;
        updated.base = stored.base;
        updated.state = stored.state;
        updated.created_at = stored.created_at;
        updated.ready_at = stored.ready_at;
        updated.closed_at = stored.closed_at;
        updated.last_changed = self.clock.tick()?;
        self.storage.save_draft(&updated)?;
        Ok(updated)
    }

    /// Upload a file into the content store and attach it to one of the
    /// draft's versions. The store recomputes the hash and rejects content
    /// that does not match what the uploader declared.
    pub fn attach_file(
        &mut self,
        session: &Session,
        draft_id: DraftId,
        version: CorrelationId,
        declared_name: &str,
        bytes: &[u8],
        expected_hash: BlobHash,
    ) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let mut draft = self.load_draft_required(draft_id)?;
        self.require_edit_access(session, &draft)?;
        if draft.state != DraftState::Editable {
            return Err(ArchiveError::InvalidTransition {
                from: draft.state,
                action: "edit",
            });
        }

        let stored = self.storage.put_file(bytes, declared_name, expected_hash)?;

        let vsn = draft
            .child_mut(version)
            .ok_or_else(|| ArchiveError::VersionNotFound(version.to_string()))?;
        let mut file = DraftModFile::blank();
        file.fields.filename = stored.name.clone();
        file.fields.stored = Some(stored.hash);
        vsn.files.push(file);

        draft.last_changed = self.clock.tick()?;
        self.storage.save_draft(&draft)?;
        Ok(draft)
    }

    // ========================================================================
    // Draft lifecycle
    // ========================================================================

    /// Flag a draft as ready for moderator review. Rejected when the draft
    /// proposes no change against its base. Ready drafts are frozen; use
    /// `unready` to resume editing.
    pub fn mark_ready(
        &mut self,
        session: &Session,
        draft_id: DraftId,
    ) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let mut draft = self.load_draft_required(draft_id)?;
        self.require_edit_access(session, &draft)?;
        if draft.state != DraftState::Editable {
            return Err(ArchiveError::InvalidTransition {
                from: draft.state,
                action: "mark ready",
            });
        }
        if self.diff_against_base(&draft)?.is_empty() {
            return Err(ArchiveError::NothingToMerge);
        }

        draft.state = DraftState::Ready;
        draft.ready_at = Some(self.clock.tick()?);
        self.storage.save_draft(&draft)?;

        self.emit(NotifyEvent::DraftReady {
            draft: draft.id,
            name: draft.fields.name.clone(),
            owner: draft.owner,
        });
        Ok(draft)
    }

    pub fn unready(
        &mut self,
        session: &Session,
        draft_id: DraftId,
    ) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let mut draft = self.load_draft_required(draft_id)?;
        self.require_lifecycle_access(session, &draft)?;
        if draft.state != DraftState::Ready {
            return Err(ArchiveError::InvalidTransition {
                from: draft.state,
                action: "unready",
            });
        }

        draft.state = DraftState::Editable;
        draft.ready_at = None;
        self.storage.save_draft(&draft)?;
        Ok(draft)
    }

    /// Shelve a draft without merging it. Never legal once merged: merging
    /// already closed it for good.
    pub fn archive_draft(
        &mut self,
        session: &Session,
        draft_id: DraftId,
    ) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let mut draft = self.load_draft_required(draft_id)?;
        self.require_lifecycle_access(session, &draft)?;
        if draft.state != DraftState::Editable && draft.state != DraftState::Ready {
            return Err(ArchiveError::InvalidTransition {
                from: draft.state,
                action: "archive",
            });
        }

        draft.state = DraftState::Archived;
        draft.ready_at = None;
        draft.closed_at = Some(self.clock.tick()?);
        self.storage.save_draft(&draft)?;
        Ok(draft)
    }

    /// Reopen a shelved draft. Only archived drafts qualify; merged drafts
    /// are permanently closed.
    pub fn unarchive_draft(
        &mut self,
        session: &Session,
        draft_id: DraftId,
    ) -> Result<DraftMod, ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let mut draft = self.load_draft_required(draft_id)?;
        self.require_lifecycle_access(session, &draft)?;
        if draft.state != DraftState::Archived {
            return Err(ArchiveError::InvalidTransition {
                from: draft.state,
                action: "unarchive",
            });
        }

        draft.state = DraftState::Editable;
        draft.closed_at = None;
        self.storage.save_draft(&draft)?;
        Ok(draft)
    }

    /// Drop a draft entirely. Only allowed from the archived state, so
    /// deletion is always a deliberate two-step.
    pub fn delete_draft(
        &mut self,
        session: &Session,
        draft_id: DraftId,
    ) -> Result<(), ArchiveError> {
        self.require_role(session, UserRole::Archivist)?;
        let draft = self.load_draft_required(draft_id)?;
        self.require_lifecycle_access(session, &draft)?;
        if draft.state != DraftState::Archived {
            return Err(ArchiveError::InvalidTransition {
                from: draft.state,
                action: "delete",
            });
        }
        self.storage.delete_draft(draft_id)?;
        Ok(())
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Reconcile a draft into the live catalog. Moderator only.
    ///
    /// A draft with a base patches the current live mod with the diff against
    /// that base (last writer wins per field, drift tolerated) and appends a
    /// history entry attributing the change to the draft's owner and the
    /// approval to the merging moderator. A baseless draft is promoted to a
    /// brand-new live mod under `slug`. Either way the live write and the
    /// history append commit atomically, and the draft lands in the merged
    /// state.
    pub fn merge_draft(
        &mut self,
        session: &Session,
        draft_id: DraftId,
        slug: Option<&str>,
    ) -> Result<Mod, ArchiveError> {
        self.require_role(session, UserRole::Moderator)?;
        let mut draft = self.load_draft_required(draft_id)?;
        if draft.state != DraftState::Editable && draft.state != DraftState::Ready {
            return Err(ArchiveError::InvalidTransition {
                from: draft.state,
                action: "merge",
            });
        }

        let live = match draft.base {
            Some(base_id) => {
                let base = self.load_log_required(base_id)?;
                let mod_id = base.current.ok_or_else(|| {
                    ArchiveError::ModNotFound(format!("mod for history entry {base_id} is gone"))
                })?;
                let change = diff(&base, &draft);
                if change.is_empty() {
                    return Err(ArchiveError::NothingToMerge);
                }

                self.exec_batch("BEGIN IMMEDIATE")?;
                let result = (|| -> Result<Mod, ArchiveError> {
                    let mut live = self.load_mod_required(mod_id)?;
                    apply_diff(&mut live, &change)?;
                    self.storage.save_mod(&live)?;
                    self.finish_merge(session, &mut draft, &live)?;
                    Ok(live)
                })();
                self.commit_or_rollback(result)?
            }
            None => {
                let slug = slug.ok_or(ArchiveError::SlugRequired)?;
                if self.storage.mod_id_by_slug(slug)?.is_some() {
                    return Err(ArchiveError::SlugTaken(slug.to_string()));
                }

                self.exec_batch("BEGIN IMMEDIATE")?;
                let result = (|| -> Result<Mod, ArchiveError> {
                    let mut live = Mod::blank(slug);
                    copy_into(&draft, &mut live)?;
                    self.storage.save_mod(&live)?;
                    self.finish_merge(session, &mut draft, &live)?;
                    Ok(live)
                })();
                self.commit_or_rollback(result)?
            }
        };

        self.emit(NotifyEvent::DraftMerged {
            draft: draft.id,
            merged_into: live.id,
            name: live.fields.name.clone(),
            owner: draft.owner,
        });
        Ok(live)
    }

    /// Append the post-merge history entry and close out the draft. Runs
    /// inside the caller's transaction envelope.
    fn finish_merge(
        &mut self,
        session: &Session,
        draft: &mut DraftMod,
        live: &Mod,
    ) -> Result<(), ArchiveError> {
        let now = self.clock.tick()?;
        let index = self.storage.log_entry_count(live.id)?;
        let entry = LogMod::snapshot(
            live,
            index,
            now,
            Some(draft.owner),
            Some(session.actor_id()),
            &session.identity,
        )?;
        self.storage.append_log_entry(&entry)?;

        draft.state = DraftState::Merged;
        draft.ready_at = None;
        draft.closed_at = Some(now);
        self.storage.save_draft(draft)?;
        Ok(())
    }

    fn commit_or_rollback(&self, result: Result<Mod, ArchiveError>) -> Result<Mod, ArchiveError> {
        match result {
            Ok(live) => {
                self.exec_batch("COMMIT")?;
                Ok(live)
            }
            Err(e) => {
                let _ = self.exec_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    // ========================================================================
    // History & revert
    // ========================================================================

    /// Walk a mod's history as (entry, diff-from-predecessor) pairs.
    pub fn history(&self, mod_id: ModId) -> Result<HistoryIter, ArchiveError> {
        let entries = self.storage.log_entries_for_mod(mod_id)?;
        Ok(gen_diffs(entries))
    }

    /// Roll a live mod back to the state captured by one of its history
    /// entries. This is a full-tree overwrite, not a patch, and it records
    /// itself as a fresh history entry.
    ///
    /// Passing an entry that belongs to a different mod is a programming
    /// error in the caller and fails hard.
    pub fn revert_mod(
        &mut self,
        session: &Session,
        mod_id: ModId,
        log_id: LogId,
    ) -> Result<Mod, ArchiveError> {
        self.require_role(session, UserRole::Moderator)?;
        let entry = self.load_log_required(log_id)?;
        if entry.current != Some(mod_id) {
            return Err(ArchiveError::MismatchedEntity { log_id, mod_id });
        }

        self.exec_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<Mod, ArchiveError> {
            let mut live = self.load_mod_required(mod_id)?;
            copy_into(&entry, &mut live)?;
            self.storage.save_mod(&live)?;

            let now = self.clock.tick()?;
            let index = self.storage.log_entry_count(mod_id)?;
            let new_entry = LogMod::snapshot(
                &live,
                index,
                now,
                Some(session.actor_id()),
                None,
                &session.identity,
            )?;
            self.storage.append_log_entry(&new_entry)?;
            Ok(live)
        })();
        self.commit_or_rollback(result)
    }
}
