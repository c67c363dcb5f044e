use modarch_core::identity::UserRole;
use modarch_core::ids::BlobHash;
use modarch_core::model::DraftState;
use modarch_engine::{Archive, ArchiveError, NotifyEvent};
use modarch_harness::{FailingNotifier, TestArchive};
use modarch_storage::{SqliteStorage, Storage, StorageError};

// ============================================================================
// Ready gate
// ============================================================================

#[test]
fn ready_rejects_a_draft_with_no_changes() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;

    let draft = t.archive.start_draft(&t.archivist, m.id)?;
    let result = t.archive.mark_ready(&t.archivist, draft.id);
    assert!(matches!(result, Err(ArchiveError::NothingToMerge)));

    // The draft is untouched by the rejected transition.
    let stored = t.archive.get_draft(draft.id)?.unwrap();
    assert_eq!(stored.state, DraftState::Editable);
    Ok(())
}

#[test]
fn ready_succeeds_after_an_edit() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;

    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    draft.fields.desc = Some("updated description".into());
    let draft = t.archive.save_draft(&t.archivist, &draft)?;

    let draft = t.archive.mark_ready(&t.archivist, draft.id)?;
    assert_eq!(draft.state, DraftState::Ready);
    assert!(draft.ready_at.is_some());

    let events = t.events.events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, NotifyEvent::DraftReady { draft: d, .. } if *d == draft.id)),
        "expected a DraftReady notification"
    );
    Ok(())
}

#[test]
fn ready_drafts_are_frozen_until_unreadied() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;

    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    draft.fields.desc = Some("v2".into());
    let draft = t.archive.save_draft(&t.archivist, &draft)?;
    let mut draft = t.archive.mark_ready(&t.archivist, draft.id)?;

    draft.fields.desc = Some("sneaky edit".into());
    let result = t.archive.save_draft(&t.archivist, &draft);
    assert!(matches!(
        result,
        Err(ArchiveError::InvalidTransition { from: DraftState::Ready, .. })
    ));

    let draft = t.archive.unready(&t.archivist, draft.id)?;
    assert_eq!(draft.state, DraftState::Editable);
    assert!(draft.ready_at.is_none());

    let mut draft = draft;
    draft.fields.desc = Some("legitimate edit".into());
    t.archive.save_draft(&t.archivist, &draft)?;
    Ok(())
}

// ============================================================================
// Archive / unarchive
// ============================================================================

#[test]
fn archive_and_unarchive_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let draft = t.archive.new_draft(&t.archivist, "Shelved")?;

    let draft = t.archive.archive_draft(&t.archivist, draft.id)?;
    assert_eq!(draft.state, DraftState::Archived);
    assert!(draft.closed_at.is_some());

    // Archived drafts reject edits and readying.
    let result = t.archive.save_draft(&t.archivist, &draft);
    assert!(matches!(result, Err(ArchiveError::InvalidTransition { .. })));
    let result = t.archive.mark_ready(&t.archivist, draft.id);
    assert!(matches!(result, Err(ArchiveError::InvalidTransition { .. })));

    let draft = t.archive.unarchive_draft(&t.archivist, draft.id)?;
    assert_eq!(draft.state, DraftState::Editable);
    assert!(draft.closed_at.is_none());
    Ok(())
}

#[test]
fn ready_drafts_can_be_archived() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let draft = t.archive.new_draft(&t.archivist, "NewMod")?;
    let draft = t.archive.mark_ready(&t.archivist, draft.id)?;

    let draft = t.archive.archive_draft(&t.archivist, draft.id)?;
    assert_eq!(draft.state, DraftState::Archived);
    Ok(())
}

#[test]
fn merged_drafts_are_permanently_closed() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let draft = t.archive.new_draft(&t.archivist, "NewMod")?;
    t.archive.merge_draft(&t.moderator, draft.id, Some("newmod"))?;

    let stored = t.archive.get_draft(draft.id)?.unwrap();
    assert_eq!(stored.state, DraftState::Merged);
    assert!(stored.closed_at.is_some());

    // No way out of merged: not archive, not unarchive, not a second merge.
    let result = t.archive.archive_draft(&t.archivist, draft.id);
    assert!(matches!(
        result,
        Err(ArchiveError::InvalidTransition { from: DraftState::Merged, .. })
    ));
    let result = t.archive.unarchive_draft(&t.archivist, draft.id);
    assert!(matches!(
        result,
        Err(ArchiveError::InvalidTransition { from: DraftState::Merged, .. })
    ));
    let result = t.archive.merge_draft(&t.moderator, draft.id, Some("newmod2"));
    assert!(matches!(
        result,
        Err(ArchiveError::InvalidTransition { from: DraftState::Merged, .. })
    ));
    Ok(())
}

#[test]
fn deletion_requires_the_archived_state() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let draft = t.archive.new_draft(&t.archivist, "Doomed")?;

    let result = t.archive.delete_draft(&t.archivist, draft.id);
    assert!(matches!(result, Err(ArchiveError::InvalidTransition { .. })));

    t.archive.archive_draft(&t.archivist, draft.id)?;
    t.archive.delete_draft(&t.archivist, draft.id)?;
    assert!(t.archive.get_draft(draft.id)?.is_none());
    assert!(t.archive.list_drafts()?.is_empty());
    Ok(())
}

#[test]
fn deleting_a_mod_leaves_its_history_behind() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;

    let result = t.archive.delete_mod(&t.moderator, m.id);
    assert!(matches!(
        result,
        Err(ArchiveError::PermissionDenied { required: UserRole::Admin })
    ));

    let admin = TestArchive::session(UserRole::Admin);
    t.archive.delete_mod(&admin, m.id)?;
    assert!(t.archive.get_mod(m.id)?.is_none());

    // The history chain survives with a stale live pointer.
    let entries = t.archive.storage().log_entries_for_mod(m.id)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].current, Some(m.id));
    Ok(())
}

// ============================================================================
// Permissions
// ============================================================================

#[test]
fn merge_requires_the_moderator_role() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let draft = t.archive.new_draft(&t.archivist, "NewMod")?;

    let result = t.archive.merge_draft(&t.archivist, draft.id, Some("newmod"));
    assert!(matches!(
        result,
        Err(ArchiveError::PermissionDenied { required: UserRole::Moderator })
    ));

    // Moderators can merge drafts they don't own.
    t.archive.merge_draft(&t.moderator, draft.id, Some("newmod"))?;
    Ok(())
}

#[test]
fn drafting_requires_the_archivist_role() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let visitor = TestArchive::session(UserRole::User);
    let result = t.archive.new_draft(&visitor, "Nope");
    assert!(matches!(result, Err(ArchiveError::PermissionDenied { .. })));
    Ok(())
}

#[test]
fn only_the_owner_may_edit_a_draft() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let mut draft = t.archive.new_draft(&t.archivist, "Mine")?;
    draft.fields.desc = Some("hijacked".into());

    let rival = TestArchive::session(UserRole::Archivist);
    let result = t.archive.save_draft(&rival, &draft);
    assert!(matches!(result, Err(ArchiveError::NotDraftOwner)));

    // Admins may step in.
    let admin = TestArchive::session(UserRole::Admin);
    t.archive.save_draft(&admin, &draft)?;
    Ok(())
}

// ============================================================================
// Moderation & browsing
// ============================================================================

#[test]
fn delisted_mods_are_hidden_from_public_listings() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;

    assert_eq!(t.archive.list_mods(false)?.len(), 1);

    let result = t.archive.set_redist(&t.archivist, m.id, false);
    assert!(matches!(result, Err(ArchiveError::PermissionDenied { .. })));

    t.archive.set_redist(&t.moderator, m.id, false)?;
    assert!(t.archive.list_mods(false)?.is_empty());
    assert_eq!(t.archive.list_mods(true)?.len(), 1);

    // Delisting does not touch the content tree or its history.
    assert_eq!(t.archive.storage().log_entry_count(m.id)?, 1);
    Ok(())
}

#[test]
fn search_filters_by_keyword_author_and_game_version() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;
    let author = t.archive.author_by_name("tester")?.unwrap().id;
    let game_vsns = t.archive.list_game_versions()?;
    let gv_125 = game_vsns.iter().find(|g| g.name == "1.2.5").unwrap().id;
    assert!(t.archive.get_game_version(gv_125)?.is_some());
    assert_eq!(t.archive.get_author(author)?.unwrap().name, "tester");

    assert_eq!(t.archive.search_mods(Some("tes"), None, None, false)?.len(), 1);
    assert!(t.archive.search_mods(Some("zombe"), None, None, false)?.is_empty());
    assert_eq!(t.archive.search_mods(None, Some(author), None, false)?.len(), 1);
    assert_eq!(t.archive.search_mods(None, None, Some(gv_125), false)?.len(), 1);

    let live = t.archive.get_mod(m.id)?.unwrap();
    assert_eq!(live.game_versions().len(), 2);
    Ok(())
}

// ============================================================================
// Notifications & file uploads
// ============================================================================

#[test]
fn failing_notifier_does_not_abort_transitions() -> Result<(), Box<dyn std::error::Error>> {
    let storage = SqliteStorage::open_in_memory()?;
    let mut archive = Archive::with_notifier(storage, Box::new(FailingNotifier));
    let archivist = TestArchive::session(UserRole::Archivist);
    let moderator = TestArchive::session(UserRole::Moderator);

    let draft = archive.new_draft(&archivist, "Resilient")?;
    let draft = archive.mark_ready(&archivist, draft.id)?;
    assert_eq!(draft.state, DraftState::Ready);

    let published = archive.merge_draft(&moderator, draft.id, Some("resilient"))?;
    assert_eq!(published.slug, "resilient");
    Ok(())
}

#[test]
fn attach_file_verifies_content_hash() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;
    let draft = t.archive.start_draft(&t.archivist, m.id)?;
    let vsn = draft.versions[0].correlation_id;
    let before = draft.versions[0].files.len();

    let bytes = b"actual jar bytes";
    let wrong = BlobHash::from_bytes([0xEE; 32]);
    let result = t
        .archive
        .attach_file(&t.archivist, draft.id, vsn, "extra.jar", bytes, wrong);
    assert!(matches!(
        result,
        Err(ArchiveError::Storage(StorageError::IntegrityFailure { .. }))
    ));

    // Nothing was attached by the failed upload.
    let stored = t.archive.get_draft(draft.id)?.unwrap();
    assert_eq!(stored.versions[0].files.len(), before);

    let right = BlobHash::of(bytes);
    let draft = t
        .archive
        .attach_file(&t.archivist, draft.id, vsn, "extra.jar", bytes, right)?;
    let attached = draft.versions[0].files.last().unwrap();
    assert_eq!(attached.fields.filename, "extra.jar");
    assert_eq!(attached.fields.stored, Some(right));

    // The bytes are retrievable from the content store.
    let (meta, content) = t.archive.storage().get_file(right)?.unwrap();
    assert_eq!(meta.name, "extra.jar");
    assert_eq!(content, bytes);
    Ok(())
}
