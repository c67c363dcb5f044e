use modarch_core::diff::{apply_diff, diff};
use modarch_core::model::{DraftModVersion, DraftState, LogMod, Mod};
use modarch_core::node::NodeSnapshot;
use modarch_core::scalar::ScalarValue;
use modarch_engine::ArchiveError;
use modarch_harness::{TestArchive, sample_file, trees_equivalent};
use modarch_storage::Storage;

/// Publish a one-version mod through the real draft path.
fn publish(
    t: &mut TestArchive,
    slug: &str,
    name: &str,
    vsn_desc: &str,
) -> Result<Mod, Box<dyn std::error::Error>> {
    let mut draft = t.archive.new_draft(&t.archivist, name)?;
    let mut vsn = DraftModVersion::blank();
    vsn.fields.name = "4.2.0".into();
    vsn.fields.desc = Some(vsn_desc.to_string());
    vsn.files.push(sample_file("test-4.2.0.jar", b"fake"));
    draft.versions.push(vsn);
    let draft = t.archive.save_draft(&t.archivist, &draft)?;
    Ok(t.archive.merge_draft(&t.moderator, draft.id, Some(slug))?)
}

// ============================================================================
// Merging changes to an existing mod
// ============================================================================

#[test]
fn editing_a_version_description_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = publish(&mut t, "test", "Test", "old")?;

    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    let vsn_id = draft.versions[0].correlation_id;
    draft.versions[0].fields.desc = Some("new".into());
    let draft = t.archive.save_draft(&t.archivist, &draft)?;

    // The draft diff is exactly one scalar change on that version.
    let d = t.archive.draft_diff(draft.id)?;
    assert!(d.scalar_changes.is_empty());
    assert!(d.added.is_empty());
    assert!(d.removed.is_empty());
    assert_eq!(d.changed.len(), 1);
    let sub = d.child_diff(vsn_id).unwrap();
    assert_eq!(sub.scalar_changes.len(), 1);
    let change = sub.scalar_change("desc").unwrap();
    assert_eq!(change.old, ScalarValue::Text("old".into()));
    assert_eq!(change.new, ScalarValue::Text("new".into()));
    assert!(sub.added.is_empty() && sub.removed.is_empty() && sub.changed.is_empty());

    let before = t.archive.storage().log_entry_count(m.id)?;
    t.archive.merge_draft(&t.moderator, draft.id, None)?;

    // Live reflects the edit.
    let live = t.archive.get_mod(m.id)?.unwrap();
    assert_eq!(live.versions[0].fields.desc, Some("new".into()));

    // Exactly one new history entry, itself identical to live.
    let entries = t.archive.storage().log_entries_for_mod(m.id)?;
    assert_eq!(entries.len() as u32, before + 1);
    let tip = entries.last().unwrap();
    assert!(diff(tip, &live).is_empty());
    assert_eq!(tip.author, Some(t.archivist.actor_id()));
    assert_eq!(tip.approved_by, Some(t.moderator.actor_id()));

    // The history view mirrors the same single change.
    let history: Vec<_> = t.archive.history(m.id)?.collect();
    assert_eq!(history.len(), entries.len());
    let latest = history.last().unwrap();
    assert_eq!(latest.diff.changed.len(), 1);
    let sub = latest.diff.child_diff(vsn_id).unwrap();
    assert_eq!(
        sub.scalar_change("desc").unwrap().new,
        ScalarValue::Text("new".into())
    );
    Ok(())
}

#[test]
fn merging_an_unchanged_draft_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = publish(&mut t, "test", "Test", "old")?;

    let draft = t.archive.start_draft(&t.archivist, m.id)?;
    let result = t.archive.merge_draft(&t.moderator, draft.id, None);
    assert!(matches!(result, Err(ArchiveError::NothingToMerge)));

    // Nothing was committed.
    assert_eq!(t.archive.storage().log_entry_count(m.id)?, 1);
    Ok(())
}

#[test]
fn removing_a_file_carries_through_a_merge() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;

    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    let dropped = draft.versions[1].files[0].correlation_id;
    draft.versions[1].files.retain(|f| f.correlation_id != dropped);
    let draft = t.archive.save_draft(&t.archivist, &draft)?;

    let d = t.archive.draft_diff(draft.id)?;
    let sub = d.child_diff(draft.versions[1].correlation_id).unwrap();
    assert_eq!(sub.removed.len(), 1);
    assert_eq!(sub.removed[0].correlation_id, dropped);

    t.archive.merge_draft(&t.moderator, draft.id, None)?;

    let live = t.archive.get_mod(m.id)?.unwrap();
    assert_eq!(live.versions[1].files.len(), 1);
    assert!(
        live.versions
            .iter()
            .flat_map(|v| v.files.iter())
            .all(|f| f.correlation_id != dropped),
        "removed file's correlation id must be absent from the live tree"
    );
    Ok(())
}

#[test]
fn unrelated_concurrent_drafts_both_land() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = publish(&mut t, "test", "Test", "old")?;

    // Two drafts branched from the same base.
    let mut draft_a = t.archive.start_draft(&t.archivist, m.id)?;
    let mut draft_b = t.archive.start_draft(&t.archivist, m.id)?;

    draft_a.fields.desc = Some("described by a".into());
    let draft_a = t.archive.save_draft(&t.archivist, &draft_a)?;
    draft_b.versions[0].fields.url = Some("https://b.example/420".into());
    let draft_b = t.archive.save_draft(&t.archivist, &draft_b)?;

    t.archive.merge_draft(&t.moderator, draft_a.id, None)?;
    t.archive.merge_draft(&t.moderator, draft_b.id, None)?;

    // B's merge patched only what B changed; A's edit survives.
    let live = t.archive.get_mod(m.id)?.unwrap();
    assert_eq!(live.fields.desc, Some("described by a".into()));
    assert_eq!(
        live.versions[0].fields.url,
        Some("https://b.example/420".into())
    );
    Ok(())
}

#[test]
fn conflicting_concurrent_drafts_resolve_last_writer_wins()
-> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = publish(&mut t, "test", "Test", "old")?;

    let mut draft_a = t.archive.start_draft(&t.archivist, m.id)?;
    let mut draft_b = t.archive.start_draft(&t.archivist, m.id)?;
    draft_a.fields.desc = Some("from a".into());
    draft_b.fields.desc = Some("from b".into());
    let draft_a = t.archive.save_draft(&t.archivist, &draft_a)?;
    let draft_b = t.archive.save_draft(&t.archivist, &draft_b)?;

    t.archive.merge_draft(&t.moderator, draft_a.id, None)?;
    t.archive.merge_draft(&t.moderator, draft_b.id, None)?;

    let live = t.archive.get_mod(m.id)?.unwrap();
    assert_eq!(live.fields.desc, Some("from b".into()));
    Ok(())
}

// ============================================================================
// Promoting a new mod
// ============================================================================

#[test]
fn merging_a_baseless_draft_publishes_a_new_mod() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;

    let mut draft = t.archive.new_draft(&t.archivist, "NewMod")?;
    let mut vsn = DraftModVersion::blank();
    vsn.fields.name = "1.0".into();
    vsn.files.push(sample_file("newmod-1.0.jar", b"bytes"));
    draft.versions.push(vsn);
    let draft = t.archive.save_draft(&t.archivist, &draft)?;

    let published = t.archive.merge_draft(&t.moderator, draft.id, Some("newmod"))?;
    assert_eq!(published.slug, "newmod");
    assert_eq!(published.correlation_id, draft.correlation_id);
    assert!(t.archive.mod_by_slug("newmod")?.is_some());
    assert!(trees_equivalent(
        &NodeSnapshot::capture(&published),
        &NodeSnapshot::capture(&draft),
    ));

    // Exactly one history entry, matching the published content.
    let entries = t.archive.storage().log_entries_for_mod(published.id)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].index, 0);
    assert!(diff(&entries[0], &published).is_empty());
    Ok(())
}

#[test]
fn promoting_a_new_mod_requires_a_free_slug() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    publish(&mut t, "taken", "Taken", "v1")?;

    let draft = t.archive.new_draft(&t.archivist, "Another")?;
    let result = t.archive.merge_draft(&t.moderator, draft.id, None);
    assert!(matches!(result, Err(ArchiveError::SlugRequired)));

    let result = t.archive.merge_draft(&t.moderator, draft.id, Some("taken"));
    assert!(matches!(result, Err(ArchiveError::SlugTaken(_))));

    // The draft is still open after the rejections.
    let stored = t.archive.get_draft(draft.id)?.unwrap();
    assert_eq!(stored.state, DraftState::Editable);
    Ok(())
}

// ============================================================================
// History & revert
// ============================================================================

#[test]
fn replaying_history_diffs_reconstructs_the_live_tree()
-> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = t.sample_mod()?;

    // A couple of edits on top of the initial publication.
    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    draft.fields.website = Some("https://example.com".into());
    let draft = t.archive.save_draft(&t.archivist, &draft)?;
    t.archive.merge_draft(&t.moderator, draft.id, None)?;

    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    let dropped = draft.versions[0].correlation_id;
    draft.versions.retain(|v| v.correlation_id != dropped);
    let draft = t.archive.save_draft(&t.archivist, &draft)?;
    t.archive.merge_draft(&t.moderator, draft.id, None)?;

    // Folding every history diff over an empty tree ends at the live state.
    let mut replayed = LogMod::blank();
    for step in t.archive.history(m.id)? {
        apply_diff(&mut replayed, &step.diff)?;
    }
    let live = t.archive.get_mod(m.id)?.unwrap();
    assert!(trees_equivalent(
        &NodeSnapshot::capture(&replayed),
        &NodeSnapshot::capture(&live),
    ));
    Ok(())
}

#[test]
fn history_entries_verify_their_signatures() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = publish(&mut t, "test", "Test", "old")?;

    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    draft.fields.desc = Some("revised".into());
    let draft = t.archive.save_draft(&t.archivist, &draft)?;
    t.archive.merge_draft(&t.moderator, draft.id, None)?;

    for entry in t.archive.storage().log_entries_for_mod(m.id)? {
        entry.verify()?;
        assert_eq!(entry.signed_by, t.moderator.actor_id());
    }
    Ok(())
}

#[test]
fn revert_restores_a_historical_state() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m = publish(&mut t, "test", "Test", "old")?;

    let mut draft = t.archive.start_draft(&t.archivist, m.id)?;
    draft.versions[0].fields.desc = Some("new".into());
    let draft = t.archive.save_draft(&t.archivist, &draft)?;
    t.archive.merge_draft(&t.moderator, draft.id, None)?;

    let entries = t.archive.storage().log_entries_for_mod(m.id)?;
    let first = &entries[0];

    let live = t.archive.revert_mod(&t.moderator, m.id, first.id)?;
    assert_eq!(live.versions[0].fields.desc, Some("old".into()));

    // The revert itself is recorded as a new entry matching live.
    let entries = t.archive.storage().log_entries_for_mod(m.id)?;
    assert_eq!(entries.len(), 3);
    let tip = entries.last().unwrap();
    assert!(diff(tip, &live).is_empty());
    assert_eq!(tip.author, Some(t.moderator.actor_id()));
    Ok(())
}

#[test]
fn revert_against_the_wrong_mod_fails_hard() -> Result<(), Box<dyn std::error::Error>> {
    let mut t = TestArchive::new()?;
    let m1 = publish(&mut t, "first", "First", "v1")?;
    let m2 = publish(&mut t, "second", "Second", "v1")?;

    let entries = t.archive.storage().log_entries_for_mod(m1.id)?;
    let result = t.archive.revert_mod(&t.moderator, m2.id, entries[0].id);
    assert!(matches!(result, Err(ArchiveError::MismatchedEntity { .. })));

    // Neither mod was touched.
    let live = t.archive.get_mod(m2.id)?.unwrap();
    assert_eq!(live.fields.name, "Second");
    Ok(())
}
