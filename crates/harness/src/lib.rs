use std::sync::{Arc, Mutex};

use modarch_core::identity::{ActorIdentity, UserRole};
use modarch_core::ids::BlobHash;
use modarch_core::model::{DraftModFile, DraftModVersion, Mod};
use modarch_core::node::NodeSnapshot;
use modarch_engine::{Archive, Notifier, NotifyError, NotifyEvent, Session};
use modarch_storage::{SqliteStorage, StorageError};

/// Shared handle onto the events a [`RecordingNotifier`] has seen.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<NotifyEvent>>>);

impl EventLog {
    pub fn events(&self) -> Vec<NotifyEvent> {
        self.0.lock().expect("event log lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().expect("event log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Notifier that records every event for later assertions.
pub struct RecordingNotifier {
    log: EventLog,
}

impl RecordingNotifier {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, event: &NotifyEvent) -> Result<(), NotifyError> {
        self.log
            .0
            .lock()
            .expect("event log lock poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Notifier that always fails delivery, for checking that transitions
/// survive a broken sink.
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&mut self, _event: &NotifyEvent) -> Result<(), NotifyError> {
        Err(NotifyError("smtp is down".into()))
    }
}

/// An in-memory archive with one archivist and one moderator session, and a
/// recording notifier wired in.
pub struct TestArchive {
    pub archive: Archive,
    pub archivist: Session,
    pub moderator: Session,
    pub events: EventLog,
}

impl TestArchive {
    pub fn new() -> Result<Self, StorageError> {
        let events = EventLog::default();
        let storage = SqliteStorage::open_in_memory()?;
        let archive =
            Archive::with_notifier(storage, Box::new(RecordingNotifier::new(events.clone())));
        Ok(Self {
            archive,
            archivist: Session::new(ActorIdentity::generate(), UserRole::Archivist),
            moderator: Session::new(ActorIdentity::generate(), UserRole::Moderator),
            events,
        })
    }

    /// A fresh session with its own identity.
    pub fn session(role: UserRole) -> Session {
        Session::new(ActorIdentity::generate(), role)
    }

    /// Build the standard fixture mod through the real draft/merge path:
    /// "Test" with versions 4.2.0 (one file) and 1.3.3.7 (two files),
    /// published under the slug "test".
    pub fn sample_mod(&mut self) -> Result<Mod, Box<dyn std::error::Error>> {
        let tester = self
            .archive
            .create_author(&self.archivist, "tester", None, None)?;
        let gv_125 = self.archive.create_game_version(&self.archivist, "1.2.5")?;
        let gv_b173 = self.archive.create_game_version(&self.archivist, "b1.7.3")?;

        let mut draft = self.archive.new_draft(&self.archivist, "Test")?;
        draft.fields.desc = Some("This is a test".into());
        draft.fields.authors = [tester.id].into();

        let mut v1 = DraftModVersion::blank();
        v1.fields.name = "4.2.0".into();
        v1.fields.desc = Some("This is a test".into());
        v1.fields.game_versions = [gv_125.id].into();
        v1.files.push(sample_file("test-4.2.0.jar", b"fake"));

        let mut v2 = DraftModVersion::blank();
        v2.fields.name = "1.3.3.7".into();
        v2.fields.desc = Some("This is another test".into());
        v2.fields.game_versions = [gv_b173.id].into();
        v2.files
            .push(sample_file("test-1.3.3.7-client.jar", b"fakeclient"));
        v2.files
            .push(sample_file("test-1.3.3.7-server.jar", b"fakeserver"));

        draft.versions = vec![v1, v2];
        let draft = self.archive.save_draft(&self.archivist, &draft)?;
        let published = self
            .archive
            .merge_draft(&self.moderator, draft.id, Some("test"))?;
        Ok(published)
    }
}

/// A draft file entity whose stored ref is the hash of `content`.
pub fn sample_file(filename: &str, content: &[u8]) -> DraftModFile {
    let mut file = DraftModFile::blank();
    file.fields.filename = filename.to_string();
    file.fields.stored = Some(BlobHash::of(content));
    file
}

/// Structural equivalence for trees from different kinds: same fields and
/// the same children matched up by correlation id, recursively. Root
/// correlation ids are not compared; the enclosing record carries root
/// identity.
pub fn trees_equivalent(a: &NodeSnapshot, b: &NodeSnapshot) -> bool {
    if a.fields != b.fields {
        return false;
    }
    if a.children.len() != b.children.len() {
        return false;
    }
    a.children.iter().all(|ca| {
        b.children
            .iter()
            .find(|cb| cb.correlation_id == ca.correlation_id)
            .is_some_and(|cb| ca.correlation_id == cb.correlation_id && subtree_equivalent(ca, cb))
    })
}

fn subtree_equivalent(a: &NodeSnapshot, b: &NodeSnapshot) -> bool {
    a.correlation_id == b.correlation_id && trees_equivalent(a, b)
}
