use crate::error::CoreError;
use crate::hlc::Hlc;
use crate::identity::{ActorIdentity, verify_signature};
use crate::ids::{ActorId, BlobHash, CorrelationId, LogId, ModId, Signature};
use crate::model::fields::{FileFields, ModFields, VersionFields};
use crate::model::live::Mod;
use crate::node::{EntityNode, NodeSnapshot};
use crate::scalar::ScalarValue;

/// An immutable snapshot of a live mod, appended once per accepted change.
///
/// Entries for one mod form a strictly ordered chain by `index`; replaying
/// the diffs between consecutive entries reconstructs every historical state.
/// Each entry is checksummed over its captured tree and signed by the session
/// that wrote it, so tampering with stored history is detectable.
#[derive(Debug, Clone)]
pub struct LogMod {
    pub id: LogId,
    pub correlation_id: CorrelationId,
    /// The live mod this entry was snapshotted from. Stale once that mod is
    /// deleted.
    pub current: Option<ModId>,
    /// Position within the mod's chain, starting at 0.
    pub index: u32,
    pub created_at: Hlc,
    /// The user whose change this entry records.
    pub author: Option<ActorId>,
    /// The moderator who approved the change, when it came from a draft.
    pub approved_by: Option<ActorId>,
    pub signed_by: ActorId,
    pub checksum: BlobHash,
    pub signature: Signature,
    pub fields: ModFields,
    pub versions: Vec<LogModVersion>,
}

impl LogMod {
    /// An empty placeholder entry. Diffing it against a real entry renders
    /// creation as an all-added diff.
    pub fn blank() -> Self {
        Self {
            id: LogId::new(),
            correlation_id: CorrelationId::new(),
            current: None,
            index: 0,
            created_at: Hlc::zero(),
            author: None,
            approved_by: None,
            signed_by: ActorId::from_bytes([0; 32]),
            checksum: BlobHash::from_bytes([0; 32]),
            signature: Signature::from_bytes([0; 64]),
            fields: ModFields::default(),
            versions: Vec::new(),
        }
    }

    /// Capture a live mod into a new signed history entry.
    pub fn snapshot(
        subject: &Mod,
        index: u32,
        created_at: Hlc,
        author: Option<ActorId>,
        approved_by: Option<ActorId>,
        signer: &ActorIdentity,
    ) -> Result<Self, CoreError> {
        let snap = NodeSnapshot::capture(subject);
        let mut entry = LogMod::blank();
        snap.write_into(&mut entry)?;
        entry.current = Some(subject.id);
        entry.index = index;
        entry.created_at = created_at;
        entry.author = author;
        entry.approved_by = approved_by;
        entry.checksum = BlobHash::of(&snap.to_msgpack()?);
        entry.signed_by = signer.actor_id();
        entry.signature = signer.sign(entry.checksum.as_bytes());
        Ok(entry)
    }

    /// Recompute the checksum over this entry's tree and verify the
    /// signature. Fails if the stored content no longer matches what was
    /// signed at creation.
    pub fn verify(&self) -> Result<(), CoreError> {
        let snap = NodeSnapshot::capture(self);
        let expected = BlobHash::of(&snap.to_msgpack()?);
        if expected != self.checksum {
            return Err(CoreError::ChecksumMismatch);
        }
        verify_signature(&self.signed_by, self.checksum.as_bytes(), &self.signature)
    }
}

impl EntityNode for LogMod {
    type Child = LogModVersion;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    fn set_correlation_id(&mut self, id: CorrelationId) {
        self.correlation_id = id;
    }

    fn scalar_fields(&self) -> Vec<(&'static str, ScalarValue)> {
        self.fields.scalar_fields()
    }

    fn set_scalar(&mut self, name: &str, value: ScalarValue) -> Result<(), CoreError> {
        self.fields.set_scalar(name, value)
    }

    fn children(&self) -> &[LogModVersion] {
        &self.versions
    }

    fn child_mut(&mut self, id: CorrelationId) -> Option<&mut LogModVersion> {
        self.versions.iter_mut().find(|v| v.correlation_id == id)
    }

    fn push_child(&mut self, child: LogModVersion) {
        self.versions.push(child);
    }

    fn remove_child(&mut self, id: CorrelationId) -> bool {
        let before = self.versions.len();
        self.versions.retain(|v| v.correlation_id != id);
        self.versions.len() != before
    }

    fn blank_child(&self) -> LogModVersion {
        LogModVersion::blank()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogModVersion {
    pub correlation_id: CorrelationId,
    pub fields: VersionFields,
    pub files: Vec<LogModFile>,
}

impl LogModVersion {
    pub fn blank() -> Self {
        Self::default()
    }
}

impl EntityNode for LogModVersion {
    type Child = LogModFile;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    fn set_correlation_id(&mut self, id: CorrelationId) {
        self.correlation_id = id;
    }

    fn scalar_fields(&self) -> Vec<(&'static str, ScalarValue)> {
        self.fields.scalar_fields()
    }

    fn set_scalar(&mut self, name: &str, value: ScalarValue) -> Result<(), CoreError> {
        self.fields.set_scalar(name, value)
    }

    fn children(&self) -> &[LogModFile] {
        &self.files
    }

    fn child_mut(&mut self, id: CorrelationId) -> Option<&mut LogModFile> {
        self.files.iter_mut().find(|f| f.correlation_id == id)
    }

    fn push_child(&mut self, child: LogModFile) {
        self.files.push(child);
    }

    fn remove_child(&mut self, id: CorrelationId) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.correlation_id != id);
        self.files.len() != before
    }

    fn blank_child(&self) -> LogModFile {
        LogModFile::blank()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogModFile {
    pub correlation_id: CorrelationId,
    pub fields: FileFields,
}

impl LogModFile {
    pub fn blank() -> Self {
        Self::default()
    }
}

impl EntityNode for LogModFile {
    type Child = LogModFile;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    fn set_correlation_id(&mut self, id: CorrelationId) {
        self.correlation_id = id;
    }

    fn scalar_fields(&self) -> Vec<(&'static str, ScalarValue)> {
        self.fields.scalar_fields()
    }

    fn set_scalar(&mut self, name: &str, value: ScalarValue) -> Result<(), CoreError> {
        self.fields.set_scalar(name, value)
    }

    fn children(&self) -> &[LogModFile] {
        &[]
    }

    fn child_mut(&mut self, _id: CorrelationId) -> Option<&mut LogModFile> {
        None
    }

    fn push_child(&mut self, _child: LogModFile) {}

    fn remove_child(&mut self, _id: CorrelationId) -> bool {
        false
    }

    fn blank_child(&self) -> LogModFile {
        LogModFile::blank()
    }
}
