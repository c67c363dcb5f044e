use std::fmt;

use crate::error::CoreError;
use crate::hlc::Hlc;
use crate::ids::{ActorId, CorrelationId, DraftId, LogId};
use crate::model::fields::{FileFields, ModFields, VersionFields};
use crate::node::EntityNode;
use crate::scalar::ScalarValue;

/// Lifecycle of a draft. `Merged` and `Archived` are closed states; only
/// `Archived` can be reopened, and only if the draft was never merged
/// (merging implies permanent archival, the reverse does not hold).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    Editable,
    Ready,
    Merged,
    Archived,
}

impl DraftState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Editable => "editable",
            Self::Ready => "ready",
            Self::Merged => "merged",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "editable" => Ok(Self::Editable),
            "ready" => Ok(Self::Ready),
            "merged" => Ok(Self::Merged),
            "archived" => Ok(Self::Archived),
            _ => Err(CoreError::InvalidData(format!("unknown draft state: {s}"))),
        }
    }
}

impl fmt::Display for DraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An editable working copy of a mod, owned by one user.
///
/// Branched from a history entry (`base` set) to propose changes to an
/// existing mod, or created blank (`base` unset) to propose a brand-new one.
/// The base pointer never changes after creation.
#[derive(Debug, Clone)]
pub struct DraftMod {
    pub id: DraftId,
    pub correlation_id: CorrelationId,
    pub owner: ActorId,
    pub base: Option<LogId>,
    pub state: DraftState,
    pub created_at: Hlc,
    pub last_changed: Hlc,
    pub ready_at: Option<Hlc>,
    pub closed_at: Option<Hlc>,
    pub fields: ModFields,
    pub versions: Vec<DraftModVersion>,
}

impl DraftMod {
    pub fn blank(owner: ActorId, created_at: Hlc) -> Self {
        Self {
            id: DraftId::new(),
            correlation_id: CorrelationId::new(),
            owner,
            base: None,
            state: DraftState::Editable,
            created_at,
            last_changed: created_at,
            ready_at: None,
            closed_at: None,
            fields: ModFields::default(),
            versions: Vec::new(),
        }
    }
}

impl EntityNode for DraftMod {
    type Child = DraftModVersion;

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

    fn children(&self) -> &[DraftModVersion] {
        &self.versions
    }

    fn child_mut(&mut self, id: CorrelationId) -> Option<&mut DraftModVersion> {
        self.versions.iter_mut().find(|v| v.correlation_id == id)
    }

    fn push_child(&mut self, child: DraftModVersion) {
        self.versions.push(child);
    }

    fn remove_child(&mut self, id: CorrelationId) -> bool {
        let before = self.versions.len();
        self.versions.retain(|v| v.correlation_id != id);
        self.versions.len() != before
    }

    fn blank_child(&self) -> DraftModVersion {
        DraftModVersion::blank()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DraftModVersion {
    pub correlation_id: CorrelationId,
    pub fields: VersionFields,
    pub files: Vec<DraftModFile>,
}

impl DraftModVersion {
    pub fn blank() -> Self {
        Self::default()
    }
}

impl EntityNode for DraftModVersion {
    type Child = DraftModFile;

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

    fn children(&self) -> &[DraftModFile] {
        &self.files
    }

    fn child_mut(&mut self, id: CorrelationId) -> Option<&mut DraftModFile> {
        self.files.iter_mut().find(|f| f.correlation_id == id)
    }

    fn push_child(&mut self, child: DraftModFile) {
        self.files.push(child);
    }

    fn remove_child(&mut self, id: CorrelationId) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.correlation_id != id);
        self.files.len() != before
    }

    fn blank_child(&self) -> DraftModFile {
        DraftModFile::blank()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DraftModFile {
    pub correlation_id: CorrelationId,
    pub fields: FileFields,
}

impl DraftModFile {
    pub fn blank() -> Self {
        Self::default()
    }
}

impl EntityNode for DraftModFile {
    type Child = DraftModFile;

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

    fn children(&self) -> &[DraftModFile] {
        &[]
    }

    fn child_mut(&mut self, _id: CorrelationId) -> Option<&mut DraftModFile> {
        None
    }

    fn push_child(&mut self, _child: DraftModFile) {}

    fn remove_child(&mut self, _id: CorrelationId) -> bool {
        false
    }

    fn blank_child(&self) -> DraftModFile {
        DraftModFile::blank()
    }
}
