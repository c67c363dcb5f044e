use std::collections::BTreeSet;

use crate::error::CoreError;
use crate::ids::{CorrelationId, GameVersionId, ModId};
use crate::model::fields::{FileFields, ModFields, VersionFields};
use crate::node::EntityNode;
use crate::scalar::ScalarValue;

/// The canonical, currently-published record of a mod. Mutated in place only
/// by merge and revert; every such mutation is followed by a history entry.
#[derive(Debug, Clone)]
pub struct Mod {
    pub id: ModId,
    pub correlation_id: CorrelationId,
    /// Unique human-readable identifier, set once when a draft is promoted.
    pub slug: String,
    /// When false the mod is delisted from public browsing.
    pub redist: bool,
    pub fields: ModFields,
    pub versions: Vec<ModVersion>,
}

impl Mod {
    pub fn blank(slug: &str) -> Self {
        Self {
            id: ModId::new(),
            correlation_id: CorrelationId::new(),
            slug: slug.to_string(),
            redist: true,
            fields: ModFields::default(),
            versions: Vec::new(),
        }
    }

    /// The union of game versions supported across all of this mod's
    /// versions.
    pub fn game_versions(&self) -> BTreeSet<GameVersionId> {
        self.versions
            .iter()
            .flat_map(|v| v.fields.game_versions.iter().copied())
            .collect()
    }
}

impl EntityNode for Mod {
    type Child = ModVersion;

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

    fn children(&self) -> &[ModVersion] {
        &self.versions
    }

    fn child_mut(&mut self, id: CorrelationId) -> Option<&mut ModVersion> {
        self.versions.iter_mut().find(|v| v.correlation_id == id)
    }

    fn push_child(&mut self, child: ModVersion) {
        self.versions.push(child);
    }

    fn remove_child(&mut self, id: CorrelationId) -> bool {
        let before = self.versions.len();
        self.versions.retain(|v| v.correlation_id != id);
        self.versions.len() != before
    }

    fn blank_child(&self) -> ModVersion {
        ModVersion::blank()
    }
}

/// One released version of a live mod.
#[derive(Debug, Clone, Default)]
pub struct ModVersion {
    pub correlation_id: CorrelationId,
    pub fields: VersionFields,
    pub files: Vec<ModFile>,
}

impl ModVersion {
    pub fn blank() -> Self {
        Self::default()
    }
}

impl EntityNode for ModVersion {
    type Child = ModFile;

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

    fn children(&self) -> &[ModFile] {
        &self.files
    }

    fn child_mut(&mut self, id: CorrelationId) -> Option<&mut ModFile> {
        self.files.iter_mut().find(|f| f.correlation_id == id)
    }

    fn push_child(&mut self, child: ModFile) {
        self.files.push(child);
    }

    fn remove_child(&mut self, id: CorrelationId) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.correlation_id != id);
        self.files.len() != before
    }

    fn blank_child(&self) -> ModFile {
        ModFile::blank()
    }
}

/// One downloadable artifact of a live mod version.
#[derive(Debug, Clone, Default)]
pub struct ModFile {
    pub correlation_id: CorrelationId,
    pub fields: FileFields,
}

impl ModFile {
    pub fn blank() -> Self {
        Self::default()
    }
}

impl EntityNode for ModFile {
    type Child = ModFile;

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

    fn children(&self) -> &[ModFile] {
        &[]
    }

    fn child_mut(&mut self, _id: CorrelationId) -> Option<&mut ModFile> {
        None
    }

    fn push_child(&mut self, _child: ModFile) {}

    fn remove_child(&mut self, _id: CorrelationId) -> bool {
        false
    }

    fn blank_child(&self) -> ModFile {
        ModFile::blank()
    }
}
