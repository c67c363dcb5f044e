use std::collections::BTreeSet;

use crate::error::CoreError;
use crate::ids::{AuthorId, BlobHash, GameVersionId};
use crate::scalar::ScalarValue;

/// Diffable fields shared by every kind at the mod level. Each kind embeds
/// this struct and delegates its `EntityNode` field accessors to it, so the
/// field shape cannot drift between the live, history, and draft copies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModFields {
    pub name: String,
    pub desc: Option<String>,
    pub website: Option<String>,
    pub authors: BTreeSet<AuthorId>,
}

impl ModFields {
    pub fn scalar_fields(&self) -> Vec<(&'static str, ScalarValue)> {
        vec![
            ("name", ScalarValue::Text(self.name.clone())),
            ("desc", ScalarValue::opt_text(&self.desc)),
            ("website", ScalarValue::opt_text(&self.website)),
            ("authors", ScalarValue::AuthorSet(self.authors.clone())),
        ]
    }

    pub fn set_scalar(&mut self, name: &str, value: ScalarValue) -> Result<(), CoreError> {
        match name {
            "name" => self.name = value.into_text(name)?,
            "desc" => self.desc = value.into_opt_text(name)?,
            "website" => self.website = value.into_opt_text(name)?,
            "authors" => self.authors = value.into_author_set(name)?,
            _ => return Err(CoreError::UnknownField(name.into())),
        }
        Ok(())
    }
}

/// Diffable fields shared by every kind at the version level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionFields {
    pub name: String,
    pub desc: Option<String>,
    pub url: Option<String>,
    pub game_versions: BTreeSet<GameVersionId>,
}

impl VersionFields {
    pub fn scalar_fields(&self) -> Vec<(&'static str, ScalarValue)> {
        vec![
            ("name", ScalarValue::Text(self.name.clone())),
            ("desc", ScalarValue::opt_text(&self.desc)),
            ("url", ScalarValue::opt_text(&self.url)),
            (
                "game_versions",
                ScalarValue::GameVersionSet(self.game_versions.clone()),
            ),
        ]
    }

    pub fn set_scalar(&mut self, name: &str, value: ScalarValue) -> Result<(), CoreError> {
        match name {
            "name" => self.name = value.into_text(name)?,
            "desc" => self.desc = value.into_opt_text(name)?,
            "url" => self.url = value.into_opt_text(name)?,
            "game_versions" => self.game_versions = value.into_game_version_set(name)?,
            _ => return Err(CoreError::UnknownField(name.into())),
        }
        Ok(())
    }
}

/// Diffable fields shared by every kind at the file level. `stored` points
/// into the content store by hash; the bytes themselves never enter the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileFields {
    pub filename: String,
    pub desc: Option<String>,
    pub stored: Option<BlobHash>,
    pub page_url: Option<String>,
    pub redirect_url: Option<String>,
    pub direct_url: Option<String>,
}

impl FileFields {
    pub fn scalar_fields(&self) -> Vec<(&'static str, ScalarValue)> {
        vec![
            ("filename", ScalarValue::Text(self.filename.clone())),
            ("desc", ScalarValue::opt_text(&self.desc)),
            ("stored", ScalarValue::opt_blob(&self.stored)),
            ("page_url", ScalarValue::opt_text(&self.page_url)),
            ("redirect_url", ScalarValue::opt_text(&self.redirect_url)),
            ("direct_url", ScalarValue::opt_text(&self.direct_url)),
        ]
    }

    pub fn set_scalar(&mut self, name: &str, value: ScalarValue) -> Result<(), CoreError> {
        match name {
            "filename" => self.filename = value.into_text(name)?,
            "desc" => self.desc = value.into_opt_text(name)?,
            "stored" => self.stored = value.into_opt_blob(name)?,
            "page_url" => self.page_url = value.into_opt_text(name)?,
            "redirect_url" => self.redirect_url = value.into_opt_text(name)?,
            "direct_url" => self.direct_url = value.into_opt_text(name)?,
            _ => return Err(CoreError::UnknownField(name.into())),
        }
        Ok(())
    }
}
