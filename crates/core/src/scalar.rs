use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{AuthorId, BlobHash, GameVersionId};

/// The value union for diffable entity fields.
///
/// Author and game-version links are many-to-many references to shared
/// records, so the whole set diffs as one value rather than as child nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Text(String),
    BlobRef(BlobHash),
    AuthorSet(BTreeSet<AuthorId>),
    GameVersionSet(BTreeSet<GameVersionId>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn opt_text(value: &Option<String>) -> Self {
        match value {
            Some(s) => ScalarValue::Text(s.clone()),
            None => ScalarValue::Null,
        }
    }

    pub fn opt_blob(value: &Option<BlobHash>) -> Self {
        match value {
            Some(h) => ScalarValue::BlobRef(*h),
            None => ScalarValue::Null,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self, field: &str) -> Result<String, CoreError> {
        match self {
            ScalarValue::Text(s) => Ok(s),
            _ => Err(CoreError::FieldType {
                field: field.into(),
                expected: "text",
            }),
        }
    }

    pub fn into_opt_text(self, field: &str) -> Result<Option<String>, CoreError> {
        match self {
            ScalarValue::Null => Ok(None),
            ScalarValue::Text(s) => Ok(Some(s)),
            _ => Err(CoreError::FieldType {
                field: field.into(),
                expected: "text or null",
            }),
        }
    }

    pub fn into_opt_blob(self, field: &str) -> Result<Option<BlobHash>, CoreError> {
        match self {
            ScalarValue::Null => Ok(None),
            ScalarValue::BlobRef(h) => Ok(Some(h)),
            _ => Err(CoreError::FieldType {
                field: field.into(),
                expected: "blob ref or null",
            }),
        }
    }

    pub fn into_author_set(self, field: &str) -> Result<BTreeSet<AuthorId>, CoreError> {
        match self {
            ScalarValue::AuthorSet(set) => Ok(set),
            _ => Err(CoreError::FieldType {
                field: field.into(),
                expected: "author set",
            }),
        }
    }

    pub fn into_game_version_set(self, field: &str) -> Result<BTreeSet<GameVersionId>, CoreError> {
        match self {
            ScalarValue::GameVersionSet(set) => Ok(set),
            _ => Err(CoreError::FieldType {
                field: field.into(),
                expected: "game version set",
            }),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
