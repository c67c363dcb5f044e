use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("field {field} expects a {expected} value")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid data: {0}")]
    InvalidData(String),
}
