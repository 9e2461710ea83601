use crate::heap::HeapError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Relation {0} not found")]
    RelationNotFound(String),

    #[error("Relation {0} already exists")]
    RelationExists(String),

    #[error("Invalid attribute declaration: {0}")]
    InvalidAttr(String),

    #[error("Attribute {attr} not found in relation {rel}")]
    AttrNotFound { rel: String, attr: String },

    #[error("Type mismatch for attribute {attr} of relation {rel}")]
    AttrTypeMismatch { rel: String, attr: String },

    #[error("Relation {rel} takes {expected} attributes, got {actual}")]
    AttrCountMismatch {
        rel: String,
        expected: usize,
        actual: usize,
    },

    #[error("Value for attribute {attr} exceeds {max} bytes")]
    ValueTooLong { attr: String, max: usize },
}

pub type QueryResult<T> = Result<T, QueryError>;
