use crate::buffer::BufferError;
use crate::file::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid record id ({page_no}, {slot_no})")]
    BadRid { page_no: u32, slot_no: u16 },

    #[error("Scan has no current record")]
    NoCursor,

    #[error("Record length {0} out of range")]
    InvalidRecordLength(usize),

    #[error("Invalid scan predicate: {0}")]
    BadPredicate(String),

    #[error("Corrupt page: {0}")]
    CorruptPage(String),
}

pub type HeapResult<T> = Result<T, HeapError>;
