use crate::file::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("All buffer frames are pinned")]
    PoolExhausted,

    #[error("Page {0} is still pinned")]
    PagePinned(u32),

    #[error("Page {0} is not pinned")]
    PageNotPinned(u32),

    #[error("Page {0} is not in the buffer pool")]
    PageNotCached(u32),

    #[error("Page {0} is already mapped to a frame")]
    DuplicateMapping(u32),

    #[error("Frame {0} descriptor is corrupt")]
    CorruptFrame(usize),
}

pub type BufferResult<T> = Result<T, BufferError>;
