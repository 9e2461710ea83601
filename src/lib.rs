pub mod buffer;
pub mod file;
pub mod heap;
pub mod query;

pub use buffer::{BUFFER_POOL_SIZE, BufferManager};
pub use file::{FileHandle, PAGE_SIZE, PagedFileManager};
pub use heap::{HeapFile, HeapFileScan, InsertScan, Rid};
pub use query::Database;
