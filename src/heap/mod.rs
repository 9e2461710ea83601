mod error;
mod file;
mod page;
mod scan;

pub use error::{HeapError, HeapResult};
pub use file::HeapFile;
pub use page::{DataPage, MAX_RECORD_SIZE};
pub use scan::{AttrType, CompOp, HeapFileScan, InsertScan, ScanFilter};

use crate::file::PageId;

/// Slot number within a page
pub type SlotNo = u16;

/// Physical identifier for a record (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: PageId,
    pub slot_no: SlotNo,
}

impl Rid {
    pub fn new(page_no: PageId, slot_no: SlotNo) -> Self {
        Self { page_no, slot_no }
    }
}
