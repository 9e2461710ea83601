use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{HeapError, HeapResult};
use super::file::HeapFile;
use super::page::{DataPage, MAX_RECORD_SIZE};
use super::{Rid, SlotNo};
use crate::buffer::BufferManager;
use crate::file::PageId;

/// Attribute types a scan predicate can compare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    Int,
    Float,
    Str,
}

/// Comparison operators for scan predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompOp {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
    Ne,
}

impl CompOp {
    fn eval(self, ord: Ordering) -> bool {
        match self {
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Lte => ord != Ordering::Greater,
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Gte => ord != Ordering::Less,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Ne => ord != Ordering::Equal,
        }
    }
}

/// Typed predicate over a fixed-length slice of each record
#[derive(Debug, Clone)]
pub struct ScanFilter {
    offset: usize,
    length: usize,
    attr_type: AttrType,
    op: CompOp,
    value: Vec<u8>,
}

impl ScanFilter {
    /// Validate and build a filter. Int and Float attributes must be exactly
    /// 4 bytes; Str attributes may be any length >= 1. The comparison value
    /// must have exactly `length` bytes.
    pub fn new(
        offset: usize,
        length: usize,
        attr_type: AttrType,
        op: CompOp,
        value: Vec<u8>,
    ) -> HeapResult<Self> {
        if length == 0 {
            return Err(HeapError::BadPredicate("length must be at least 1".to_string()));
        }
        if matches!(attr_type, AttrType::Int | AttrType::Float) && length != 4 {
            return Err(HeapError::BadPredicate(format!(
                "{attr_type:?} attributes are 4 bytes, got length {length}"
            )));
        }
        if value.len() != length {
            return Err(HeapError::BadPredicate(format!(
                "value has {} bytes but length is {length}",
                value.len()
            )));
        }

        Ok(Self {
            offset,
            length,
            attr_type,
            op,
            value,
        })
    }

    /// Test a record against the predicate. Records too short to contain the
    /// attribute never match.
    pub fn matches(&self, record: &[u8]) -> bool {
        if record.len() < self.offset + self.length {
            return false;
        }
        let field = &record[self.offset..self.offset + self.length];

        match self.attr_type {
            AttrType::Int => {
                let attr = i32::from_le_bytes([field[0], field[1], field[2], field[3]]);
                let value = i32::from_le_bytes([
                    self.value[0],
                    self.value[1],
                    self.value[2],
                    self.value[3],
                ]);
                self.op.eval(attr.cmp(&value))
            }
            AttrType::Float => {
                let attr = f32::from_le_bytes([field[0], field[1], field[2], field[3]]);
                let value = f32::from_le_bytes([
                    self.value[0],
                    self.value[1],
                    self.value[2],
                    self.value[3],
                ]);
                match attr.partial_cmp(&value) {
                    Some(ord) => self.op.eval(ord),
                    // NaN compares unequal to everything
                    None => self.op == CompOp::Ne,
                }
            }
            AttrType::Str => self.op.eval(field.cmp(&self.value[..])),
        }
    }
}

/// Saved scan position: only the RID is remembered, no pin is held
#[derive(Debug, Clone, Copy)]
struct ScanMark {
    page_no: Option<PageId>,
    rec: Option<Rid>,
}

/// Forward scan over a heap file with an optional predicate.
///
/// `scan_next` walks the data-page chain in file order and returns the RID
/// of each matching record; `Ok(None)` means the scan is exhausted.
pub struct HeapFileScan {
    pub(crate) file: HeapFile,
    filter: Option<ScanFilter>,
    mark: ScanMark,
}

enum Step {
    Found(Rid),
    Skip(Rid),
    EndOfPage(Option<PageId>),
}

impl HeapFileScan {
    pub fn open(buf: &mut BufferManager, path: &Path) -> HeapResult<Self> {
        let file = HeapFile::open_at(buf, path, true)?;
        let mark = ScanMark {
            page_no: file.cur_page_no,
            rec: None,
        };
        Ok(Self {
            file,
            filter: None,
            mark,
        })
    }

    /// Install the predicate for subsequent `scan_next` calls; `None` scans
    /// every record.
    pub fn start_scan(&mut self, filter: Option<ScanFilter>) {
        self.filter = filter;
    }

    /// Release the cursor pin and forget the scan position.
    pub fn end_scan(&mut self, buf: &mut BufferManager) -> HeapResult<()> {
        if let Some(page_no) = self.file.cur_page_no.take() {
            buf.unpin_page(self.file.file, page_no, self.file.cur_dirty)?;
            self.file.cur_dirty = false;
        }
        self.file.cur_rec = None;
        Ok(())
    }

    /// Remember the current position. Does not pin anything.
    pub fn mark(&mut self) {
        self.mark = ScanMark {
            page_no: self.file.cur_page_no,
            rec: self.file.cur_rec,
        };
    }

    /// Return to the marked position, repinning its page if the cursor has
    /// moved on.
    pub fn reset(&mut self, buf: &mut BufferManager) -> HeapResult<()> {
        if self.mark.page_no != self.file.cur_page_no {
            if let Some(page_no) = self.file.cur_page_no.take() {
                buf.unpin_page(self.file.file, page_no, self.file.cur_dirty)?;
                self.file.cur_dirty = false;
            }
            if let Some(page_no) = self.mark.page_no {
                buf.read_page(self.file.file, page_no)?;
            }
            self.file.cur_page_no = self.mark.page_no;
        }
        self.file.cur_rec = self.mark.rec;
        Ok(())
    }

    /// Advance to the next matching record and return its RID.
    pub fn scan_next(&mut self, buf: &mut BufferManager) -> HeapResult<Option<Rid>> {
        loop {
            let cur_page_no = match self.file.cur_page_no {
                Some(page_no) => page_no,
                None => {
                    let Some(first) = self.file.hdr.first_page else {
                        return Ok(None);
                    };
                    buf.read_page(self.file.file, first)?;
                    self.file.cur_page_no = Some(first);
                    self.file.cur_dirty = false;
                    self.file.cur_rec = None;
                    first
                }
            };

            let step = {
                let bytes = buf.page_mut(self.file.file, cur_page_no)?;
                let page = DataPage::from_buffer(bytes)?;
                let next_slot = match self.file.cur_rec {
                    None => page.first_record(),
                    Some(rid) => page.next_record(rid.slot_no),
                };
                match next_slot {
                    None => Step::EndOfPage(page.next_page()),
                    Some(slot_no) => {
                        let rid = Rid::new(cur_page_no, slot_no);
                        match page.record(slot_no) {
                            // Slot emptied under the iterator; step past it
                            None => Step::Skip(rid),
                            Some(record) => {
                                let matched = match &self.filter {
                                    None => true,
                                    Some(filter) => filter.matches(record),
                                };
                                if matched { Step::Found(rid) } else { Step::Skip(rid) }
                            }
                        }
                    }
                }
            };

            match step {
                Step::Found(rid) => {
                    self.file.cur_rec = Some(rid);
                    return Ok(Some(rid));
                }
                Step::Skip(rid) => {
                    self.file.cur_rec = Some(rid);
                }
                Step::EndOfPage(None) => return Ok(None),
                Step::EndOfPage(Some(next)) => {
                    buf.unpin_page(self.file.file, cur_page_no, self.file.cur_dirty)?;
                    self.file.cur_page_no = None;
                    self.file.cur_dirty = false;
                    self.file.cur_rec = None;
                    buf.read_page(self.file.file, next)?;
                    self.file.cur_page_no = Some(next);
                }
            }
        }
    }

    /// Read the record under the cursor.
    pub fn get_record<'b>(&mut self, buf: &'b mut BufferManager) -> HeapResult<&'b [u8]> {
        let rid = self.file.cur_rec.ok_or(HeapError::NoCursor)?;
        if self.file.cur_page_no != Some(rid.page_no) {
            return Err(HeapError::NoCursor);
        }

        let bytes = buf.page_mut(self.file.file, rid.page_no)?;
        DataPage::from_buffer(bytes)?
            .into_record(rid.slot_no)
            .ok_or(HeapError::BadRid {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            })
    }

    /// Delete the record under the cursor.
    ///
    /// The cursor does not advance: the next `scan_next` steps from the now
    /// empty slot, which the page iterator skips, so the following record is
    /// still visited.
    pub fn delete_record(&mut self, buf: &mut BufferManager) -> HeapResult<()> {
        let rid = self.file.cur_rec.ok_or(HeapError::NoCursor)?;
        if self.file.cur_page_no != Some(rid.page_no) {
            return Err(HeapError::NoCursor);
        }

        let deleted = {
            let bytes = buf.page_mut(self.file.file, rid.page_no)?;
            DataPage::from_buffer(bytes)?.delete(rid.slot_no)
        };
        if !deleted {
            return Err(HeapError::BadRid {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }

        self.file.hdr.rec_cnt -= 1;
        self.file.hdr_dirty = true;
        self.file.cur_dirty = true;
        Ok(())
    }

    /// Mark the cursor page as modified.
    pub fn mark_dirty(&mut self) {
        self.file.cur_dirty = true;
    }

    /// Number of records in the file
    pub fn rec_cnt(&self) -> u32 {
        self.file.rec_cnt()
    }

    pub fn close(&mut self, buf: &mut BufferManager) {
        self.file.close(buf);
    }
}

/// Append-only scan used for insertion.
///
/// Opens with an empty cursor so the first insert pins the last page of the
/// chain; when a page fills up, a fresh page is allocated, linked from the
/// old tail, and becomes the cursor.
pub struct InsertScan {
    pub(crate) file: HeapFile,
}

impl InsertScan {
    pub fn open(buf: &mut BufferManager, path: &Path) -> HeapResult<Self> {
        let file = HeapFile::open_at(buf, path, false)?;
        Ok(Self { file })
    }

    /// Append a record and return its RID.
    pub fn insert_record(&mut self, buf: &mut BufferManager, record: &[u8]) -> HeapResult<Rid> {
        if record.is_empty() || record.len() > MAX_RECORD_SIZE {
            return Err(HeapError::InvalidRecordLength(record.len()));
        }

        let cur = self.ensure_cursor(buf)?;

        let slot = {
            let bytes = buf.page_mut(self.file.file, cur)?;
            DataPage::from_buffer(bytes)?.try_insert(record)
        };
        if let Some(slot_no) = slot {
            return Ok(self.record_inserted(cur, slot_no));
        }

        // Page full: extend the chain with a fresh tail page
        let (new_page_no, new_bytes) = buf.alloc_page(self.file.file)?;
        DataPage::init(new_bytes)?;
        {
            let bytes = buf.page_mut(self.file.file, cur)?;
            DataPage::from_buffer(bytes)?.set_next_page(new_page_no);
        }
        self.file.hdr.last_page = Some(new_page_no);
        self.file.hdr.page_cnt += 1;
        self.file.hdr_dirty = true;

        buf.unpin_page(self.file.file, cur, true)?;
        self.file.cur_page_no = Some(new_page_no);
        self.file.cur_dirty = false;

        let slot_no = {
            let bytes = buf.page_mut(self.file.file, new_page_no)?;
            DataPage::from_buffer(bytes)?.try_insert(record)
        }
        .ok_or_else(|| {
            HeapError::CorruptPage("record did not fit into an empty page".to_string())
        })?;

        Ok(self.record_inserted(new_page_no, slot_no))
    }

    fn record_inserted(&mut self, page_no: PageId, slot_no: SlotNo) -> Rid {
        self.file.hdr.rec_cnt += 1;
        self.file.hdr_dirty = true;
        self.file.cur_dirty = true;
        Rid::new(page_no, slot_no)
    }

    /// Pin the page inserts go to, allocating the very first data page of an
    /// empty file on demand.
    fn ensure_cursor(&mut self, buf: &mut BufferManager) -> HeapResult<PageId> {
        if let Some(cur) = self.file.cur_page_no {
            return Ok(cur);
        }

        match self.file.hdr.last_page {
            Some(last) => {
                buf.read_page(self.file.file, last)?;
                self.file.cur_page_no = Some(last);
                self.file.cur_dirty = false;
                Ok(last)
            }
            None => {
                let (page_no, bytes) = buf.alloc_page(self.file.file)?;
                DataPage::init(bytes)?;
                self.file.hdr.first_page = Some(page_no);
                self.file.hdr.last_page = Some(page_no);
                self.file.hdr.page_cnt += 1;
                self.file.hdr_dirty = true;
                self.file.cur_page_no = Some(page_no);
                self.file.cur_dirty = false;
                Ok(page_no)
            }
        }
    }

    /// Number of records in the file
    pub fn rec_cnt(&self) -> u32 {
        self.file.rec_cnt()
    }

    pub fn close(&mut self, buf: &mut BufferManager) {
        self.file.close(buf);
    }
}
