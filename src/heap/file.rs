use std::path::Path;

use log::warn;

use super::Rid;
use super::error::{HeapError, HeapResult};
use super::page::DataPage;
use crate::buffer::BufferManager;
use crate::file::{FileHandle, PageId};

/// Bytes reserved for the file name in the header page
const MAX_NAME_LEN: usize = 64;

const NO_PAGE: i32 = -1;

/// Header stored on the first page of every heap file
#[derive(Debug, Clone)]
pub(crate) struct FileHdr {
    pub name: String,
    pub first_page: Option<PageId>,
    pub last_page: Option<PageId>,
    /// Header page plus all data pages
    pub page_cnt: u32,
    pub rec_cnt: u32,
}

impl FileHdr {
    const SIZE: usize = MAX_NAME_LEN + 16;

    fn encode_page(page: Option<PageId>) -> i32 {
        match page {
            Some(page_no) => page_no as i32,
            None => NO_PAGE,
        }
    }

    fn decode_page(raw: i32) -> Option<PageId> {
        if raw < 0 { None } else { Some(raw as PageId) }
    }

    pub fn serialize(&self, buffer: &mut [u8]) {
        buffer[..MAX_NAME_LEN].fill(0);
        let name = self.name.as_bytes();
        let name_len = name.len().min(MAX_NAME_LEN - 1);
        buffer[..name_len].copy_from_slice(&name[..name_len]);

        let base = MAX_NAME_LEN;
        buffer[base..base + 4].copy_from_slice(&Self::encode_page(self.first_page).to_le_bytes());
        buffer[base + 4..base + 8].copy_from_slice(&Self::encode_page(self.last_page).to_le_bytes());
        buffer[base + 8..base + 12].copy_from_slice(&self.page_cnt.to_le_bytes());
        buffer[base + 12..base + 16].copy_from_slice(&self.rec_cnt.to_le_bytes());
    }

    pub fn deserialize(buffer: &[u8]) -> HeapResult<Self> {
        if buffer.len() < Self::SIZE {
            return Err(HeapError::CorruptPage(format!(
                "not enough data for file header: {} bytes",
                buffer.len()
            )));
        }

        let name_end = buffer[..MAX_NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN);
        let name = String::from_utf8_lossy(&buffer[..name_end]).into_owned();

        let base = MAX_NAME_LEN;
        let read_i32 = |at: usize| {
            i32::from_le_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
        };
        let read_u32 = |at: usize| {
            u32::from_le_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
        };

        let first_page = Self::decode_page(read_i32(base));
        let last_page = Self::decode_page(read_i32(base + 4));
        let page_cnt = read_u32(base + 8);
        let rec_cnt = read_u32(base + 12);

        let pages_valid = match (first_page, last_page) {
            (None, None) => true,
            (Some(first), Some(last)) => {
                first >= 1 && last >= 1 && first < page_cnt && last < page_cnt
            }
            _ => false,
        };
        if page_cnt == 0 || !pages_valid {
            return Err(HeapError::CorruptPage(format!(
                "inconsistent file header: first={first_page:?} last={last_page:?} pages={page_cnt}"
            )));
        }

        Ok(Self {
            name,
            first_page,
            last_page,
            page_cnt,
            rec_cnt,
        })
    }
}

/// Handle on an open heap file.
///
/// Keeps the header page pinned for its whole lifetime and at most one data
/// page pinned as the cursor. Must be released with `close`; the buffer
/// manager cannot be reached from `drop`, so a handle dropped without close
/// leaks its pins (visible as a pinned-page error on the next flush).
pub struct HeapFile {
    pub(crate) file: FileHandle,
    pub(crate) header_page_no: PageId,
    pub(crate) hdr: FileHdr,
    pub(crate) hdr_dirty: bool,
    pub(crate) cur_page_no: Option<PageId>,
    pub(crate) cur_dirty: bool,
    pub(crate) cur_rec: Option<Rid>,
    closed: bool,
}

impl HeapFile {
    /// Create a new heap file with an empty first data page.
    ///
    /// Fails if a file already exists at `path`.
    pub fn create(buf: &mut BufferManager, path: &Path) -> HeapResult<()> {
        buf.file_manager_mut().create_file(path)?;
        let file = buf.file_manager_mut().open_file(path)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (header_page_no, _) = buf.alloc_page(file)?;
        let (data_page_no, data_bytes) = buf.alloc_page(file)?;
        DataPage::init(data_bytes)?;

        let hdr = FileHdr {
            name,
            first_page: Some(data_page_no),
            last_page: Some(data_page_no),
            page_cnt: 2,
            rec_cnt: 0,
        };
        hdr.serialize(buf.page_mut(file, header_page_no)?);

        buf.unpin_page(file, data_page_no, true)?;
        buf.unpin_page(file, header_page_no, true)?;
        buf.close_file(file)?;
        Ok(())
    }

    /// Delete a heap file; it must not be open.
    pub fn destroy(buf: &mut BufferManager, path: &Path) -> HeapResult<()> {
        buf.file_manager_mut().remove_file(path)?;
        Ok(())
    }

    /// Open an existing heap file, pinning the first data page as the cursor.
    pub fn open(buf: &mut BufferManager, path: &Path) -> HeapResult<Self> {
        Self::open_at(buf, path, true)
    }

    pub(crate) fn open_at(
        buf: &mut BufferManager,
        path: &Path,
        pin_first: bool,
    ) -> HeapResult<Self> {
        let file = buf.file_manager_mut().open_file(path)?;

        let header_page_no = match buf.file_manager_mut().first_page(file) {
            Ok(page_no) => page_no,
            Err(err) => {
                let _ = buf.file_manager_mut().close_file(file);
                return Err(err.into());
            }
        };

        let hdr = match buf.read_page(file, header_page_no) {
            Ok(bytes) => match FileHdr::deserialize(bytes) {
                Ok(hdr) => hdr,
                Err(err) => {
                    let _ = buf.unpin_page(file, header_page_no, false);
                    let _ = buf.file_manager_mut().close_file(file);
                    return Err(err);
                }
            },
            Err(err) => {
                let _ = buf.file_manager_mut().close_file(file);
                return Err(err.into());
            }
        };

        let mut cur_page_no = None;
        if pin_first && let Some(first) = hdr.first_page {
            if let Err(err) = buf.read_page(file, first) {
                let _ = buf.unpin_page(file, header_page_no, false);
                let _ = buf.file_manager_mut().close_file(file);
                return Err(err.into());
            }
            cur_page_no = Some(first);
        }

        Ok(Self {
            file,
            header_page_no,
            hdr,
            hdr_dirty: false,
            cur_page_no,
            cur_dirty: false,
            cur_rec: None,
            closed: false,
        })
    }

    /// Release the cursor and header pins and close the file.
    ///
    /// Teardown never fails; problems are logged and skipped.
    pub fn close(&mut self, buf: &mut BufferManager) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.hdr_dirty {
            match buf.page_mut(self.file, self.header_page_no) {
                Ok(bytes) => self.hdr.serialize(bytes),
                Err(err) => warn!("failed to write back header of {}: {err}", self.hdr.name),
            }
        }

        if let Some(page_no) = self.cur_page_no.take()
            && let Err(err) = buf.unpin_page(self.file, page_no, self.cur_dirty)
        {
            warn!("failed to unpin data page {page_no} of {}: {err}", self.hdr.name);
        }
        self.cur_dirty = false;
        self.cur_rec = None;

        if let Err(err) = buf.unpin_page(self.file, self.header_page_no, self.hdr_dirty) {
            warn!("failed to unpin header page of {}: {err}", self.hdr.name);
        }
        if let Err(err) = buf.close_file(self.file) {
            warn!("failed to close {}: {err}", self.hdr.name);
        }
    }

    /// Number of records in the file
    pub fn rec_cnt(&self) -> u32 {
        self.hdr.rec_cnt
    }

    /// Fetch a record by id, switching the cursor page if needed.
    ///
    /// The returned slice aliases the pinned page and is valid until the
    /// buffer manager is used again.
    pub fn get_record<'b>(&mut self, buf: &'b mut BufferManager, rid: Rid) -> HeapResult<&'b [u8]> {
        if rid.page_no == self.header_page_no || rid.page_no >= self.hdr.page_cnt {
            return Err(HeapError::BadRid {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }

        if self.cur_page_no != Some(rid.page_no) {
            if let Some(cur) = self.cur_page_no.take() {
                // Release the old cursor pin before touching any state the
                // error path would leave behind
                let unpinned = buf.unpin_page(self.file, cur, self.cur_dirty);
                self.cur_dirty = false;
                self.cur_rec = None;
                unpinned?;
            }
            buf.read_page(self.file, rid.page_no)?;
            self.cur_page_no = Some(rid.page_no);
            self.cur_dirty = false;
        }

        let bytes = buf.page_mut(self.file, rid.page_no)?;
        let page = DataPage::from_buffer(bytes)?;
        let record = page.into_record(rid.slot_no).ok_or(HeapError::BadRid {
            page_no: rid.page_no,
            slot_no: rid.slot_no,
        })?;
        self.cur_rec = Some(rid);
        Ok(record)
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "heap file {} dropped without close; its pinned pages leak",
                self.hdr.name
            );
        }
    }
}
