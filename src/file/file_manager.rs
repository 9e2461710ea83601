use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageId};

/// Handle to an open paged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// One open paged file: the OS handle plus its page-allocation state
struct OpenFile {
    file: std::fs::File,
    path: PathBuf,
    /// Pages allocated so far; valid page numbers are 0..page_cnt
    page_cnt: PageId,
    /// Outstanding opens; the OS handle is dropped when this reaches zero
    opens: usize,
}

/// The paged file store.
///
/// A file is a dense array of fixed-size pages. `allocate_page` hands out
/// the next page number and zero-extends the file, so an allocated page
/// reads back as zeros until its first write; reading or writing a page
/// that was never allocated is a caller bug and is rejected. Opening a
/// path that is already open returns the same handle with a bumped open
/// count; the handle stays usable until every open has been closed.
pub struct PagedFileManager {
    files: HashMap<FileHandle, OpenFile>,
    by_path: HashMap<PathBuf, FileHandle>,
    next_id: usize,
    max_open: usize,
}

impl PagedFileManager {
    pub fn new() -> Self {
        Self::with_max_files(128)
    }

    pub fn with_max_files(max_open: usize) -> Self {
        Self {
            files: HashMap::new(),
            by_path: HashMap::new(),
            next_id: 0,
            max_open,
        }
    }

    fn entry(&mut self, handle: FileHandle) -> FileResult<&mut OpenFile> {
        self.files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }

    fn check_buffer(len: usize) -> FileResult<()> {
        if len != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: len,
            });
        }
        Ok(())
    }

    /// Create a new, empty paged file
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(FileError::FileAlreadyExists(path.display().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open a paged file, or bump the open count if the path is already open
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let shown = path.as_ref().display().to_string();
        let path = path
            .as_ref()
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(shown))?;

        if let Some(&handle) = self.by_path.get(&path) {
            self.entry(handle)?.opens += 1;
            return Ok(handle);
        }
        if self.files.len() >= self.max_open {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let page_cnt = file.metadata()?.len().div_ceil(PAGE_SIZE as u64) as PageId;

        let handle = FileHandle(self.next_id);
        self.next_id += 1;
        self.by_path.insert(path.clone(), handle);
        self.files.insert(
            handle,
            OpenFile {
                file,
                path,
                page_cnt,
                opens: 1,
            },
        );
        Ok(handle)
    }

    /// Release one open; the file really closes when the count hits zero
    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self.entry(handle)?;
        entry.opens -= 1;
        let fully_closed = entry.opens == 0;
        if fully_closed && let Some(open) = self.files.remove(&handle) {
            self.by_path.remove(&open.path);
        }
        Ok(())
    }

    /// Delete a file from disk; refused while any open is outstanding
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        if let Ok(canonical) = path.canonicalize()
            && self.by_path.contains_key(&canonical)
        {
            return Err(FileError::FileStillOpen(path.display().to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Read an allocated page into a page-sized buffer
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &mut [u8],
    ) -> FileResult<()> {
        Self::check_buffer(buffer.len())?;
        let entry = self.entry(handle)?;
        if page_id >= entry.page_cnt {
            return Err(FileError::PageOutOfRange(page_id));
        }

        entry.file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        entry.file.read_exact(buffer)?;
        Ok(())
    }

    /// Write a page-sized buffer to an allocated page
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &[u8],
    ) -> FileResult<()> {
        Self::check_buffer(buffer.len())?;
        let entry = self.entry(handle)?;
        if page_id >= entry.page_cnt {
            return Err(FileError::PageOutOfRange(page_id));
        }

        entry.file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        entry.file.write_all(buffer)?;
        Ok(())
    }

    /// Allocate the next page of a file and return its number.
    ///
    /// Numbers are dense and monotonically increasing. The file is
    /// zero-extended, so the new page has a defined all-zero image even if
    /// it is never written back.
    pub fn allocate_page(&mut self, handle: FileHandle) -> FileResult<PageId> {
        let entry = self.entry(handle)?;
        let page_id = entry.page_cnt;
        entry
            .file
            .set_len(Self::page_offset(page_id) + PAGE_SIZE as u64)?;
        entry.page_cnt += 1;
        Ok(page_id)
    }

    /// Dispose of an allocated page by wiping it in place.
    ///
    /// The file never shrinks and page numbers are never reused; wiping
    /// keeps a later read of the slot from resurrecting stale records.
    pub fn dispose_page(&mut self, handle: FileHandle, page_id: PageId) -> FileResult<()> {
        let zeros = vec![0u8; PAGE_SIZE];
        self.write_page(handle, page_id, &zeros)
    }

    /// First page of a file (the header page of every heap file)
    pub fn first_page(&mut self, handle: FileHandle) -> FileResult<PageId> {
        if self.entry(handle)?.page_cnt == 0 {
            return Err(FileError::PageOutOfRange(0));
        }
        Ok(0)
    }

    /// Number of allocated pages
    pub fn page_count(&mut self, handle: FileHandle) -> FileResult<PageId> {
        Ok(self.entry(handle)?.page_cnt)
    }

    /// Flush OS buffers for every open file
    pub fn sync_all(&mut self) -> FileResult<()> {
        for open in self.files.values_mut() {
            open.file.sync_data()?;
        }
        Ok(())
    }

    /// Check whether a handle still refers to an open file
    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.files.contains_key(&handle)
    }

    /// How many opens of this handle are still outstanding
    pub fn open_count(&self, handle: FileHandle) -> FileResult<usize> {
        self.files
            .get(&handle)
            .map(|open| open.opens)
            .ok_or(FileError::InvalidHandle(handle.0))
    }

    /// Number of distinct files currently open
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }
}
