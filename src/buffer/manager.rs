use log::error;

use super::BUFFER_POOL_SIZE;
use super::error::{BufferError, BufferResult};
use super::frame::FrameDesc;
use super::frame_table::FrameTable;
use crate::file::{FileHandle, PAGE_SIZE, PagedFileManager, PageId};

/// Manages a fixed pool of page frames with clock replacement.
///
/// Pages are pinned by `read_page`/`alloc_page` and stay resident until the
/// matching `unpin_page`. The clock hand only ever selects unpinned frames,
/// giving recently referenced pages a second chance via their reference bit.
pub struct BufferManager {
    /// Underlying paged file store
    file_manager: PagedFileManager,
    /// One descriptor per frame
    frames: Vec<FrameDesc>,
    /// One page-sized byte buffer per frame
    pool: Vec<Vec<u8>>,
    /// Maps (file, page) to the frame caching it
    frame_table: FrameTable,
    /// Last frame inspected by the clock
    clock_hand: usize,
}

impl BufferManager {
    /// Create a new buffer manager with the default pool size
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    /// Create a new buffer manager with the given number of frames
    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            frames: (0..capacity).map(|_| FrameDesc::new()).collect(),
            pool: (0..capacity).map(|_| vec![0u8; PAGE_SIZE]).collect(),
            frame_table: FrameTable::new(),
            clock_hand: capacity.saturating_sub(1),
        }
    }

    /// Get a reference to the file manager
    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    /// Get a mutable reference to the file manager
    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    /// Pin a page into the buffer pool and return its bytes.
    ///
    /// On a hit the pin count is incremented and the reference bit set. On a
    /// miss a frame is claimed via the clock and the page read from disk.
    /// Every successful call must be paired with exactly one `unpin_page`.
    pub fn read_page(&mut self, file: FileHandle, page_no: PageId) -> BufferResult<&mut [u8]> {
        if let Some(frame_no) = self.frame_table.lookup(file, page_no) {
            let frame = &mut self.frames[frame_no];
            frame.pin_count += 1;
            frame.ref_bit = true;
            return Ok(&mut self.pool[frame_no]);
        }

        let frame_no = self.alloc_buf()?;
        // On a failed read the frame stays free; nothing to roll back
        self.file_manager
            .read_page(file, page_no, &mut self.pool[frame_no])?;

        self.frames[frame_no].set(file, page_no);
        if let Err(err) = self.frame_table.insert(file, page_no, frame_no) {
            self.frames[frame_no].clear();
            return Err(err);
        }

        Ok(&mut self.pool[frame_no])
    }

    /// Re-borrow the bytes of a page that is already pinned.
    ///
    /// Does not change pin count or reference bit; the caller must hold a
    /// pin, otherwise the frame could be reclaimed after the borrow ends.
    pub fn page_mut(&mut self, file: FileHandle, page_no: PageId) -> BufferResult<&mut [u8]> {
        let frame_no = self
            .frame_table
            .lookup(file, page_no)
            .ok_or(BufferError::PageNotCached(page_no))?;
        debug_assert!(self.frames[frame_no].pin_count > 0);
        Ok(&mut self.pool[frame_no])
    }

    /// Release one pin on a page, ORing in the caller's dirty flag.
    pub fn unpin_page(&mut self, file: FileHandle, page_no: PageId, dirty: bool) -> BufferResult<()> {
        let frame_no = self
            .frame_table
            .lookup(file, page_no)
            .ok_or(BufferError::PageNotCached(page_no))?;

        let frame = &mut self.frames[frame_no];
        if frame.pin_count == 0 {
            return Err(BufferError::PageNotPinned(page_no));
        }

        frame.pin_count -= 1;
        if dirty {
            frame.dirty = true;
        }
        Ok(())
    }

    /// Allocate a new page in the file and pin it in a zeroed frame.
    pub fn alloc_page(&mut self, file: FileHandle) -> BufferResult<(PageId, &mut [u8])> {
        let page_no = self.file_manager.allocate_page(file)?;

        let frame_no = self.alloc_buf()?;
        self.pool[frame_no].fill(0);
        self.frames[frame_no].set(file, page_no);
        if let Err(err) = self.frame_table.insert(file, page_no, frame_no) {
            self.frames[frame_no].clear();
            return Err(err);
        }

        Ok((page_no, &mut self.pool[frame_no]))
    }

    /// Drop a page from the pool (if cached) and dispose of it in the file.
    pub fn dispose_page(&mut self, file: FileHandle, page_no: PageId) -> BufferResult<()> {
        if let Some(frame_no) = self.frame_table.lookup(file, page_no) {
            self.frames[frame_no].clear();
            self.frame_table.remove(file, page_no)?;
        }
        self.file_manager.dispose_page(file, page_no)?;
        Ok(())
    }

    /// Write back and evict every page of a file.
    ///
    /// Fails with `PagePinned` if any page of the file is still pinned (a
    /// leaked pin), and with `CorruptFrame` if an invalid frame still claims
    /// to belong to the file.
    pub fn flush_file(&mut self, file: FileHandle) -> BufferResult<()> {
        for frame_no in 0..self.frames.len() {
            let frame = self.frames[frame_no];
            if frame.file != Some(file) {
                continue;
            }
            if !frame.valid {
                return Err(BufferError::CorruptFrame(frame_no));
            }
            if frame.pin_count > 0 {
                return Err(BufferError::PagePinned(frame.page_no));
            }

            if frame.dirty {
                self.file_manager
                    .write_page(file, frame.page_no, &self.pool[frame_no])?;
                self.frames[frame_no].dirty = false;
            }

            self.frame_table.remove(file, frame.page_no)?;
            self.frames[frame_no].clear();
        }
        Ok(())
    }

    /// Close one open of a file, flushing its pages out of the pool first
    /// when this is the last outstanding open.
    pub fn close_file(&mut self, file: FileHandle) -> BufferResult<()> {
        if self.file_manager.open_count(file)? == 1 {
            self.flush_file(file)?;
        }
        self.file_manager.close_file(file)?;
        Ok(())
    }

    /// Claim a free frame using the clock replacement algorithm.
    ///
    /// Inspects at most 2N frames: the first sweep clears reference bits,
    /// the second catches frames whose bit was cleared on the first. A dirty
    /// victim is written back before its frame is reused; if that write
    /// fails the frame is left valid and dirty.
    fn alloc_buf(&mut self) -> BufferResult<usize> {
        let n = self.frames.len();
        for _ in 0..2 * n {
            self.clock_hand = (self.clock_hand + 1) % n;
            let h = self.clock_hand;

            if self.frames[h].pin_count > 0 {
                continue;
            }
            if !self.frames[h].valid {
                return Ok(h);
            }
            if self.frames[h].ref_bit {
                self.frames[h].ref_bit = false;
                continue;
            }

            // Victim: write back if dirty, then unmap and free the frame
            let file = self.frames[h].file.ok_or(BufferError::CorruptFrame(h))?;
            let page_no = self.frames[h].page_no;

            if self.frames[h].dirty {
                self.file_manager.write_page(file, page_no, &self.pool[h])?;
                self.frames[h].dirty = false;
            }

            self.frame_table.remove(file, page_no)?;
            self.frames[h].clear();
            return Ok(h);
        }

        Err(BufferError::PoolExhausted)
    }

    /// Number of frames in the pool
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Number of pages currently cached
    pub fn cached_page_count(&self) -> usize {
        self.frame_table.len()
    }

    /// Check if a page is in the buffer pool
    pub fn is_cached(&self, file: FileHandle, page_no: PageId) -> bool {
        self.frame_table.lookup(file, page_no).is_some()
    }

    /// Pin count of a cached page, or `None` if it is not cached
    pub fn pin_count(&self, file: FileHandle, page_no: PageId) -> Option<u32> {
        self.frame_table
            .lookup(file, page_no)
            .map(|frame_no| self.frames[frame_no].pin_count)
    }

    /// Number of dirty frames in the pool
    pub fn dirty_frame_count(&self) -> usize {
        self.frames.iter().filter(|f| f.valid && f.dirty).count()
    }

    /// Verify that descriptors and the frame table agree in both directions
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut valid_frames = 0;
        for (frame_no, frame) in self.frames.iter().enumerate() {
            if frame.valid {
                valid_frames += 1;
                let file = frame.file.expect("valid frame must have a file");
                assert_eq!(
                    self.frame_table.lookup(file, frame.page_no),
                    Some(frame_no),
                    "valid frame {frame_no} missing from the frame table"
                );
            } else {
                assert!(frame.file.is_none(), "free frame {frame_no} claims a file");
            }
        }
        assert_eq!(self.frame_table.len(), valid_frames);
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Flush every remaining dirty page; failures are logged, not raised
        for frame_no in 0..self.frames.len() {
            let frame = self.frames[frame_no];
            if frame.valid && frame.dirty {
                let Some(file) = frame.file else {
                    error!("frame {frame_no} is valid but has no file; not flushed");
                    continue;
                };
                if let Err(err) =
                    self.file_manager
                        .write_page(file, frame.page_no, &self.pool[frame_no])
                {
                    error!("failed to flush page {} on teardown: {err}", frame.page_no);
                }
            }
        }
        if let Err(err) = self.file_manager.sync_all() {
            error!("failed to sync files on teardown: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_pool(capacity: usize) -> (TempDir, BufferManager, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        let buffer_manager = BufferManager::with_capacity(file_manager, capacity);
        (temp_dir, buffer_manager, handle)
    }

    /// Allocate and seed `count` pages on disk through the file manager alone
    fn seed_pages(bm: &mut BufferManager, handle: FileHandle, count: u32) {
        let fm = bm.file_manager_mut();
        for page_no in 0..count {
            assert_eq!(fm.allocate_page(handle).unwrap(), page_no);
            let mut buf = vec![0u8; PAGE_SIZE];
            buf[0] = page_no as u8;
            fm.write_page(handle, page_no, &buf).unwrap();
        }
    }

    #[test]
    fn test_read_page_loads_from_disk() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);
        seed_pages(&mut bm, handle, 1);

        let page = bm.read_page(handle, 0).unwrap();
        assert_eq!(page[0], 0);
        assert!(bm.is_cached(handle, 0));
        assert_eq!(bm.pin_count(handle, 0), Some(1));
        bm.assert_consistent();
    }

    #[test]
    fn test_read_page_hit_increments_pin() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);
        seed_pages(&mut bm, handle, 1);

        bm.read_page(handle, 0).unwrap();
        bm.read_page(handle, 0).unwrap();
        assert_eq!(bm.pin_count(handle, 0), Some(2));
        assert_eq!(bm.cached_page_count(), 1);

        bm.unpin_page(handle, 0, false).unwrap();
        bm.unpin_page(handle, 0, false).unwrap();
        assert_eq!(bm.pin_count(handle, 0), Some(0));
    }

    #[test]
    fn test_unpin_unpinned_page() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);
        seed_pages(&mut bm, handle, 1);

        bm.read_page(handle, 0).unwrap();
        bm.unpin_page(handle, 0, false).unwrap();

        let result = bm.unpin_page(handle, 0, false);
        assert!(matches!(result, Err(BufferError::PageNotPinned(0))));
    }

    #[test]
    fn test_unpin_uncached_page() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);

        let result = bm.unpin_page(handle, 9, false);
        assert!(matches!(result, Err(BufferError::PageNotCached(9))));
    }

    #[test]
    fn test_unpin_dirty_flag_is_sticky() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);
        seed_pages(&mut bm, handle, 1);

        bm.read_page(handle, 0).unwrap();
        bm.read_page(handle, 0).unwrap();
        bm.unpin_page(handle, 0, true).unwrap();
        // A later clean unpin must not clear the dirty flag
        bm.unpin_page(handle, 0, false).unwrap();
        assert_eq!(bm.dirty_frame_count(), 1);
    }

    #[test]
    fn test_alloc_page_is_pinned_and_zeroed() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);

        let (page_no, page) = bm.alloc_page(handle).unwrap();
        assert_eq!(page_no, 0);
        assert!(page.iter().all(|&b| b == 0));
        assert_eq!(bm.pin_count(handle, page_no), Some(1));
        bm.assert_consistent();
    }

    #[test]
    fn test_pool_exhausted_when_all_pinned() {
        let (_temp_dir, mut bm, handle) = setup_pool(3);
        seed_pages(&mut bm, handle, 4);

        bm.read_page(handle, 0).unwrap();
        bm.read_page(handle, 1).unwrap();
        bm.read_page(handle, 2).unwrap();

        let result = bm.read_page(handle, 3);
        assert!(matches!(result, Err(BufferError::PoolExhausted)));

        // Releasing one pin makes the read succeed
        bm.unpin_page(handle, 1, false).unwrap();
        bm.read_page(handle, 3).unwrap();
        assert!(!bm.is_cached(handle, 1));
        bm.assert_consistent();
    }

    #[test]
    fn test_clock_evicts_exactly_one_frame() {
        let (_temp_dir, mut bm, handle) = setup_pool(3);
        seed_pages(&mut bm, handle, 4);

        for page_no in 0..3 {
            bm.read_page(handle, page_no).unwrap();
            bm.unpin_page(handle, page_no, false).unwrap();
        }
        assert_eq!(bm.cached_page_count(), 3);

        bm.read_page(handle, 3).unwrap();
        bm.unpin_page(handle, 3, false).unwrap();

        // Exactly one of the original three was evicted
        let evicted = (0..3)
            .filter(|&page_no| !bm.is_cached(handle, page_no))
            .count();
        assert_eq!(evicted, 1);
        assert!(bm.is_cached(handle, 3));
        assert_eq!(bm.cached_page_count(), 3);
        bm.assert_consistent();
    }

    #[test]
    fn test_second_chance_spares_referenced_page() {
        let (_temp_dir, mut bm, handle) = setup_pool(3);
        seed_pages(&mut bm, handle, 5);

        for page_no in 0..3 {
            bm.read_page(handle, page_no).unwrap();
            bm.unpin_page(handle, page_no, false).unwrap();
        }

        // First eviction clears every reference bit and takes page 0
        bm.read_page(handle, 3).unwrap();
        bm.unpin_page(handle, 3, false).unwrap();
        assert!(!bm.is_cached(handle, 0));

        // Re-reference page 1 so its bit is set again
        bm.read_page(handle, 1).unwrap();
        bm.unpin_page(handle, 1, false).unwrap();

        // The next eviction must pass over page 1 and take page 2
        bm.read_page(handle, 4).unwrap();
        bm.unpin_page(handle, 4, false).unwrap();
        assert!(bm.is_cached(handle, 1));
        assert!(!bm.is_cached(handle, 2));
        assert!(bm.is_cached(handle, 3));
        assert!(bm.is_cached(handle, 4));
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() {
        let (_temp_dir, mut bm, handle) = setup_pool(2);
        seed_pages(&mut bm, handle, 3);

        {
            let page = bm.read_page(handle, 0).unwrap();
            page[10] = 77;
        }
        bm.unpin_page(handle, 0, true).unwrap();

        // Force page 0 out by filling the pool
        bm.read_page(handle, 1).unwrap();
        bm.unpin_page(handle, 1, false).unwrap();
        bm.read_page(handle, 2).unwrap();
        bm.unpin_page(handle, 2, false).unwrap();
        assert!(!bm.is_cached(handle, 0));

        // Reload from disk and check the modification survived
        let page = bm.read_page(handle, 0).unwrap();
        assert_eq!(page[10], 77);
        bm.unpin_page(handle, 0, false).unwrap();
    }

    #[test]
    fn test_flush_file_writes_back_and_evicts() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);
        seed_pages(&mut bm, handle, 3);

        for page_no in 0..3 {
            let page = bm.read_page(handle, page_no).unwrap();
            page[0] = 100 + page_no as u8;
        }
        for page_no in 0..3 {
            bm.unpin_page(handle, page_no, true).unwrap();
        }

        bm.flush_file(handle).unwrap();
        assert_eq!(bm.cached_page_count(), 0);
        assert_eq!(bm.dirty_frame_count(), 0);
        bm.assert_consistent();

        // Bytes on disk match the last written contents
        for page_no in 0..3 {
            let mut buf = vec![0u8; PAGE_SIZE];
            bm.file_manager_mut().read_page(handle, page_no, &mut buf).unwrap();
            assert_eq!(buf[0], 100 + page_no as u8);
        }
    }

    #[test]
    fn test_flush_file_detects_leaked_pin() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);
        seed_pages(&mut bm, handle, 1);

        bm.read_page(handle, 0).unwrap();
        let result = bm.flush_file(handle);
        assert!(matches!(result, Err(BufferError::PagePinned(0))));

        bm.unpin_page(handle, 0, false).unwrap();
        bm.flush_file(handle).unwrap();
    }

    #[test]
    fn test_flush_file_ignores_other_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_a = temp_dir.path().join("a.db");
        let file_b = temp_dir.path().join("b.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&file_a).unwrap();
        file_manager.create_file(&file_b).unwrap();
        let a = file_manager.open_file(&file_a).unwrap();
        let b = file_manager.open_file(&file_b).unwrap();

        let mut bm = BufferManager::with_capacity(file_manager, 4);
        seed_pages(&mut bm, a, 1);
        seed_pages(&mut bm, b, 1);

        bm.read_page(a, 0).unwrap();
        bm.read_page(b, 0).unwrap();
        bm.unpin_page(a, 0, false).unwrap();

        // b's page is still pinned but flushing a must not care
        bm.flush_file(a).unwrap();
        assert!(!bm.is_cached(a, 0));
        assert!(bm.is_cached(b, 0));
        bm.unpin_page(b, 0, false).unwrap();
    }

    #[test]
    fn test_dispose_page_round_trip() {
        let (_temp_dir, mut bm, handle) = setup_pool(4);

        let before = bm.cached_page_count();
        let (page_no, _) = bm.alloc_page(handle).unwrap();
        bm.unpin_page(handle, page_no, false).unwrap();
        bm.dispose_page(handle, page_no).unwrap();

        // Pool state is as if the allocation never happened
        assert_eq!(bm.cached_page_count(), before);
        assert!(!bm.is_cached(handle, page_no));
        bm.assert_consistent();
    }

    #[test]
    fn test_pins_balance_to_zero() {
        let (_temp_dir, mut bm, handle) = setup_pool(8);
        seed_pages(&mut bm, handle, 5);

        for round in 0..3 {
            for page_no in 0..5 {
                bm.read_page(handle, page_no).unwrap();
                if round == 1 {
                    bm.read_page(handle, page_no).unwrap();
                    bm.unpin_page(handle, page_no, false).unwrap();
                }
                bm.unpin_page(handle, page_no, false).unwrap();
            }
        }

        for page_no in 0..5 {
            assert_eq!(bm.pin_count(handle, page_no), Some(0));
        }
        bm.assert_consistent();
    }

    #[test]
    fn test_drop_flushes_dirty_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        {
            let mut bm = BufferManager::with_capacity(file_manager, 4);
            let (page_no, page) = bm.alloc_page(handle).unwrap();
            page[0] = 88;
            bm.unpin_page(handle, page_no, true).unwrap();
            // bm dropped here; the dirty page must reach disk
        }

        let mut file_manager = PagedFileManager::new();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        file_manager.read_page(handle, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 88);
    }
}
