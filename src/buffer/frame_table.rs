use std::collections::HashMap;

use super::error::{BufferError, BufferResult};
use crate::file::{FileHandle, PageId};

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    file: FileHandle,
    page_no: PageId,
}

/// Maps (file, page) pairs to frame numbers.
///
/// Every valid frame has exactly one entry here, and every entry points at a
/// valid frame holding that page.
pub(crate) struct FrameTable {
    map: HashMap<FrameKey, usize>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, file: FileHandle, page_no: PageId, frame_no: usize) -> BufferResult<()> {
        let key = FrameKey { file, page_no };
        if self.map.contains_key(&key) {
            return Err(BufferError::DuplicateMapping(page_no));
        }
        self.map.insert(key, frame_no);
        Ok(())
    }

    pub fn lookup(&self, file: FileHandle, page_no: PageId) -> Option<usize> {
        self.map.get(&FrameKey { file, page_no }).copied()
    }

    pub fn remove(&mut self, file: FileHandle, page_no: PageId) -> BufferResult<()> {
        self.map
            .remove(&FrameKey { file, page_no })
            .map(|_| ())
            .ok_or(BufferError::PageNotCached(page_no))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;

    fn handles() -> (FileHandle, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut fm = PagedFileManager::new();
        let a = temp_dir.path().join("a.db");
        let b = temp_dir.path().join("b.db");
        fm.create_file(&a).unwrap();
        fm.create_file(&b).unwrap();
        // Handles outlive the manager; only their identity matters here
        (fm.open_file(&a).unwrap(), fm.open_file(&b).unwrap())
    }

    #[test]
    fn test_insert_lookup_remove() {
        let (a, _) = handles();
        let mut table = FrameTable::new();

        table.insert(a, 3, 7).unwrap();
        assert_eq!(table.lookup(a, 3), Some(7));
        assert_eq!(table.len(), 1);

        table.remove(a, 3).unwrap();
        assert_eq!(table.lookup(a, 3), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_insert_conflict() {
        let (a, _) = handles();
        let mut table = FrameTable::new();

        table.insert(a, 3, 7).unwrap();
        let result = table.insert(a, 3, 8);
        assert!(matches!(result, Err(BufferError::DuplicateMapping(3))));
        assert_eq!(table.lookup(a, 3), Some(7));
    }

    #[test]
    fn test_remove_missing() {
        let (a, _) = handles();
        let mut table = FrameTable::new();

        let result = table.remove(a, 5);
        assert!(matches!(result, Err(BufferError::PageNotCached(5))));
    }

    #[test]
    fn test_same_page_in_different_files() {
        let (a, b) = handles();
        let mut table = FrameTable::new();

        table.insert(a, 0, 1).unwrap();
        table.insert(b, 0, 2).unwrap();
        assert_eq!(table.lookup(a, 0), Some(1));
        assert_eq!(table.lookup(b, 0), Some(2));
    }
}
