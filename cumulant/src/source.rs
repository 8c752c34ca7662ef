//! Types related to source files.

use std::fmt;
use std::ops::Range;

use crate::files::FileId;

/// Interned strings.
pub type StringId = lasso::Spur;

/// String interner.
pub type StringInterner = lasso::Rodeo;

/// Byte offsets into source files.
pub type BytePos = u32;

/// Byte ranges in source files.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct FileRange {
    file_id: FileId,
    byte_range: ByteRange,
}

impl fmt::Debug for FileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileRange({}, {}..{})",
            self.file_id, self.byte_range.start, self.byte_range.end
        )
    }
}

impl FileRange {
    pub const fn new(file_id: FileId, byte_range: ByteRange) -> FileRange {
        FileRange {
            file_id,
            byte_range,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn byte_range(&self) -> ByteRange {
        self.byte_range
    }

    pub const fn start(&self) -> BytePos {
        self.byte_range.start
    }

    pub const fn end(&self) -> BytePos {
        self.byte_range.end
    }

    /// The smallest range that covers both ranges, if they are in the same
    /// file.
    pub fn merge(&self, other: &FileRange) -> Option<FileRange> {
        (self.file_id == other.file_id).then(|| {
            FileRange::new(self.file_id, self.byte_range.merge(&other.byte_range))
        })
    }
}

impl From<FileRange> for Range<usize> {
    fn from(range: FileRange) -> Self {
        range.byte_range.into()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ByteRange {
    start: BytePos,
    end: BytePos,
}

impl fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteRange({}..{})", self.start, self.end)
    }
}

impl ByteRange {
    pub const fn new(start: BytePos, end: BytePos) -> ByteRange {
        ByteRange { start, end }
    }

    pub const fn start(&self) -> BytePos {
        self.start
    }

    pub const fn end(&self) -> BytePos {
        self.end
    }

    pub fn merge(&self, other: &ByteRange) -> ByteRange {
        ByteRange::new(
            std::cmp::min(self.start, other.start),
            std::cmp::max(self.end, other.end),
        )
    }
}

impl From<ByteRange> for Range<usize> {
    fn from(range: ByteRange) -> Self {
        (range.start as usize)..(range.end as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_ranges_in_same_file() {
        let file_id = FileId::try_from(1).unwrap();
        let lhs = FileRange::new(file_id, ByteRange::new(4, 8));
        let rhs = FileRange::new(file_id, ByteRange::new(2, 6));
        let merged = lhs.merge(&rhs).unwrap();
        assert_eq!((merged.start(), merged.end()), (2, 8));
    }
}
