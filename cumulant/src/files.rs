//! The database of source files that diagnostics point into.
//!
//! Definitions are handed to the elaborator already parsed, but their ranges
//! still refer to the text they were parsed from. That text is registered
//! here so that `codespan-reporting` can render snippets for messages.

use std::fmt;
use std::num::NonZeroU32;
use std::ops::Range;

use codespan_reporting::files::Error;

use crate::source::FileRange;

/// File id.
// - `u32` rather than `usize` keeps `FileRange` small
// - `NonZeroU32` lets `Option<FileRange>` reuse the niche
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileId(NonZeroU32);

impl FileId {
    fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<u32> for FileId {
    type Error = <NonZeroU32 as TryFrom<u32>>::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(FileId(NonZeroU32::try_from(value)?))
    }
}

impl From<FileId> for u32 {
    fn from(value: FileId) -> u32 {
        value.0.get()
    }
}

/// A named source text, with the byte offsets at which its lines start.
pub struct SourceFile {
    name: String,
    source: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(name: String, source: String) -> SourceFile {
        let line_starts = codespan_reporting::files::line_starts(&source).collect();
        SourceFile {
            name,
            source,
            line_starts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn line_start(&self, line_index: usize) -> Result<usize, Error> {
        use std::cmp::Ordering;

        match line_index.cmp(&self.line_starts.len()) {
            Ordering::Less => Ok(self.line_starts[line_index]),
            Ordering::Equal => Ok(self.source.len()),
            Ordering::Greater => Err(Error::LineTooLarge {
                given: line_index,
                max: self.line_starts.len() - 1,
            }),
        }
    }
}

#[derive(Default)]
pub struct Files {
    files: Vec<SourceFile>,
}

impl Files {
    pub fn new() -> Files {
        Files { files: Vec::new() }
    }

    /// Add a file to the database, returning the id that ranges into it
    /// should use.
    pub fn add(&mut self, name: String, source: String) -> FileId {
        self.files.push(SourceFile::new(name, source));
        let id = u32::try_from(self.files.len()).ok().and_then(|len| FileId::try_from(len).ok());
        match id {
            Some(id) => id,
            None => panic!("too many source files (the maximum is `u32::MAX`)"),
        }
    }

    pub fn get(&self, file_id: FileId) -> Result<&SourceFile, Error> {
        self.files.get(file_id.index()).ok_or(Error::FileMissing)
    }

    /// The text covered by a range, if the range lies within its file.
    pub fn text(&self, range: FileRange) -> Option<&str> {
        let file = self.get(range.file_id()).ok()?;
        file.source.get(Range::from(range))
    }
}

impl<'a> codespan_reporting::files::Files<'a> for Files {
    type FileId = FileId;
    type Name = &'a str;
    type Source = &'a str;

    fn name(&'a self, file_id: FileId) -> Result<&'a str, Error> {
        Ok(self.get(file_id)?.name())
    }

    fn source(&'a self, file_id: FileId) -> Result<&'a str, Error> {
        Ok(self.get(file_id)?.source())
    }

    fn line_index(&'a self, file_id: FileId, byte_index: usize) -> Result<usize, Error> {
        let file = self.get(file_id)?;
        Ok(match file.line_starts.binary_search(&byte_index) {
            Ok(line) => line,
            Err(next_line) => next_line - 1,
        })
    }

    fn line_range(&'a self, file_id: FileId, line_index: usize) -> Result<Range<usize>, Error> {
        let file = self.get(file_id)?;
        let start = file.line_start(line_index)?;
        let end = file.line_start(line_index + 1)?;
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use codespan_reporting::files::Files as _;

    use super::*;
    use crate::source::ByteRange;

    #[test]
    fn ids_count_from_one() {
        let mut files = Files::new();
        let first = files.add("first".to_owned(), "a".to_owned());
        let second = files.add("second".to_owned(), "b".to_owned());

        assert_eq!(u32::from(first), 1);
        assert_eq!(u32::from(second), 2);
        assert_eq!(files.name(second).ok(), Some("second"));
    }

    #[test]
    fn lines_are_indexed_by_byte_offset() {
        let mut files = Files::new();
        let file_id = files.add("lines".to_owned(), "id : Nat\nid := 0\n".to_owned());

        assert_eq!(files.line_index(file_id, 0).ok(), Some(0));
        assert_eq!(files.line_index(file_id, 11).ok(), Some(1));
        assert_eq!(files.line_range(file_id, 1).ok(), Some(9..17));
    }

    #[test]
    fn ranges_select_text() {
        let mut files = Files::new();
        let file_id = files.add("text".to_owned(), "\\Type 0 1".to_owned());

        let range = FileRange::new(file_id, ByteRange::new(0, 5));
        assert_eq!(files.text(range), Some("\\Type"));
        let out_of_bounds = FileRange::new(file_id, ByteRange::new(4, 40));
        assert_eq!(files.text(out_of_bounds), None);
    }
}
