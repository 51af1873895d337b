use std::fmt;
use std::hash::{Hash, Hasher};

use crate::debug;

/// An owned, unescaped representation of a CSV row.
///
/// Every field is either a decoded value or a *skipped* marker, left by
/// columns that had no [`ColumnSink`](crate::ColumnSink) bound to them.
#[derive(Default, Clone, Eq)]
pub struct ByteRecord {
    data: Vec<u8>,
    bounds: Vec<Option<(usize, usize)>>,
}

impl ByteRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields of the record, skipped ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.bounds.clear();
    }

    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.bounds.truncate(len);

        let end = self
            .bounds
            .iter()
            .rev()
            .find_map(|bound| bound.map(|(_, end)| end))
            .unwrap_or(0);

        self.data.truncate(end);
    }

    /// Returns the decoded bytes of all non-skipped fields, concatenated.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn iter(&self) -> ByteRecordIter<'_> {
        ByteRecordIter {
            record: self,
            current_forward: 0,
            current_backward: self.len(),
        }
    }

    #[inline(always)]
    pub fn push_field(&mut self, bytes: &[u8]) {
        let start = self.data.len();
        self.data.extend_from_slice(bytes);
        self.bounds.push(Some((start, self.data.len())));
    }

    /// Push a field whose content was not retained.
    #[inline(always)]
    pub fn push_skipped(&mut self) {
        self.bounds.push(None);
    }

    /// Returns the nth field, or `None` if it is out-of-bounds or was
    /// skipped.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.bounds
            .get(index)
            .copied()
            .flatten()
            .map(|(start, end)| &self.data[start..end])
    }

    /// Returns whether the nth field exists but was skipped.
    #[inline]
    pub fn is_skipped(&self, index: usize) -> bool {
        matches!(self.bounds.get(index), Some(None))
    }
}

impl PartialEq for ByteRecord {
    fn eq(&self, other: &Self) -> bool {
        if self.bounds.len() != other.bounds.len() {
            return false;
        }

        self.iter()
            .zip(other.iter())
            .all(|(self_cell, other_cell)| self_cell == other_cell)
    }
}

impl Hash for ByteRecord {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());

        for cell in self.iter() {
            cell.hash(state);
        }
    }
}

impl<T: AsRef<[u8]>> Extend<T> for ByteRecord {
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for x in iter {
            self.push_field(x.as_ref());
        }
    }
}

impl<T: AsRef<[u8]>> FromIterator<T> for ByteRecord {
    #[inline]
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut record = Self::new();
        record.extend(iter);
        record
    }
}

impl<'r> IntoIterator for &'r ByteRecord {
    type IntoIter = ByteRecordIter<'r>;
    type Item = Option<&'r [u8]>;

    #[inline]
    fn into_iter(self) -> ByteRecordIter<'r> {
        self.iter()
    }
}

impl fmt::Debug for ByteRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ByteRecord(")?;
        f.debug_list()
            .entries(self.iter().map(debug::Field))
            .finish()?;
        write!(f, ")")?;
        Ok(())
    }
}

/// Iterator over the fields of a [`ByteRecord`], yielding `None` for
/// skipped fields.
pub struct ByteRecordIter<'a> {
    record: &'a ByteRecord,
    current_forward: usize,
    current_backward: usize,
}

impl ExactSizeIterator for ByteRecordIter<'_> {}

impl<'a> Iterator for ByteRecordIter<'a> {
    type Item = Option<&'a [u8]>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.current_forward == self.current_backward {
            None
        } else {
            let bound = self.record.bounds[self.current_forward];

            self.current_forward += 1;

            Some(bound.map(|(start, end)| &self.record.data[start..end]))
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let size = self.current_backward - self.current_forward;

        (size, Some(size))
    }

    #[inline]
    fn count(self) -> usize
    where
        Self: Sized,
    {
        self.len()
    }
}

impl DoubleEndedIterator for ByteRecordIter<'_> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.current_forward == self.current_backward {
            None
        } else {
            self.current_backward -= 1;

            let bound = self.record.bounds[self.current_backward];

            Some(bound.map(|(start, end)| &self.record.data[start..end]))
        }
    }
}

/// What travels through a [`Queue`](crate::Queue): one tokenized row, or the
/// marker telling the consumer that no more input follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row<T = ByteRecord> {
    Record(T),
    EndOfStream,
}

impl<T> Row<T> {
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    #[inline]
    pub fn as_record(&self) -> Option<&T> {
        match self {
            Self::Record(record) => Some(record),
            Self::EndOfStream => None,
        }
    }

    #[inline]
    pub fn into_record(self) -> Option<T> {
        match self {
            Self::Record(record) => Some(record),
            Self::EndOfStream => None,
        }
    }
}
