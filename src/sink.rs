use crate::records::ByteRecord;

/// A per-column consumer of decoded field bytes.
///
/// Sinks only ever see the content of their own column, with surrounding
/// quotes removed and escapes already resolved. When a field closes, the
/// tokenizer calls [`ColumnSink::finish`] so that the sink can append the
/// value it accumulated to the row under construction and get ready for the
/// next row.
pub trait ColumnSink: Send {
    fn push_byte(&mut self, byte: u8);

    #[inline]
    fn extend_from_slice(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.push_byte(*byte);
        }
    }

    fn finish(&mut self, record: &mut ByteRecord);
}

/// A [`ColumnSink`] keeping the decoded bytes as-is.
#[derive(Debug, Default, Clone)]
pub struct RawSink {
    scratch: Vec<u8>,
}

impl RawSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColumnSink for RawSink {
    #[inline(always)]
    fn push_byte(&mut self, byte: u8) {
        self.scratch.push(byte);
    }

    #[inline(always)]
    fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.scratch.extend_from_slice(bytes);
    }

    #[inline]
    fn finish(&mut self, record: &mut ByteRecord) {
        record.push_field(&self.scratch);
        self.scratch.clear();
    }
}

/// Binding of [`ColumnSink`]s to column positions.
///
/// A column without a sink is still tokenized, so that row and field
/// boundaries stay correct, but its bytes are never retained and the row
/// gets a skipped field in its place.
pub enum Columns {
    /// Every column is decoded by a [`RawSink`].
    Raw(RawSink),
    /// Columns are bound by position, positions past the end being unbound.
    Bound(Vec<Option<Box<dyn ColumnSink>>>),
}

impl Default for Columns {
    fn default() -> Self {
        Self::raw()
    }
}

impl Columns {
    pub fn raw() -> Self {
        Self::Raw(RawSink::new())
    }

    /// Keep only the given column positions, decoding them raw.
    pub fn select(positions: &[usize]) -> Self {
        let len = positions.iter().max().map(|max| max + 1).unwrap_or(0);
        let mut sinks: Vec<Option<Box<dyn ColumnSink>>> = (0..len).map(|_| None).collect();

        for position in positions {
            sinks[*position] = Some(Box::new(RawSink::new()));
        }

        Self::Bound(sinks)
    }

    #[inline]
    pub(crate) fn sink(&mut self, column: usize) -> Option<&mut dyn ColumnSink> {
        match self {
            Self::Raw(sink) => Some(sink as &mut dyn ColumnSink),
            Self::Bound(sinks) => match sinks.get_mut(column) {
                Some(Some(sink)) => Some(sink.as_mut()),
                _ => None,
            },
        }
    }
}

impl From<Vec<Option<Box<dyn ColumnSink>>>> for Columns {
    fn from(sinks: Vec<Option<Box<dyn ColumnSink>>>) -> Self {
        Self::Bound(sinks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Uppercase(Vec<u8>);

    impl ColumnSink for Uppercase {
        fn push_byte(&mut self, byte: u8) {
            self.0.push(byte.to_ascii_uppercase());
        }

        fn finish(&mut self, record: &mut ByteRecord) {
            record.push_field(&self.0);
            self.0.clear();
        }
    }

    #[test]
    fn test_raw_sink() {
        let mut sink = RawSink::new();
        let mut record = ByteRecord::new();

        sink.extend_from_slice(b"john");
        sink.push_byte(b'!');
        sink.finish(&mut record);
        sink.finish(&mut record);

        assert_eq!(record, brec!["john!", ""]);
    }

    #[test]
    fn test_default_extend_from_slice() {
        let mut sink = Uppercase(Vec::new());
        let mut record = ByteRecord::new();

        sink.extend_from_slice(b"landis");
        sink.finish(&mut record);

        assert_eq!(record, brec!["LANDIS"]);
    }

    #[test]
    fn test_columns() {
        let mut columns = Columns::select(&[0, 2]);

        assert!(columns.sink(0).is_some());
        assert!(columns.sink(1).is_none());
        assert!(columns.sink(2).is_some());
        assert!(columns.sink(3).is_none());

        let mut columns = Columns::raw();

        assert!(columns.sink(0).is_some());
        assert!(columns.sink(57).is_some());

        let sinks: Vec<Option<Box<dyn ColumnSink>>> =
            vec![None, Some(Box::new(Uppercase(Vec::new())) as Box<dyn ColumnSink>)];
        let mut columns = Columns::from(sinks);

        assert!(columns.sink(0).is_none());
        assert!(columns.sink(1).is_some());
    }
}
