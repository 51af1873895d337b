use std::io::{BufRead, BufReader, Read};

use tracing::{trace, warn};

use crate::core::{CoreTokenizer, ReadResult};
use crate::error::Result;
use crate::queue::Queue;
use crate::records::ByteRecord;
use crate::sink::Columns;

/// Builds a [`Tokenizer`] with given configuration.
#[derive(Clone)]
pub struct TokenizerBuilder {
    delimiter: u8,
    quote: u8,
    quote_escape: Option<u8>,
    newline: u8,
    buffer_capacity: usize,
}

impl Default for TokenizerBuilder {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            quote_escape: None,
            newline: b'\n',
            buffer_capacity: 8192,
        }
    }
}

impl TokenizerBuilder {
    /// Create a new [`TokenizerBuilder`] with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`TokenizerBuilder`] with provided `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut tokenizer = Self::default();
        tokenizer.buffer_capacity(capacity);
        tokenizer
    }

    /// Set the delimiter to be used by the created [`Tokenizer`].
    ///
    /// This delimiter must be a single byte.
    ///
    /// Will default to a comma.
    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the quote char to be used by the created [`Tokenizer`].
    ///
    /// This char must be a single byte.
    ///
    /// Will default to a double quote.
    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.quote = quote;
        self
    }

    /// Set the byte escaping the next byte inside a quoted field, e.g. `\`.
    ///
    /// Will default to the quote char itself, i.e. quotes are escaped by
    /// doubling them, as per RFC 4180.
    pub fn quote_escape(&mut self, escape: u8) -> &mut Self {
        self.quote_escape = Some(escape);
        self
    }

    /// Set the byte terminating rows.
    ///
    /// Will default to `\n`, in which case `\r\n` is also understood.
    pub fn newline(&mut self, newline: u8) -> &mut Self {
        self.newline = newline;
        self
    }

    /// Set the capacity of the created [`Tokenizer`]'s buffered reader.
    pub fn buffer_capacity(&mut self, capacity: usize) -> &mut Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Create a new [`Tokenizer`] decoding every column as-is, using the
    /// provided reader implementing [`std::io::Read`].
    pub fn from_reader<R: Read>(&self, reader: R) -> Tokenizer<R> {
        self.from_reader_with_columns(reader, Columns::raw())
    }

    /// Create a new [`Tokenizer`] decoding columns through the given
    /// [`Columns`] binding.
    pub fn from_reader_with_columns<R: Read>(&self, reader: R, columns: Columns) -> Tokenizer<R> {
        Tokenizer {
            failed: false,
            buffer: BufReader::with_capacity(self.buffer_capacity, reader),
            inner: CoreTokenizer::new(
                self.delimiter,
                self.quote,
                self.quote_escape.unwrap_or(self.quote),
                self.newline,
                columns,
            ),
        }
    }
}

/// An already configured streaming CSV tokenizer.
///
/// # Configuration
///
/// To configure a [`Tokenizer`], if you need a custom delimiter or escape
/// char for instance, or if you want to bind [`ColumnSink`](crate::ColumnSink)s
/// to some columns only, check out the [`TokenizerBuilder`].
pub struct Tokenizer<R> {
    // Tokenization halts after the first error
    failed: bool,
    buffer: BufReader<R>,
    inner: CoreTokenizer,
}

impl<R: Read> Tokenizer<R> {
    /// Create a new tokenizer with default configuration using the provided
    /// reader implementing [`std::io::Read`].
    pub fn from_reader(reader: R) -> Self {
        TokenizerBuilder::new().from_reader(reader)
    }

    /// Skip the UTF-8 BOM, if any. Must be called before reading any row.
    pub fn strip_bom(&mut self) -> Result<()> {
        let input = self.buffer.fill_buf()?;

        if input.len() >= 3 && &input[..3] == b"\xef\xbb\xbf" {
            self.buffer.consume(3);
            self.inner.skip_bytes(3);
        }

        Ok(())
    }

    /// Attempt to read the next row into `record`.
    ///
    /// Will return `false` if the end of stream was reached, or if an error
    /// was previously returned.
    pub fn read_row(&mut self, record: &mut ByteRecord) -> Result<bool> {
        record.clear();

        if self.failed {
            return Ok(false);
        }

        let result = self.read_row_impl(record);

        if result.is_err() {
            self.failed = true;
        }

        result
    }

    fn read_row_impl(&mut self, record: &mut ByteRecord) -> Result<bool> {
        use ReadResult::*;

        loop {
            let input = self.buffer.fill_buf()?;

            let (result, pos) = self.inner.read_row(input, record)?;

            self.buffer.consume(pos);

            match result {
                End => {
                    return Ok(false);
                }
                Skip | InputEmpty => {
                    continue;
                }
                Record => {
                    return Ok(true);
                }
            };
        }
    }

    pub fn rows(&mut self) -> RowsIter<'_, R> {
        RowsIter { tokenizer: self }
    }

    pub fn into_rows(self) -> RowsIntoIter<R> {
        RowsIntoIter { tokenizer: self }
    }

    /// Tokenize the whole input, handing every row over to `queue`, then
    /// close it.
    ///
    /// The queue is closed even if tokenization fails (or panics), so that a
    /// consumer waiting on it is never left hanging.
    ///
    /// Returns the number of rows handed over.
    pub fn produce(&mut self, queue: &Queue<ByteRecord>) -> Result<u64> {
        let guard = queue.close_guard();
        let mut count: u64 = 0;

        loop {
            let mut record = ByteRecord::new();

            match self.read_row(&mut record) {
                Ok(true) => {
                    queue.insert(record)?;
                    count += 1;
                }
                Ok(false) => break,
                Err(err) => {
                    warn!(error = %err, rows = count, "tokenization failed, closing queue");
                    return Err(err);
                }
            }
        }

        trace!(rows = count, "input exhausted, closing queue");
        guard.close()?;

        Ok(count)
    }

    /// Return the number of bytes consumed so far.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Return the number of rows read so far.
    #[inline(always)]
    pub fn index(&self) -> u64 {
        self.inner.index()
    }

    /// Return the underlying reader.
    ///
    /// **BEWARE**: Already buffered data will be lost!
    pub fn into_inner(self) -> R {
        self.buffer.into_inner()
    }
}

pub struct RowsIter<'t, R> {
    tokenizer: &'t mut Tokenizer<R>,
}

impl<R: Read> Iterator for RowsIter<'_, R> {
    type Item = Result<ByteRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = ByteRecord::new();

        match self.tokenizer.read_row(&mut record) {
            Err(err) => Some(Err(err)),
            Ok(true) => Some(Ok(record)),
            Ok(false) => None,
        }
    }
}

pub struct RowsIntoIter<R> {
    tokenizer: Tokenizer<R>,
}

impl<R: Read> Iterator for RowsIntoIter<R> {
    type Item = Result<ByteRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = ByteRecord::new();

        match self.tokenizer.read_row(&mut record) {
            Err(err) => Some(Err(err)),
            Ok(true) => Some(Ok(record)),
            Ok(false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::thread;

    use crate::queue::BatchOutcome;
    use crate::records::Row;
    use crate::sink::{ColumnSink, RawSink};

    use super::*;

    fn read_all(data: &[u8], builder: &TokenizerBuilder) -> Result<Vec<ByteRecord>> {
        builder.from_reader(Cursor::new(data)).into_rows().collect()
    }

    #[test]
    fn test_read_row() -> Result<()> {
        let csv = "name,surname,age\n\"john\",\"landy, the \"\"everlasting\"\" bastard\",45\n\"\"\"ok\"\"\",whatever,dude\nlucy,rose,\"67\"\n\nkarine,loucan,\"52\"\r\n";

        let expected = vec![
            brec!["name", "surname", "age"],
            brec!["john", "landy, the \"everlasting\" bastard", "45"],
            brec!["\"ok\"", "whatever", "dude"],
            brec!["lucy", "rose", "67"],
            brec!["karine", "loucan", "52"],
        ];

        for capacity in [32usize, 4, 3, 2, 1] {
            let records = read_all(csv.as_bytes(), &TokenizerBuilder::with_capacity(capacity))?;

            assert_eq!(records, expected, "capacity={}", capacity);
        }

        let mut tokenizer = Tokenizer::from_reader(Cursor::new(csv));
        let mut record = ByteRecord::new();
        let mut count: u64 = 0;

        while tokenizer.read_row(&mut record)? {
            count += 1;
            assert_eq!(tokenizer.index(), count);
        }

        assert_eq!(count, 5);
        assert_eq!(tokenizer.position(), csv.len() as u64);

        Ok(())
    }

    #[test]
    fn test_dialect() -> Result<()> {
        let mut builder = TokenizerBuilder::new();
        builder
            .delimiter(b'\t')
            .quote(b'\'')
            .quote_escape(b'\\')
            .newline(b';');

        let data = b"a\t'b\\'c\td'\t'e\\\\';f\t'g;h'";

        assert_eq!(
            read_all(data, &builder)?,
            vec![brec!["a", "b'c\td", "e\\"], brec!["f", "g;h"]]
        );

        Ok(())
    }

    #[test]
    fn test_strip_bom() -> Result<()> {
        let mut tokenizer = Tokenizer::from_reader(Cursor::new("name,surname,age"));
        tokenizer.strip_bom()?;

        assert_eq!(
            tokenizer.rows().next().unwrap()?,
            brec!["name", "surname", "age"]
        );

        let mut tokenizer = Tokenizer::from_reader(Cursor::new(b"\xef\xbb\xbfname,surname,age"));
        tokenizer.strip_bom()?;

        assert_eq!(
            tokenizer.rows().next().unwrap()?,
            brec!["name", "surname", "age"]
        );
        assert_eq!(tokenizer.position(), 19);

        Ok(())
    }

    #[test]
    fn test_columns() -> Result<()> {
        let data = "name,\"bio, long\nand boring\",age\njohn,\"likes \"\"csv\"\"\",45\n";

        let sinks: Vec<Option<Box<dyn ColumnSink>>> =
            vec![Some(Box::new(RawSink::new()) as Box<dyn ColumnSink>)];
        let tokenizer = TokenizerBuilder::new()
            .buffer_capacity(4)
            .from_reader_with_columns(Cursor::new(data), Columns::from(sinks));

        let records = tokenizer.into_rows().collect::<Result<Vec<_>>>()?;

        assert_eq!(records, vec![brec!["name", _, _], brec!["john", _, _]]);

        Ok(())
    }

    #[test]
    fn test_malformed_row_stops_iteration() {
        let data = "a,b\n\"c\"d,e\nf,g\n";
        let mut rows = Tokenizer::from_reader(Cursor::new(data)).into_rows();

        assert_eq!(rows.next().unwrap().unwrap(), brec!["a", "b"]);
        assert!(rows.next().unwrap().unwrap_err().is_malformed());
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());

        // A loop only logging errors does terminate
        let mut tokenizer = Tokenizer::from_reader(Cursor::new(data));
        let mut errors = 0;
        let mut records = 0;

        for row in tokenizer.rows() {
            match row {
                Ok(_) => records += 1,
                Err(_) => errors += 1,
            }
        }

        assert_eq!((records, errors), (1, 1));

        let mut record = ByteRecord::new();
        assert!(!tokenizer.read_row(&mut record).unwrap());
    }

    fn drain_rows(queue: &Queue) -> Result<Vec<ByteRecord>> {
        let batches = queue.process_batches(|batch| {
            let stop = batch.last().is_some_and(Row::is_end_of_stream);
            let records = batch.into_iter().filter_map(Row::into_record).collect();

            Ok(BatchOutcome::new(stop, Some(records)))
        })?;

        Ok(batches.into_iter().flatten().collect())
    }

    #[test]
    fn test_produce() -> Result<()> {
        let data = (0..100)
            .map(|i| format!("{},\"row\n{}\"\n", i, i))
            .collect::<String>();

        let queue = Queue::new(20)?;
        let mut tokenizer = TokenizerBuilder::with_capacity(16).from_reader(Cursor::new(data));

        let (produced, consumed) = thread::scope(|s| {
            let producer = s.spawn(|| tokenizer.produce(&queue));
            let consumed = drain_rows(&queue);

            (producer.join().unwrap(), consumed)
        });

        assert_eq!(produced?, 100);

        let expected = (0..100)
            .map(|i| brec![i.to_string(), format!("row\n{}", i)])
            .collect::<Vec<_>>();

        assert_eq!(consumed?, expected);

        Ok(())
    }

    #[test]
    fn test_produce_closes_queue_on_malformed_input() -> Result<()> {
        let data = "a,b\nc,d\n\"e\"f\n";

        let queue = Queue::new(20)?;
        let mut tokenizer = Tokenizer::from_reader(Cursor::new(data));

        let (produced, consumed) = thread::scope(|s| {
            let producer = s.spawn(|| tokenizer.produce(&queue));
            let consumed = drain_rows(&queue);

            (producer.join().unwrap(), consumed)
        });

        assert!(produced.unwrap_err().is_malformed());
        assert_eq!(consumed?, vec![brec!["a", "b"], brec!["c", "d"]]);

        Ok(())
    }
}
