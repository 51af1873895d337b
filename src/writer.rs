use std::io::{self, BufWriter, IntoInnerError, Write};

use memchr::{memchr2, memchr3};

use crate::records::ByteRecord;

/// Builds a [`Writer`] with given configuration.
#[derive(Clone)]
pub struct WriterBuilder {
    delimiter: u8,
    quote: u8,
    quote_escape: Option<u8>,
    newline: u8,
    buffer_capacity: usize,
}

impl Default for WriterBuilder {
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

impl WriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut writer = Self::default();
        writer.buffer_capacity(capacity);
        writer
    }

    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.quote = quote;
        self
    }

    /// Set the byte used to escape quotes (and itself) inside quoted fields.
    ///
    /// Will default to the quote char itself, i.e. quotes are doubled.
    pub fn quote_escape(&mut self, escape: u8) -> &mut Self {
        self.quote_escape = Some(escape);
        self
    }

    pub fn newline(&mut self, newline: u8) -> &mut Self {
        self.newline = newline;
        self
    }

    pub fn buffer_capacity(&mut self, capacity: usize) -> &mut Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn from_writer<W: Write>(&self, writer: W) -> Writer<W> {
        Writer {
            delimiter: self.delimiter,
            quote: self.quote,
            escape: self.quote_escape.unwrap_or(self.quote),
            newline: self.newline,
            buffer: BufWriter::with_capacity(self.buffer_capacity, writer),
            scratch: Vec::new(),
        }
    }
}

/// A CSV writer only quoting fields when necessary, so that anything it
/// writes is read back identically by a [`Tokenizer`](crate::Tokenizer)
/// using the same dialect.
pub struct Writer<W: Write> {
    delimiter: u8,
    quote: u8,
    escape: u8,
    newline: u8,
    buffer: BufWriter<W>,
    scratch: Vec<u8>,
}

impl<W: Write> Writer<W> {
    pub fn from_writer(writer: W) -> Self {
        WriterBuilder::new().from_writer(writer)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }

    #[inline]
    fn must_quote(&self, cell: &[u8]) -> bool {
        memchr3(self.delimiter, self.quote, self.newline, cell).is_some()
            || memchr2(self.escape, b'\r', cell).is_some()
            || (self.newline != b'\n' && memchr::memchr(b'\n', cell).is_some())
    }

    fn quote(&mut self, cell: &[u8]) {
        self.scratch.clear();
        self.scratch.push(self.quote);

        let mut rest = cell;

        while let Some(offset) = memchr2(self.quote, self.escape, rest) {
            self.scratch.extend_from_slice(&rest[..offset]);
            self.scratch.push(self.escape);
            self.scratch.push(rest[offset]);
            rest = &rest[offset + 1..];
        }

        self.scratch.extend_from_slice(rest);
        self.scratch.push(self.quote);
    }

    /// Write a record, skipped fields being written as empty ones.
    ///
    /// **BEWARE**: an empty record is written as an empty line, which a
    /// tokenizer will skip when reading it back.
    pub fn write_byte_record(&mut self, record: &ByteRecord) -> io::Result<()> {
        // NOTE: a single empty field must be quoted, else the row would be
        // read back as an empty line.
        if record.len() == 1 && record.iter().next().flatten().unwrap_or_default().is_empty() {
            self.buffer.write_all(&[self.quote, self.quote, self.newline])?;
            return Ok(());
        }

        let last_i = record.len().saturating_sub(1);

        for (i, cell) in record.iter().enumerate() {
            let cell = cell.unwrap_or_default();

            if !self.must_quote(cell) {
                self.buffer.write_all(cell)?;
            } else {
                self.quote(cell);
                self.buffer.write_all(&self.scratch)?;
            }

            if i != last_i {
                self.buffer.write_all(&[self.delimiter])?;
            }
        }

        self.buffer.write_all(&[self.newline])?;

        Ok(())
    }

    pub fn into_inner(self) -> Result<W, IntoInnerError<BufWriter<W>>> {
        self.buffer.into_inner()
    }
}
