use memchr::{memchr2, memchr3};

use crate::error::{Error, ErrorKind, Result};
use crate::quoted::{Boundary, FieldState, QuotedField, Skip};
use crate::records::ByteRecord;
use crate::sink::Columns;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    InputEmpty,
    Skip,
    Record,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    RecordStart,
    FieldStart,
    Unquoted,
    Quoted,
}

/// Row tokenizer state machine, fed with successive slices of input.
///
/// An empty slice means the input is exhausted.
pub(crate) struct CoreTokenizer {
    delimiter: u8,
    quote: u8,
    newline: u8,
    // Only `\n` newlines have a `\r\n` variant.
    trim_cr: bool,
    state: ReadState,
    pending_cr: bool,
    column: usize,
    position: u64,
    index: u64,
    quoted: QuotedField,
    columns: Columns,
}

impl CoreTokenizer {
    pub(crate) fn new(
        delimiter: u8,
        quote: u8,
        quote_escape: u8,
        newline: u8,
        columns: Columns,
    ) -> Self {
        Self {
            delimiter,
            quote,
            newline,
            trim_cr: newline == b'\n',
            state: ReadState::RecordStart,
            pending_cr: false,
            column: 0,
            position: 0,
            index: 0,
            quoted: QuotedField::new(quote, quote_escape, delimiter, newline),
            columns,
        }
    }

    #[inline(always)]
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    #[inline(always)]
    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    pub(crate) fn skip_bytes(&mut self, amt: usize) {
        self.position += amt as u64;
    }

    #[inline]
    fn forward(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        if let Some(sink) = self.columns.sink(self.column) {
            sink.extend_from_slice(bytes);
        }
    }

    #[inline]
    fn close_field(&mut self, record: &mut ByteRecord) {
        match self.columns.sink(self.column) {
            Some(sink) => sink.finish(record),
            None => record.push_skipped(),
        }

        self.column += 1;
    }

    #[inline]
    fn close_record(&mut self, record: &mut ByteRecord) {
        self.close_field(record);
        self.column = 0;
        self.pending_cr = false;
        self.state = ReadState::RecordStart;
    }

    #[inline]
    fn find_special(&self, haystack: &[u8]) -> Option<usize> {
        if self.trim_cr {
            memchr3(self.delimiter, self.newline, b'\r', haystack)
        } else {
            memchr2(self.delimiter, self.newline, haystack)
        }
    }

    fn finish(&mut self, record: &mut ByteRecord) -> Result<ReadResult> {
        match self.state {
            ReadState::RecordStart => return Ok(ReadResult::End),
            ReadState::Quoted => match self.quoted.state() {
                FieldState::Closed
                | FieldState::ClosedCr
                | FieldState::FastForward(Skip::Closed | Skip::ClosedCr) => {
                    self.quoted.reset();
                }
                state => {
                    return Err(Error::new(ErrorKind::MalformedInput {
                        state,
                        byte: None,
                        pos: None,
                    }));
                }
            },
            // NOTE: a dangling `\r` at the very end of the input is
            // considered to be part of a line terminator.
            ReadState::FieldStart | ReadState::Unquoted => (),
        }

        self.close_record(record);

        Ok(ReadResult::Record)
    }

    pub(crate) fn read_row(
        &mut self,
        input: &[u8],
        record: &mut ByteRecord,
    ) -> Result<(ReadResult, usize)> {
        let (result, pos) = self
            .read_row_impl(input, record)
            .map_err(|err| err.at(self.position, self.index))?;

        self.position += pos as u64;

        if let ReadResult::Record = result {
            self.index += 1;
        }

        Ok((result, pos))
    }

    fn read_row_impl(
        &mut self,
        input: &[u8],
        record: &mut ByteRecord,
    ) -> Result<(ReadResult, usize)> {
        use ReadState::*;

        let input_len = input.len();

        if input_len == 0 {
            return Ok((self.finish(record)?, 0));
        }

        let mut pos: usize = 0;

        while pos < input_len {
            match self.state {
                RecordStart => {
                    let byte = input[pos];

                    // Empty lines are not records
                    if byte == self.newline || (self.trim_cr && byte == b'\r') {
                        return Ok((ReadResult::Skip, pos + 1));
                    }

                    self.state = FieldStart;
                }
                FieldStart => {
                    // The quoted-field machine consumes the opening quote itself
                    self.state = if input[pos] == self.quote {
                        Quoted
                    } else {
                        Unquoted
                    };
                }
                Unquoted => {
                    if self.pending_cr {
                        self.pending_cr = false;

                        if input[pos] != self.newline {
                            self.forward(b"\r");
                        }
                    }

                    let Some(offset) = self.find_special(&input[pos..]) else {
                        self.forward(&input[pos..]);
                        return Ok((ReadResult::InputEmpty, input_len));
                    };

                    self.forward(&input[pos..pos + offset]);
                    pos += offset;

                    let byte = input[pos];

                    pos += 1;

                    if byte == self.delimiter {
                        self.close_field(record);
                        self.state = FieldStart;
                    } else if byte == self.newline {
                        self.close_record(record);
                        return Ok((ReadResult::Record, pos));
                    } else {
                        // Here, `byte` is guaranteed to be a `\r`, which we only
                        // keep if no newline follows.
                        self.pending_cr = true;
                    }
                }
                Quoted => {
                    let sink = self.columns.sink(self.column);
                    let (read, outcome) = self.quoted.consume(&input[pos..], sink);

                    pos += read;

                    let boundary = outcome
                        .map_err(|err| err.at(self.position + pos as u64 - 1, self.index))?;

                    match boundary {
                        None => (),
                        Some(Boundary::Delimiter) => {
                            self.close_field(record);
                            self.state = FieldStart;
                        }
                        Some(Boundary::Newline) => {
                            self.close_record(record);
                            return Ok((ReadResult::Record, pos));
                        }
                    }
                }
            }
        }

        Ok((ReadResult::InputEmpty, input_len))
    }
}
