use memchr::{memchr, memchr2};

use crate::error::{Error, ErrorKind, Result};
use crate::sink::ColumnSink;

/// Sub-state of [`FieldState::FastForward`], mirroring the quote structure of
/// a field whose content is being discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    Quoted,
    Escape,
    Closed,
    ClosedCr,
}

/// State of the quoted-field machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// Waiting for the opening quote.
    Initial,
    /// Inside the quotes, content is forwarded to the sink.
    Running,
    /// Next byte is forwarded whatever it is.
    Escape,
    /// A quote was read while running: either the field ends or it was the
    /// first half of a doubled quote.
    Closed,
    /// A `\r` was read after the closing quote, only a newline may follow.
    ClosedCr,
    /// Inside a field nobody will read.
    FastForward(Skip),
}

/// Which boundary closed a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Delimiter,
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Quote,
    Escape,
    Delimiter,
    Newline,
    CarriageReturn,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Nothing,
    Forward,
    ForwardQuote,
    Close(Boundary),
}

fn transition(state: FieldState, class: Class, bound: bool) -> Option<(FieldState, Action)> {
    use Action::*;
    use FieldState::*;

    let next = match (state, class) {
        (Initial, Class::Quote) if bound => (Running, Nothing),
        (Initial, Class::Quote) => (FastForward(Skip::Quoted), Nothing),

        // NOTE: quote must be tested before escape so that, when both are the
        // same byte, a quote always moves to `Closed` and `Closed` resolves
        // the doubled quote.
        (Running, Class::Quote) => (Closed, Nothing),
        (Running, Class::Escape) => (Escape, Nothing),
        (Running, _) => (Running, Forward),

        (Escape, _) => (Running, Forward),

        (Closed, Class::Delimiter) => (Initial, Close(Boundary::Delimiter)),
        (Closed, Class::Newline) => (Initial, Close(Boundary::Newline)),
        (Closed, Class::Quote) => (Running, ForwardQuote),
        (Closed, Class::CarriageReturn) => (ClosedCr, Nothing),

        (ClosedCr, Class::Newline) => (Initial, Close(Boundary::Newline)),

        (FastForward(Skip::Quoted), Class::Quote) => (FastForward(Skip::Closed), Nothing),
        (FastForward(Skip::Quoted), Class::Escape) => (FastForward(Skip::Escape), Nothing),
        (FastForward(Skip::Quoted), _) => (FastForward(Skip::Quoted), Nothing),

        (FastForward(Skip::Escape), _) => (FastForward(Skip::Quoted), Nothing),

        (FastForward(Skip::Closed), Class::Delimiter) => (Initial, Close(Boundary::Delimiter)),
        (FastForward(Skip::Closed), Class::Newline) => (Initial, Close(Boundary::Newline)),
        (FastForward(Skip::Closed), Class::Quote) => (FastForward(Skip::Quoted), Nothing),
        (FastForward(Skip::Closed), Class::CarriageReturn) => {
            (FastForward(Skip::ClosedCr), Nothing)
        }

        (FastForward(Skip::ClosedCr), Class::Newline) => (Initial, Close(Boundary::Newline)),

        _ => return None,
    };

    Some(next)
}

/// State machine decoding a single quoted field, RFC 4180 style.
///
/// The same machine is reused for every quoted field of a stream: it goes
/// back to [`FieldState::Initial`] each time a field closes.
#[derive(Debug, Clone)]
pub struct QuotedField {
    quote: u8,
    escape: u8,
    delimiter: u8,
    newline: u8,
    state: FieldState,
}

impl QuotedField {
    pub fn new(quote: u8, escape: u8, delimiter: u8, newline: u8) -> Self {
        Self {
            quote,
            escape,
            delimiter,
            newline,
            state: FieldState::Initial,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> FieldState {
        self.state
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.state != FieldState::Initial
    }

    pub fn reset(&mut self) {
        self.state = FieldState::Initial;
    }

    #[inline]
    fn classify(&self, byte: u8) -> Class {
        if byte == self.quote {
            Class::Quote
        } else if byte == self.escape {
            Class::Escape
        } else if byte == self.delimiter {
            Class::Delimiter
        } else if byte == self.newline {
            Class::Newline
        } else if byte == b'\r' && self.newline == b'\n' {
            Class::CarriageReturn
        } else {
            Class::Other
        }
    }

    /// Process a single byte.
    ///
    /// The sink is only looked at when the opening quote is read, to decide
    /// between decoding and fast-forwarding, and to forward content while
    /// decoding. Returns the boundary that closed the field, if any.
    pub fn process<'s>(
        &mut self,
        byte: u8,
        sink: Option<&mut (dyn ColumnSink + 's)>,
    ) -> Result<Option<Boundary>> {
        let class = self.classify(byte);

        let Some((next, action)) = transition(self.state, class, sink.is_some()) else {
            return Err(Error::new(ErrorKind::MalformedInput {
                state: self.state,
                byte: Some(byte),
                pos: None,
            }));
        };

        self.state = next;

        match action {
            Action::Nothing => Ok(None),
            Action::Forward => {
                if let Some(sink) = sink {
                    sink.push_byte(byte);
                }

                Ok(None)
            }
            Action::ForwardQuote => {
                if let Some(sink) = sink {
                    sink.push_byte(self.quote);
                }

                Ok(None)
            }
            Action::Close(boundary) => Ok(Some(boundary)),
        }
    }

    #[inline]
    fn find_special(&self, haystack: &[u8]) -> Option<usize> {
        if self.quote == self.escape {
            memchr(self.quote, haystack)
        } else {
            memchr2(self.quote, self.escape, haystack)
        }
    }

    /// Process as much of `input` as possible, stopping right after the byte
    /// closing the field.
    ///
    /// Runs of plain content are jumped over using `memchr`, and forwarded to
    /// the sink in a single call. Outcome is the same as calling
    /// [`Self::process`] on each byte.
    ///
    /// Returns the number of bytes consumed, along with the closing boundary
    /// if the field closed. On error, the offending byte is the last one
    /// consumed.
    pub fn consume<'s>(
        &mut self,
        input: &[u8],
        mut sink: Option<&mut (dyn ColumnSink + 's)>,
    ) -> (usize, Result<Option<Boundary>>) {
        let input_len = input.len();
        let mut pos: usize = 0;

        while pos < input_len {
            if let FieldState::Running | FieldState::FastForward(Skip::Quoted) = self.state {
                let offset = self
                    .find_special(&input[pos..])
                    .unwrap_or(input_len - pos);

                if self.state == FieldState::Running {
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.extend_from_slice(&input[pos..pos + offset]);
                    }
                }

                pos += offset;

                if pos == input_len {
                    break;
                }
            }

            let byte = input[pos];
            pos += 1;

            match self.process(byte, sink.as_deref_mut()) {
                Ok(None) => (),
                closed_or_failed => return (pos, closed_or_failed),
            }
        }

        (input_len, Ok(None))
    }
}
