use std::{error, fmt, io, result};

use crate::quoted::FieldState;

/// The specific type of an error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Wrap a [std::io::Error].
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Indicate that the quoted-field state machine met a byte for which its
    /// current state has no transition, or that input ended while a quoted
    /// field was still open.
    #[error("CSV error: {}", Malformed::new(.state, .byte, .pos))]
    MalformedInput {
        /// State the machine was in
        state: FieldState,
        /// Offending byte, `None` when input ended inside a quoted field
        byte: Option<u8>,
        /// Optional position `(byte_offset, row_index)`
        pos: Option<(u64, u64)>,
    },

    /// Indicate that the consumer side of a [`Queue`](crate::Queue) gave up,
    /// so that the producer cannot hand over any more rows.
    #[error("consumer thread died, cannot insert any more rows")]
    ConsumerDied,

    /// Indicate that a [`Queue`](crate::Queue) was configured with a capacity
    /// under the supported floor.
    #[error(
        "queue capacity {capacity} is too small, please choose a capacity of at least {minimum}"
    )]
    Configuration {
        /// Requested capacity
        capacity: usize,
        /// Smallest accepted capacity
        minimum: usize,
    },

    /// Wrap an error raised by a conversion callback on the consumer side.
    #[error("conversion error: {0}")]
    Conversion(Box<dyn error::Error + Send + Sync>),
}

struct Malformed {
    state: FieldState,
    byte: Option<u8>,
    pos: Option<(u64, u64)>,
}

impl Malformed {
    fn new(state: &FieldState, byte: &Option<u8>, pos: &Option<(u64, u64)>) -> Self {
        Self {
            state: *state,
            byte: *byte,
            pos: *pos,
        }
    }
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.byte {
            Some(byte) => write!(
                f,
                "malformed quoted field, unexpected byte {:?} in state {:?}",
                byte.escape_ascii().to_string(),
                self.state
            )?,
            None => write!(
                f,
                "malformed quoted field, input ended in state {:?}",
                self.state
            )?,
        };

        if let Some((byte, index)) = self.pos {
            write!(f, " (record: {}, byte: {})", index, byte)?;
        }

        Ok(())
    }
}

/// An error occurring when tokenizing CSV data or handing rows over to the
/// consumer thread.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub(crate) fn at(mut self, byte: u64, index: u64) -> Self {
        if let ErrorKind::MalformedInput { ref mut pos, .. } = self.0 {
            pos.get_or_insert((byte, index));
        }

        self
    }

    /// Wrap any error raised while converting rows into entities.
    pub fn conversion<E>(err: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self(ErrorKind::Conversion(err.into()))
    }

    /// Return whether the wrapped error is a [`std::io::Error`].
    pub fn is_io_error(&self) -> bool {
        matches!(self.0, ErrorKind::Io(_))
    }

    /// Return whether the input could not be tokenized.
    pub fn is_malformed(&self) -> bool {
        matches!(self.0, ErrorKind::MalformedInput { .. })
    }

    /// Return whether the producer had to stop because the consumer died.
    pub fn is_consumer_died(&self) -> bool {
        matches!(self.0, ErrorKind::ConsumerDied)
    }

    /// Return whether the error was raised by an invalid configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self.0, ErrorKind::Configuration { .. })
    }

    /// Return a reference to the underlying [`ErrorKind`].
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwraps the error into its underlying [`ErrorKind`].
    pub fn into_kind(self) -> ErrorKind {
        self.0
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err.0 {
            ErrorKind::Io(inner) => inner,
            kind => Self::new(io::ErrorKind::InvalidData, Error(kind)),
        }
    }
}

/// A type alias for `Result<T, fluent_csv_machine::Error>`.
pub type Result<T> = result::Result<T, Error>;
