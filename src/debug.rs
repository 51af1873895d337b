use std::fmt;

/// Renders a byte slice as an escaped string literal in `Debug` output.
pub(crate) struct Bytes<'a>(pub(crate) &'a [u8]);

impl fmt::Debug for Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self.0.escape_ascii())
    }
}

/// Renders a field that may have been skipped.
pub(crate) struct Field<'a>(pub(crate) Option<&'a [u8]>);

impl fmt::Debug for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(bytes) => fmt::Debug::fmt(&Bytes(bytes), f),
            None => write!(f, "<skipped>"),
        }
    }
}
