/*!
The `fluent-csv-machine` crate provides the ingestion core of a streaming CSV
materializer: a byte-oriented [RFC 4180](https://www.rfc-editor.org/rfc/rfc4180)
tokenizer handing rows over to a consumer thread through a bounded queue, so that
tokenizing and converting rows into domain entities overlap.

It deliberately does not deal with type coercion nor with entity construction.
Those are the job of the callbacks you give to the [`WorkflowBuilder`] or to
[`Queue::process_batches`].

# Examples

*Materializing rows into entities*

```
use std::fs::File;
use fluent_csv_machine::{Error, WorkflowBuilder};

let names = WorkflowBuilder::new()
    .queue_capacity(500)
    .run(File::open("data.csv")?, |record| {
        String::from_utf8(record.get(0).unwrap_or_default().to_vec()).map_err(Error::conversion)
    })?;
```

*Only decoding some columns*

```
use std::fs::File;
use fluent_csv_machine::{Columns, TokenizerBuilder};

// Other columns are fast-forwarded, never copied anywhere
let mut tokenizer = TokenizerBuilder::new()
    .delimiter(b'\t')
    .from_reader_with_columns(File::open("data.tsv")?, Columns::select(&[0, 2]));

for row in tokenizer.rows() {
    let row = row?;
    dbg!(row.get(0), row.is_skipped(1));
}
```

*Driving both threads yourself*

```
use std::fs::File;
use std::thread;
use fluent_csv_machine::{BatchOutcome, Queue, Row, Tokenizer};

let queue = Queue::new(1000)?;
let mut tokenizer = Tokenizer::from_reader(File::open("data.csv")?);

let lengths = thread::scope(|s| {
    s.spawn(|| tokenizer.produce(&queue));

    queue.process_batches(|batch| {
        let stop = batch.last().is_some_and(Row::is_end_of_stream);
        let lengths = batch.iter().filter_map(Row::as_record).map(|r| r.len()).collect();

        Ok(BatchOutcome::new(stop, Some(lengths)))
    })
})?;
```

# Components

- [`QuotedField`]: the state machine decoding a single quoted field, and
  fast-forwarding over it when its column has no [`ColumnSink`].
- [`Tokenizer`], [`TokenizerBuilder`]: a streaming tokenizer splitting input
  into rows of fields.
- [`Queue`]: a bounded single-producer single-consumer queue waking the consumer
  up by batches.
- [`WorkflowBuilder`]: wires a tokenizer on a producer thread to a conversion
  callback on the calling thread.
- [`Writer`], [`WriterBuilder`]: a minimal quoting CSV writer, read back
  identically by a [`Tokenizer`] using the same dialect.

# Design notes

## Two-speed scanning

The tokenizer is a traditional state machine, but it does not branch on every
byte. When reading unquoted data, it searches for the next delimiter, newline or
carriage return using [`memchr`](https://docs.rs/memchr/latest/memchr/) and copies
everything in between at once. When reading quoted data, it searches for the
next quote (or escape char) the same way, and only feeds structural bytes to the
[`QuotedField`] machine.

This means that CSV data with a very high density of structural characters will
not get tokenized much faster than with byte-by-byte code, but long fields will.

## Batched hand-over

The [`Queue`] between both threads is guarded by a single mutex. To keep it
cheap, the consumer is only woken up when the queue reaches 90% of its capacity,
or when the end of the stream was reached, and it then takes everything at once.
This means the lock is roughly taken once per batch rather than once per row.

This is also why the queue capacity cannot be lower than [`MIN_QUEUE_CAPACITY`]:
tiny queues would only generate tiny batches.

## Failure

If the consumer fails (or panics), the producer is cancelled, even if it is
currently waiting for some room in the queue. If the producer fails (or panics),
the queue is closed so the consumer never waits forever.

# Caveats

## Regarding line terminators

The tokenizer expects line terminators to be either CRLF or single LF, but not
single CR. Empty lines are skipped, rather than parsed as empty records.

Also, to keep CRLF handling at buffer boundaries simple, leading CR characters
will be trimmed from the beginning of records, and a CR dangling at the very end
of the input is dropped.

## Quotes in the middle of a field

A quote char can only open a quoted field at its very beginning. Anywhere else
in an unquoted field, it is read as-is:

```txt
name,surname\njoh"n,landis
```

will produce `joh"n` and `landis`.
*/
#[allow(unused_macros)]
macro_rules! brec {
    (@push $r:ident;) => {};

    (@push $r:ident; _ $(, $($rest:tt)*)?) => {
        $r.push_skipped();
        brec!(@push $r; $($($rest)*)?);
    };

    (@push $r:ident; $x:expr $(, $($rest:tt)*)?) => {
        $r.push_field($x.as_bytes());
        brec!(@push $r; $($($rest)*)?);
    };

    () => {{
        $crate::records::ByteRecord::new()
    }};

    ($($x:tt)*) => {{
        let mut r = $crate::records::ByteRecord::new();

        brec!(@push r; $($x)*);

        r
    }};
}

mod core;
mod debug;
mod error;
mod queue;
mod quoted;
mod records;
mod sink;
mod tokenizer;
mod workflow;
mod writer;

pub use error::{Error, ErrorKind, Result};
pub use queue::{BatchOutcome, CloseGuard, Queue, MIN_QUEUE_CAPACITY};
pub use quoted::{Boundary, FieldState, QuotedField, Skip};
pub use records::{ByteRecord, ByteRecordIter, Row};
pub use sink::{ColumnSink, Columns, RawSink};
pub use tokenizer::{RowsIntoIter, RowsIter, Tokenizer, TokenizerBuilder};
pub use workflow::{WorkflowBuilder, DEFAULT_QUEUE_CAPACITY};
pub use writer::{Writer, WriterBuilder};
