use std::io::Read;
use std::panic;
use std::thread;

use tracing::{debug, warn};

use crate::error::Result;
use crate::queue::{BatchOutcome, Queue};
use crate::records::{ByteRecord, Row};
use crate::sink::Columns;
use crate::tokenizer::TokenizerBuilder;

/// Default number of rows the queue between both threads can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Builds and runs materialization sessions: CSV input is tokenized on a
/// producer thread while rows are converted into entities, batch by batch,
/// on the calling thread.
///
/// # Example
///
/// ```ignore
/// let ages = WorkflowBuilder::new()
///     .queue_capacity(500)
///     .run(reader, |record| Ok(record.len()))?;
/// ```
#[derive(Clone)]
pub struct WorkflowBuilder {
    tokenizer: TokenizerBuilder,
    queue_capacity: usize,
    strip_bom: bool,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self {
            tokenizer: TokenizerBuilder::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            strip_bom: false,
        }
    }
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`TokenizerBuilder::delimiter`].
    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.tokenizer.delimiter(delimiter);
        self
    }

    /// See [`TokenizerBuilder::quote`].
    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.tokenizer.quote(quote);
        self
    }

    /// See [`TokenizerBuilder::quote_escape`].
    pub fn quote_escape(&mut self, escape: u8) -> &mut Self {
        self.tokenizer.quote_escape(escape);
        self
    }

    /// See [`TokenizerBuilder::newline`].
    pub fn newline(&mut self, newline: u8) -> &mut Self {
        self.tokenizer.newline(newline);
        self
    }

    /// See [`TokenizerBuilder::buffer_capacity`].
    pub fn buffer_capacity(&mut self, capacity: usize) -> &mut Self {
        self.tokenizer.buffer_capacity(capacity);
        self
    }

    /// Set the capacity of the queue between the producer and the consumer.
    ///
    /// Must be at least [`MIN_QUEUE_CAPACITY`](crate::MIN_QUEUE_CAPACITY),
    /// else running the workflow will fail before any thread is started.
    ///
    /// Will default to [`DEFAULT_QUEUE_CAPACITY`].
    pub fn queue_capacity(&mut self, capacity: usize) -> &mut Self {
        self.queue_capacity = capacity;
        self
    }

    /// Whether to skip a leading UTF-8 BOM.
    ///
    /// Will default to `false`.
    pub fn strip_bom(&mut self, yes: bool) -> &mut Self {
        self.strip_bom = yes;
        self
    }

    /// Convert every row of `reader` using `convert`, and return the
    /// resulting entities in input order.
    pub fn run<R, E, F>(&self, reader: R, convert: F) -> Result<Vec<E>>
    where
        R: Read + Send,
        F: FnMut(ByteRecord) -> Result<E>,
    {
        self.run_with_columns(reader, Columns::raw(), convert)
    }

    /// Same as [`Self::run`], but decoding columns through the given
    /// [`Columns`] binding.
    pub fn run_with_columns<R, E, F>(
        &self,
        reader: R,
        columns: Columns,
        mut convert: F,
    ) -> Result<Vec<E>>
    where
        R: Read + Send,
        F: FnMut(ByteRecord) -> Result<E>,
    {
        let batches = self.run_batches(reader, columns, |batch| {
            let mut entities = Vec::with_capacity(batch.len());
            let mut stop = false;

            for row in batch {
                match row {
                    Row::Record(record) => entities.push(convert(record)?),
                    Row::EndOfStream => stop = true,
                }
            }

            Ok(BatchOutcome::new(stop, Some(entities)))
        })?;

        Ok(batches.into_iter().flatten().collect())
    }

    /// Run a session handing whole batches of rows to `callback`.
    ///
    /// See [`Queue::process_batches`] for the contract `callback` must
    /// uphold. Returns the entity lists reported by `callback`, in order.
    ///
    /// If both sides fail, the consumer's error wins since the producer's
    /// is usually a consequence of it. A panic on the producer thread is
    /// resumed on the calling thread.
    pub fn run_batches<R, E, F>(
        &self,
        reader: R,
        columns: Columns,
        callback: F,
    ) -> Result<Vec<Vec<E>>>
    where
        R: Read + Send,
        F: FnMut(Vec<Row>) -> Result<BatchOutcome<E>>,
    {
        let queue = Queue::new(self.queue_capacity)?;
        let mut tokenizer = self.tokenizer.from_reader_with_columns(reader, columns);

        if self.strip_bom {
            tokenizer.strip_bom()?;
        }

        debug!(capacity = queue.capacity(), "starting workflow");

        let (produced, consumed) = thread::scope(|s| {
            let producer = s.spawn(|| tokenizer.produce(&queue));
            let consumed = queue.process_batches(callback);

            // NOTE: the callback may have asked to stop before the end of
            // the stream, in which case the producer could be left waiting
            // for space forever.
            queue.cancel_producer();

            (producer.join(), consumed)
        });

        let produced = match produced {
            Ok(produced) => produced,
            Err(payload) => panic::resume_unwind(payload),
        };

        let batches = match consumed {
            Ok(batches) => batches,
            Err(err) => {
                if let Err(producer_err) = produced {
                    debug!(error = %producer_err, "producer stopped after consumer failure");
                }

                warn!(error = %err, "consumer failed");
                return Err(err);
            }
        };

        match produced {
            Ok(count) => {
                debug!(rows = count, batches = batches.len(), "workflow done");
            }
            Err(err) if err.is_consumer_died() => {
                debug!("consumer stopped before the end of the stream");
            }
            Err(err) => {
                warn!(error = %err, "producer failed");
                return Err(err);
            }
        }

        Ok(batches)
    }
}
