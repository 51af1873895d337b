use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::records::{ByteRecord, Row};

/// Smallest capacity a [`Queue`] accepts.
pub const MIN_QUEUE_CAPACITY: usize = 20;

/// What a batch callback reports back to [`Queue::process_batches`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome<E> {
    /// Whether the callback saw the end of the stream, so that processing
    /// must stop.
    pub stop: bool,
    /// Entities built from the batch, if any.
    pub entities: Option<Vec<E>>,
}

impl<E> BatchOutcome<E> {
    pub fn new(stop: bool, entities: Option<Vec<E>>) -> Self {
        Self { stop, entities }
    }
}

struct State<T> {
    slots: Vec<Option<Row<T>>>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
    producer_blocked: bool,
    consumer_waiting: bool,
    consumer_died: bool,
}

/// A bounded queue handing rows over from exactly one producer thread to
/// exactly one consumer thread.
///
/// Rows are stored in a fixed-size ring buffer. The consumer is only woken
/// up once the buffer is filled up to its threshold (90% of its capacity) or
/// once the end-of-stream marker has been inserted, and it then drains the
/// whole buffer at once, so that the lock is taken once per batch rather
/// than once per row.
pub struct Queue<T = ByteRecord> {
    state: Mutex<State<T>>,
    // Producer waits on this one while the buffer is full
    space_freed: Condvar,
    // Consumer waits on this one while below threshold and not closed
    work_ready: Condvar,
    capacity: usize,
    threshold: usize,
}

impl<T> Queue<T> {
    /// Create a new queue able to hold `capacity` rows.
    ///
    /// Will fail if `capacity` is lower than [`MIN_QUEUE_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < MIN_QUEUE_CAPACITY {
            return Err(Error::new(ErrorKind::Configuration {
                capacity,
                minimum: MIN_QUEUE_CAPACITY,
            }));
        }

        Ok(Self {
            state: Mutex::new(State {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
                closed: false,
                producer_blocked: false,
                consumer_waiting: false,
                consumer_died: false,
            }),
            space_freed: Condvar::new(),
            work_ready: Condvar::new(),
            capacity,
            threshold: capacity * 9 / 10,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of rows from which a waiting consumer is woken up.
    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of rows currently waiting to be consumed.
    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn is_producer_blocked(&self) -> bool {
        self.state.lock().producer_blocked
    }

    #[cfg(test)]
    fn is_consumer_waiting(&self) -> bool {
        self.state.lock().consumer_waiting
    }

    fn insert_row(&self, row: Row<T>) -> Result<()> {
        let mut state = self.state.lock();

        while state.count == self.capacity && !state.consumer_died {
            state.producer_blocked = true;
            trace!("queue is full, producer blocked");
            self.space_freed.wait(&mut state);
        }

        state.producer_blocked = false;

        if state.consumer_died {
            return Err(Error::new(ErrorKind::ConsumerDied));
        }

        let end = row.is_end_of_stream();
        let tail = state.tail;

        state.slots[tail] = Some(row);
        state.tail = (tail + 1) % self.capacity;
        state.count += 1;

        if end {
            state.closed = true;
        }

        if state.count >= self.threshold || end {
            self.work_ready.notify_one();
        }

        Ok(())
    }

    /// Insert a row, blocking the calling thread while the queue is full.
    ///
    /// Will fail if the consumer died, see [`Self::cancel_producer`].
    pub fn insert(&self, record: T) -> Result<()> {
        self.insert_row(Row::Record(record))
    }

    /// Insert the end-of-stream marker, meaning no more rows will follow.
    ///
    /// Same blocking and failure rules as [`Self::insert`] apply.
    pub fn close(&self) -> Result<()> {
        self.insert_row(Row::EndOfStream)
    }

    /// Return a guard closing the queue when dropped, unless
    /// [`CloseGuard::close`] was called explicitly.
    pub fn close_guard(&self) -> CloseGuard<'_, T> {
        CloseGuard {
            queue: self,
            armed: true,
        }
    }

    /// Mark the consumer as dead, and wake the producer up if it is blocked
    /// so that it fails with [`ErrorKind::ConsumerDied`] instead of waiting
    /// forever.
    pub fn cancel_producer(&self) {
        let mut state = self.state.lock();

        state.consumer_died = true;
        debug!(blocked = state.producer_blocked, "consumer died, cancelling producer");

        if state.producer_blocked {
            self.space_freed.notify_one();
        }
    }

    // Wait for a good workload, or for the end of the stream, then take the
    // whole content of the ring buffer.
    fn drain(&self) -> Vec<Row<T>> {
        let mut state = self.state.lock();

        while state.count < self.threshold && !state.closed {
            state.consumer_waiting = true;
            self.work_ready.wait(&mut state);
        }

        state.consumer_waiting = false;

        let count = state.count;
        let head = state.head;

        // NOTE: the occupied range may wrap around the end of the buffer, in
        // which case it is drained from `head` to the end, then from the
        // start of the buffer.
        let first = count.min(self.capacity - head);
        let mut batch = Vec::with_capacity(count);

        batch.extend(
            state.slots[head..head + first]
                .iter_mut()
                .filter_map(Option::take),
        );
        batch.extend(state.slots[..count - first].iter_mut().filter_map(Option::take));

        state.head = (head + count) % self.capacity;
        state.count = 0;

        if state.producer_blocked {
            self.space_freed.notify_one();
        }

        batch
    }

    /// Drain the queue batch by batch until `callback` asks to stop, and
    /// return the entities it built, batch by batch.
    ///
    /// Meant to run on the consumer thread. `callback` runs outside of the
    /// lock and receives batches in insertion order, the end-of-stream
    /// marker, if present, always being the last row of a batch.
    ///
    /// If `callback` fails or panics, the producer is cancelled before the
    /// failure propagates.
    pub fn process_batches<E, F>(&self, mut callback: F) -> Result<Vec<Vec<E>>>
    where
        F: FnMut(Vec<Row<T>>) -> Result<BatchOutcome<E>>,
    {
        let mut guard = CancelGuard {
            queue: self,
            armed: true,
        };

        let mut results = Vec::new();

        loop {
            let batch = self.drain();

            // End of stream was already handed over by a previous call
            if batch.is_empty() {
                break;
            }

            let saw_end = batch.last().is_some_and(Row::is_end_of_stream);

            trace!(rows = batch.len(), end = saw_end, "drained batch");

            let outcome = callback(batch)?;

            if let Some(entities) = outcome.entities {
                results.push(entities);
            }

            if outcome.stop {
                break;
            }

            if saw_end {
                warn!("batch callback did not stop after the end of the stream");
                break;
            }
        }

        guard.armed = false;

        Ok(results)
    }
}

/// Closes a [`Queue`] when dropped.
///
/// See [`Queue::close_guard`].
pub struct CloseGuard<'q, T> {
    queue: &'q Queue<T>,
    armed: bool,
}

impl<T> CloseGuard<'_, T> {
    pub fn close(mut self) -> Result<()> {
        self.armed = false;
        self.queue.close()
    }
}

impl<T> Drop for CloseGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.queue.close() {
                debug!(error = %err, "could not close queue");
            }
        }
    }
}

struct CancelGuard<'q, T> {
    queue: &'q Queue<T>,
    armed: bool,
}

impl<T> Drop for CancelGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.cancel_producer();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn wait_until_producer_blocks<T>(queue: &Queue<T>) {
        while !queue.is_producer_blocked() {
            thread::yield_now();
        }
    }

    fn wait_until_consumer_waits<T>(queue: &Queue<T>) {
        while !queue.is_consumer_waiting() {
            thread::yield_now();
        }
    }

    fn collect_all(queue: &Queue<usize>) -> Result<Vec<usize>> {
        let batches = queue.process_batches(|batch| {
            let stop = batch.last().is_some_and(Row::is_end_of_stream);
            let items = batch.into_iter().filter_map(Row::into_record).collect();

            Ok(BatchOutcome::new(stop, Some(items)))
        })?;

        Ok(batches.into_iter().flatten().collect())
    }

    #[test]
    fn test_configuration() {
        let err = Queue::<usize>::new(19).err().unwrap();

        assert!(err.is_configuration_error());
        assert!(Queue::<usize>::new(0).is_err());

        let queue = Queue::<usize>::new(20).unwrap();

        assert_eq!(queue.capacity(), 20);
        assert_eq!(queue.threshold(), 18);
        assert!(queue.is_empty());

        assert_eq!(Queue::<usize>::new(1000).unwrap().threshold(), 900);
    }

    #[test]
    fn test_fifo_across_wraparound() -> Result<()> {
        let queue = Queue::new(20)?;
        let mut output = Vec::new();
        let mut next: usize = 1;

        // Batches of 18 move the head around the buffer
        for _ in 0..7 {
            for _ in 0..18 {
                queue.insert(next)?;
                next += 1;
            }

            output.extend(queue.drain().into_iter().filter_map(Row::into_record));
        }

        // Tail end, wrapping around the buffer
        for _ in 0..7 {
            queue.insert(next)?;
            next += 1;
        }

        queue.close()?;

        let batch = queue.drain();

        assert_eq!(batch.last(), Some(&Row::EndOfStream));
        output.extend(batch.into_iter().filter_map(Row::into_record));

        assert_eq!(output, (1..next).collect::<Vec<_>>());

        Ok(())
    }

    #[test]
    fn test_one_to_twenty_five() -> Result<()> {
        let queue = Queue::new(20)?;

        // Move the head so that the next batch wraps around
        for i in 0..18 {
            queue.insert(i)?;
        }

        queue.drain();

        for i in 1..=18 {
            queue.insert(i)?;
        }

        let first = queue.drain();

        for i in 19..=25 {
            queue.insert(i)?;
        }

        queue.close()?;

        let output = first
            .into_iter()
            .chain(queue.drain())
            .filter_map(Row::into_record)
            .collect::<Vec<_>>();

        assert_eq!(output, (1..=25).collect::<Vec<_>>());

        Ok(())
    }

    #[test]
    fn test_fifo_with_threads() -> Result<()> {
        let queue = Queue::new(20)?;

        let consumed = thread::scope(|s| {
            s.spawn(|| -> Result<()> {
                for i in 0..1000 {
                    queue.insert(i)?;
                }

                queue.close()
            });

            collect_all(&queue)
        })?;

        assert_eq!(consumed, (0..1000).collect::<Vec<_>>());

        Ok(())
    }

    #[test]
    fn test_full_queue_blocks_producer() -> Result<()> {
        let queue = Queue::new(20)?;
        let inserted = AtomicBool::new(false);

        for i in 0..20 {
            queue.insert(i)?;
        }

        assert_eq!(queue.len(), 20);

        thread::scope(|s| {
            let producer = s.spawn(|| {
                let result = queue.insert(20);
                inserted.store(true, Ordering::SeqCst);
                result
            });

            wait_until_producer_blocks(&queue);
            assert!(!inserted.load(Ordering::SeqCst));

            assert_eq!(queue.drain().len(), 20);

            producer.join().unwrap()
        })?;

        assert!(inserted.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 1);

        Ok(())
    }

    #[test]
    fn test_threshold_wakes_consumer() -> Result<()> {
        let queue = Queue::new(20)?;
        let (sender, receiver) = mpsc::channel();

        thread::scope(|s| -> Result<()> {
            s.spawn(|| {
                queue.process_batches(|batch| {
                    let stop = batch.last().is_some_and(Row::is_end_of_stream);
                    sender.send(batch.len()).unwrap();

                    Ok(BatchOutcome::<()>::new(stop, None))
                })
            });

            wait_until_consumer_waits(&queue);

            for i in 0..17 {
                queue.insert(i)?;
            }

            // Still under threshold, nothing is handed over
            assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
            assert!(queue.is_consumer_waiting());

            queue.insert(17)?;

            // The buffer is not full, yet the consumer got the whole batch
            let size = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(size, 18);

            queue.insert(18)?;
            queue.close()?;

            let size = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(size, 2);

            Ok(())
        })
    }

    #[test]
    fn test_cancel_producer() -> Result<()> {
        let queue = Queue::new(20)?;

        for i in 0..20 {
            queue.insert(i)?;
        }

        let result = thread::scope(|s| {
            let producer = s.spawn(|| queue.insert(20));

            wait_until_producer_blocks(&queue);
            queue.cancel_producer();

            producer.join().unwrap()
        });

        assert!(result.unwrap_err().is_consumer_died());

        // Insertions fail right away from now on
        assert!(queue.insert(21).unwrap_err().is_consumer_died());
        assert!(queue.close().unwrap_err().is_consumer_died());

        Ok(())
    }

    #[test]
    fn test_failing_callback_cancels_producer() -> Result<()> {
        let queue = Queue::new(20)?;

        let (produced, consumed) = thread::scope(|s| {
            let producer = s.spawn(|| -> Result<()> {
                for i in 0..1000 {
                    queue.insert(i)?;
                }

                queue.close()
            });

            let consumed = queue.process_batches(|_batch| -> Result<BatchOutcome<()>> {
                Err(Error::conversion("cannot convert"))
            });

            (producer.join().unwrap(), consumed)
        });

        assert!(produced.unwrap_err().is_consumer_died());
        assert_eq!(consumed.unwrap_err().to_string(), "conversion error: cannot convert");

        Ok(())
    }

    #[test]
    fn test_stops_after_end_of_stream() -> Result<()> {
        let queue = Queue::new(20)?;

        queue.insert(1)?;
        queue.close()?;

        let batches = queue.process_batches(|batch| {
            let items = batch.into_iter().filter_map(Row::into_record).collect();

            // Never asks to stop
            Ok(BatchOutcome::new(false, Some(items)))
        })?;

        assert_eq!(batches, vec![vec![1]]);

        Ok(())
    }
}
