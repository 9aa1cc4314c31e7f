use hdmint::Record;

/// Outcome of [`BatchAggregator::append`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    /// The record was buffered and `remaining` more fit before a flush is due.
    Accepting { remaining: usize },
    /// The record was buffered and the batch reached its threshold. The caller
    /// must flush before appending again.
    Full,
}

/// Accumulates records until a size threshold, then signals a flush.
///
/// The buffer never holds more than `threshold` records: once full, further
/// records are handed back to the caller until the batch is taken.
#[derive(Debug)]
pub struct BatchAggregator {
    batch: Vec<Record>,
    threshold: usize,
}

impl BatchAggregator {
    /// # Panics
    ///
    /// Panics if `threshold` is zero.
    pub fn new(threshold: usize) -> Self {
        assert!(threshold > 0, "batch threshold must be greater than 0");
        Self {
            batch: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Buffers `record`, reporting whether the batch is now due for a flush.
    ///
    /// # Errors
    ///
    /// Returns the record unchanged if the batch is already full.
    pub fn append(&mut self, record: Record) -> Result<BatchStatus, Record> {
        if self.is_full() {
            return Err(record);
        }
        self.batch.push(record);
        Ok(if self.is_full() {
            BatchStatus::Full
        } else {
            BatchStatus::Accepting {
                remaining: self.threshold - self.batch.len(),
            }
        })
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.batch.len() >= self.threshold
    }

    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.batch
    }

    /// Moves the buffered records out, leaving the aggregator empty.
    pub fn take_and_clear(&mut self) -> Vec<Record> {
        core::mem::replace(&mut self.batch, Vec::with_capacity(self.threshold))
    }

    /// Puts back a batch whose flush failed, ahead of anything buffered since.
    ///
    /// The result may exceed the threshold; it then stays full until taken.
    pub fn restore(&mut self, mut batch: Vec<Record>) {
        batch.append(&mut self.batch);
        self.batch = batch;
    }
}
