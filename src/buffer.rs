//! Chunk buffers bounded by cumulative record length.

use rayon;

/// Buffer builder.
pub trait ChunkBufferBuilder: Default {
    type Buffer: ChunkBuffer;

    /// Creates a new empty buffer.
    fn build(&self) -> Self::Buffer;
}

/// Base limited buffer interface.
pub trait ChunkBuffer: IntoIterator<Item = String> + rayon::slice::ParallelSliceMut<String> + Send {
    /// Adds a new record to the buffer.
    fn push(&mut self, record: String);

    /// Returns number of buffered records.
    fn len(&self) -> usize;

    /// Checks if the buffer holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if the buffer crossed its limit and has to be flushed.
    fn is_full(&self) -> bool;
}

/// Builder of [`LengthLimitedBuffer`]s sharing the same threshold.
#[derive(Clone, Debug)]
pub struct LengthLimitedBufferBuilder {
    limit: usize,
}

impl LengthLimitedBufferBuilder {
    /// Creates a builder of buffers flushed once their records total more than `limit` bytes.
    pub fn new(limit: usize) -> Self {
        LengthLimitedBufferBuilder { limit }
    }
}

impl ChunkBufferBuilder for LengthLimitedBufferBuilder {
    type Buffer = LengthLimitedBuffer;

    fn build(&self) -> Self::Buffer {
        LengthLimitedBuffer::new(self.limit)
    }
}

impl Default for LengthLimitedBufferBuilder {
    fn default() -> Self {
        LengthLimitedBufferBuilder { limit: usize::MAX }
    }
}

/// Buffer limited by the sum of its records' lengths (in bytes).
///
/// The limit is checked after a record is appended, so a full buffer always holds at least one
/// record and may exceed the limit by the length of the last one.
pub struct LengthLimitedBuffer {
    limit: usize,
    total_len: usize,
    inner: Vec<String>,
}

impl LengthLimitedBuffer {
    pub fn new(limit: usize) -> Self {
        LengthLimitedBuffer {
            limit,
            total_len: 0,
            inner: Vec::new(),
        }
    }

    /// Returns the cumulative length of buffered records.
    pub fn total_len(&self) -> usize {
        self.total_len
    }
}

impl ChunkBuffer for LengthLimitedBuffer {
    fn push(&mut self, record: String) {
        self.total_len = self.total_len.saturating_add(record.len());
        self.inner.push(record);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_full(&self) -> bool {
        self.total_len > self.limit
    }
}

impl IntoIterator for LengthLimitedBuffer {
    type Item = String;
    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<String> for LengthLimitedBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [String] {
        self.inner.as_mut_slice()
    }
}
