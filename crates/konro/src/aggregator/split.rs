//! Batch partitioning.

use crate::request::Request;

/// A contiguous ordered slice of a batch, processed as a unit.
///
/// `index` is the slice's creation-order rank and `offset` the position of
/// its first element in the parent batch; together they let results and
/// contexts be reassembled by position rather than by completion order.
#[derive(Debug)]
pub struct MicroBatch<T> {
    index: usize,
    offset: usize,
    requests: Vec<Request<T>>,
}

impl<T> MicroBatch<T> {
    /// Creation-order rank of this slice.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Position of this slice's first element in the parent batch.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of requests in this slice.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the slice is empty. Never true for slices produced by
    /// [`split_batch`].
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// The slice's requests in batch order.
    pub fn requests(&self) -> &[Request<T>] {
        &self.requests
    }

    /// Consumes the slice, returning its requests.
    pub fn into_requests(self) -> Vec<Request<T>> {
        self.requests
    }
}

/// Partitions `batch` into consecutive micro-batches of at most `chunk_size`
/// requests; the last may be shorter.
///
/// Partitioning is deterministic by input order, never by content: a batch
/// of `n` yields `ceil(n / chunk_size)` slices with contiguous offsets.
pub fn split_batch<T>(batch: Vec<Request<T>>, chunk_size: usize) -> Vec<MicroBatch<T>> {
    assert!(chunk_size > 0, "chunk size must be positive");
    let mut chunks = Vec::with_capacity(batch.len().div_ceil(chunk_size));
    let mut offset = 0;
    let mut remaining = batch.into_iter();
    loop {
        let requests: Vec<Request<T>> = remaining.by_ref().take(chunk_size).collect();
        if requests.is_empty() {
            break;
        }
        let taken = requests.len();
        chunks.push(MicroBatch {
            index: chunks.len(),
            offset,
            requests,
        });
        offset += taken;
    }
    chunks
}
