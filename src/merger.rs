//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::mem;
use std::sync::Arc;

use crate::observer::SortObserver;
use crate::run::RecordCursor;

/// Frontier entry: a non-exhausted cursor ordered by its current record.
struct FrontierEntry<R, F> {
    cursor: R,
    compare: F,
}

impl<R, F> PartialEq for FrontierEntry<R, F>
where
    R: RecordCursor,
    F: Fn(&str, &str) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<R, F> Eq for FrontierEntry<R, F>
where
    R: RecordCursor,
    F: Fn(&str, &str) -> Ordering,
{
}

impl<R, F> PartialOrd for FrontierEntry<R, F>
where
    R: RecordCursor,
    F: Fn(&str, &str) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R, F> Ord for FrontierEntry<R, F>
where
    R: RecordCursor,
    F: Fn(&str, &str) -> Ordering,
{
    fn cmp(&self, other: &Self) -> Ordering {
        // binary heap is max-heap by default so the comparison is reversed to get min-heap
        match (self.cursor.peek(), other.cursor.peek()) {
            (Some(this), Some(other)) => (self.compare)(other, this),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted cursors into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of cursors (runs).
///
/// Only the current record of every cursor is kept in memory. Cursors are released as soon as
/// they are exhausted. The order of records comparing equal but coming from different cursors
/// is unspecified.
pub struct BinaryHeapMerger<R, F>
where
    R: RecordCursor,
    F: Fn(&str, &str) -> Ordering + Copy,
{
    frontier: BinaryHeap<FrontierEntry<R, F>>,
    observer: Arc<dyn SortObserver>,
}

impl<R, F> BinaryHeapMerger<R, F>
where
    R: RecordCursor,
    F: Fn(&str, &str) -> Ordering + Copy,
{
    /// Creates an instance of a binary heap merger using cursors as inputs.
    /// Cursor records should be sorted according to `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `cursors` - Cursors to be merged in a single sorted output
    /// * `compare` - Function to be used to compare records
    /// * `observer` - Receives cursor release notifications
    pub fn new<I>(cursors: I, compare: F, observer: Arc<dyn SortObserver>) -> Self
    where
        I: IntoIterator<Item = R>,
    {
        let cursors = cursors.into_iter();
        let mut merger = BinaryHeapMerger {
            frontier: BinaryHeap::with_capacity(cursors.size_hint().0),
            observer,
        };

        for cursor in cursors {
            if cursor.peek().is_some() {
                merger.frontier.push(FrontierEntry { cursor, compare });
            } else {
                merger.release(cursor);
            }
        }

        return merger;
    }

    /// Returns number of cursors that still have records.
    pub fn active(&self) -> usize {
        self.frontier.len()
    }

    /// Releases all cursors that still have records.
    pub fn close(&mut self) {
        for entry in mem::take(&mut self.frontier) {
            self.release(entry.cursor);
        }
    }

    fn release(&self, cursor: R) {
        match cursor.close() {
            Ok(()) => self.observer.on_run_released(),
            Err(err) => self.observer.on_release_failed(&err),
        }
    }
}

impl<R, F> Iterator for BinaryHeapMerger<R, F>
where
    R: RecordCursor,
    F: Fn(&str, &str) -> Ordering + Copy,
{
    type Item = Result<String, R::Error>;

    /// Returns the next record from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut entry = self.frontier.pop()?;

            match entry.cursor.advance() {
                Ok(Some(record)) => {
                    if entry.cursor.peek().is_some() {
                        self.frontier.push(entry);
                    } else {
                        self.release(entry.cursor);
                    }
                    return Some(Ok(record));
                }
                Ok(None) => self.release(entry.cursor),
                Err(err) => {
                    // a read failure is fatal: remaining runs are released and the output ends here
                    self.close();
                    return Some(Err(err));
                }
            }
        }
    }
}
