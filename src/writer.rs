//! Sorted run writer.

use std::cmp::Ordering;

use rayon::slice::ParallelSliceMut;

use crate::buffer::ChunkBuffer;
use crate::format::RunFormat;
use crate::observer::SortObserver;
use crate::run::{Run, RunError};
use crate::store::RunStore;

/// Turns full chunk buffers into persisted sorted runs.
pub struct RunWriter<'a> {
    store: &'a RunStore,
    thread_pool: &'a rayon::ThreadPool,
    observer: &'a dyn SortObserver,
}

impl<'a> RunWriter<'a> {
    pub fn new(store: &'a RunStore, thread_pool: &'a rayon::ThreadPool, observer: &'a dyn SortObserver) -> Self {
        RunWriter {
            store,
            thread_pool,
            observer,
        }
    }

    /// Sorts chunk records in place using the writer thread pool.
    pub fn sort<B, F>(&self, buffer: &mut B, compare: F)
    where
        B: ChunkBuffer,
        F: Fn(&str, &str) -> Ordering + Sync + Send,
    {
        self.thread_pool.install(|| {
            buffer.par_sort_by(|a, b| compare(a.as_str(), b.as_str()));
        });
    }

    /// Persists already sorted chunk records as a new run.
    pub fn persist<C, B>(&self, buffer: B) -> Result<Run<C>, RunError<C::EncodeError>>
    where
        C: RunFormat,
        B: ChunkBuffer,
    {
        let run = self.store.persist::<C>(buffer)?;
        self.observer.on_run_persisted(run.path(), run.records(), run.bytes());

        return Ok(run);
    }

    /// Sorts and persists a chunk.
    pub fn write<C, B, F>(&self, mut buffer: B, compare: F) -> Result<Run<C>, RunError<C::EncodeError>>
    where
        C: RunFormat,
        B: ChunkBuffer,
        F: Fn(&str, &str) -> Ordering + Sync + Send,
    {
        self.sort(&mut buffer, compare);
        self.persist(buffer)
    }
}
