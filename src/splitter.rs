//! Input splitter.

use std::cmp::Ordering;
use std::error::Error;
use std::marker::PhantomData;
use std::mem;
use std::thread;

use crossbeam_channel;

use crate::buffer::{ChunkBuffer, ChunkBufferBuilder};
use crate::cancel::CancellationToken;
use crate::format::RunFormat;
use crate::run::{Run, RunError};
use crate::sort::SortError;
use crate::writer::RunWriter;

type SplitError<C, E> = SortError<<C as RunFormat>::EncodeError, <C as RunFormat>::DecodeError, E>;

/// Splits an input record stream into sorted runs.
pub struct Splitter<'a, B, C>
where
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    writer: RunWriter<'a>,
    buffer_builder: &'a B,
    cancellation: &'a CancellationToken,

    format: PhantomData<C>,
}

impl<'a, B, C> Splitter<'a, B, C>
where
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    pub fn new(writer: RunWriter<'a>, buffer_builder: &'a B, cancellation: &'a CancellationToken) -> Self {
        Splitter {
            writer,
            buffer_builder,
            cancellation,
            format: PhantomData,
        }
    }

    /// Consumes the whole input producing runs one after another.
    ///
    /// Returns runs in creation order. Runs created before a failure are deleted.
    pub fn split<I, E, F>(&self, input: I, compare: F) -> Result<Vec<Run<C>>, SplitError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
        E: Error,
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
    {
        let mut runs = Vec::new();

        self.drain_input(input, compare, |chunk| {
            let run = self.writer.persist::<C, _>(chunk).map_err(SortError::from_persist)?;
            runs.push(run);
            Ok(())
        })?;

        return Ok(runs);
    }

    /// Consumes the whole input persisting every sorted chunk in a background thread while
    /// the next chunk is being read and sorted. At most one sorted chunk waits for persisting.
    ///
    /// Produces the same runs as [`Splitter::split`].
    pub fn split_pipelined<I, E, F>(&self, input: I, compare: F) -> Result<Vec<Run<C>>, SplitError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
        E: Error,
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
    {
        let writer = &self.writer;

        thread::scope(|scope| {
            let (sender, receiver) = crossbeam_channel::bounded::<B::Buffer>(0);

            let persister = scope.spawn(move || -> Result<Vec<Run<C>>, RunError<C::EncodeError>> {
                let mut runs = Vec::new();
                for chunk in receiver {
                    runs.push(writer.persist::<C, _>(chunk)?);
                }
                Ok(runs)
            });

            // a send only fails once the persister has stopped on an error, that error is reported instead
            let produced = self.drain_input(input, compare, move |chunk| {
                sender.send(chunk).map_err(|_| SortError::Aborted)
            });

            match persister.join() {
                Err(_) => Err(SortError::RunWriterPanicked),
                Ok(Err(err)) => Err(SortError::from_persist(err)),
                Ok(Ok(runs)) => produced.map(|_| runs),
            }
        })
    }

    fn drain_input<I, E, F, K>(&self, input: I, compare: F, mut sink: K) -> Result<(), SplitError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
        E: Error,
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
        K: FnMut(B::Buffer) -> Result<(), SplitError<C, E>>,
    {
        let mut chunk = self.buffer_builder.build();

        for record in input.into_iter() {
            if self.cancellation.is_cancelled() {
                return Err(SortError::Aborted);
            }
            chunk.push(record.map_err(SortError::InputError)?);

            if chunk.is_full() {
                self.writer.sort(&mut chunk, compare);
                sink(mem::replace(&mut chunk, self.buffer_builder.build()))?;
            }
        }

        if !chunk.is_empty() {
            self.writer.sort(&mut chunk, compare);
            sink(chunk)?;
        }

        return Ok(());
    }
}
