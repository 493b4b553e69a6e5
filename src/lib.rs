//! `ext-line-sort` sorts line-oriented text files that don't fit into memory.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM, during the second pass it merges the sorted chunks
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded chunks:**
//!   the input is split into chunks bounded by the cumulative length of their records, every chunk is sorted in
//!   memory and persisted as an immutable run in a private temporary directory.
//! * **K-way merge:**
//!   runs are merged through a binary heap holding a single record per run, so merge memory is proportional to
//!   the number of runs, not to the input size.
//! * **Custom order:**
//!   any total order over records can be supplied as a compare function.
//! * **Multithreading support:**
//!   chunks are sorted in a thread pool; persisting a run can overlap with sorting the next chunk.
//! * **Guaranteed cleanup and cancellation:**
//!   temporary data is removed on success, failure and cancellation alike.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_line_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let builder: ExternalSorterBuilder = ExternalSorterBuilder::new();
//!     let sorter: ExternalSorter = builder
//!         .with_tmp_dir(Path::new("./"))
//!         .with_chunk_size(50 * 1024 * 1024)
//!         .with_pipeline(true)
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter.sort_file(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//!     println!("{} records sorted", stats.records);
//! }
//! ```

pub mod buffer;
pub mod cancel;
#[cfg(all(feature = "clap", feature = "env_logger"))]
pub mod cli;
pub mod format;
#[cfg(feature = "generator")]
pub mod generator;
pub mod lines;
pub mod merger;
pub mod observer;
pub mod run;
pub mod sort;
pub mod splitter;
pub mod store;
pub mod writer;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, LengthLimitedBuffer, LengthLimitedBufferBuilder};
pub use cancel::CancellationToken;
pub use format::{LineFormat, RmpFormat, RunFormat};
pub use lines::LineReader;
pub use merger::BinaryHeapMerger;
pub use observer::{LogObserver, NoopObserver, SortObserver, SortStats};
pub use run::{RecordCursor, Run, RunError, RunReader};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortedRecords};
pub use store::RunStore;
