//! External sorter.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tempfile;

use crate::buffer::{ChunkBufferBuilder, LengthLimitedBufferBuilder};
use crate::cancel::CancellationToken;
use crate::format::{LineFormat, RunFormat};
use crate::lines::LineReader;
use crate::merger::BinaryHeapMerger;
use crate::observer::{LogObserver, SortObserver, SortStats};
use crate::run::{Run, RunError, RunReader};
use crate::splitter::Splitter;
use crate::store::RunStore;
use crate::writer::RunWriter;

/// Sorting error.
#[derive(Debug)]
pub enum SortError<S: Error, D: Error, I: Error> {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Run storage I/O error.
    IO(io::Error),
    /// Run record serialization error.
    SerializationError(S),
    /// Run record deserialization error.
    DeserializationError(D),
    /// Input data stream error.
    InputError(I),
    /// Output data stream error.
    Output(io::Error),
    /// Background run writer panicked.
    RunWriterPanicked,
    /// Sorting has been cancelled.
    Aborted,
}

impl<S: Error, D: Error, I: Error> SortError<S, D, I> {
    pub(crate) fn from_persist(err: RunError<S>) -> Self {
        match err {
            RunError::IO(err) => SortError::IO(err),
            RunError::Format(err) => SortError::SerializationError(err),
        }
    }

    pub(crate) fn from_read(err: RunError<D>) -> Self {
        match err {
            RunError::IO(err) => SortError::IO(err),
            RunError::Format(err) => SortError::DeserializationError(err),
        }
    }
}

impl<S, D, I> Error for SortError<S, D, I>
where
    S: Error + 'static,
    D: Error + 'static,
    I: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::SerializationError(err) => Some(err),
            SortError::DeserializationError(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::Output(err) => Some(err),
            SortError::RunWriterPanicked | SortError::Aborted => None,
        }
    }
}

impl<S: Error, D: Error, I: Error> Display for SortError<S, D, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::SerializationError(err) => write!(f, "data serialization error: {}", err),
            SortError::DeserializationError(err) => write!(f, "data deserialization error: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::Output(err) => write!(f, "output data stream error: {}", err),
            SortError::RunWriterPanicked => write!(f, "run writer thread panicked"),
            SortError::Aborted => write!(f, "sorting job aborted"),
        }
    }
}

type JobError<C, E> = SortError<<C as RunFormat>::EncodeError, <C as RunFormat>::DecodeError, E>;

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<E = io::Error, B = LengthLimitedBufferBuilder, C = LineFormat>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Persist runs in a background thread.
    pipelined: bool,
    /// Progress observer.
    observer: Option<Arc<dyn SortObserver>>,
    /// Cancellation token.
    cancellation: Option<CancellationToken>,

    /// Run format type.
    run_format_type: PhantomData<C>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<E, B, C> ExternalSorterBuilder<E, B, C>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<E, B, C>, JobError<C, E>> {
        let observer = self.observer.unwrap_or_else(|| Arc::new(LogObserver));
        let thread_pool = ExternalSorter::<E, B, C>::init_thread_pool(self.threads_number)?;
        observer.on_thread_pool_created(thread_pool.current_num_threads());

        return Ok(ExternalSorter {
            thread_pool,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            buffer_builder: self.buffer_builder,
            pipelined: self.pipelined,
            observer,
            cancellation: self.cancellation.unwrap_or_default(),
            run_format_type: PhantomData,
            input_error_type: PhantomData,
        });
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<E, B, C> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<E, B, C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets buffer builder.
    pub fn with_buffer(mut self, buffer_builder: B) -> ExternalSorterBuilder<E, B, C> {
        self.buffer_builder = buffer_builder;
        return self;
    }

    /// Sets run read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<E, B, C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Enables persisting runs in a background thread while the next chunk is being sorted.
    pub fn with_pipeline(mut self, pipelined: bool) -> ExternalSorterBuilder<E, B, C> {
        self.pipelined = pipelined;
        return self;
    }

    /// Sets progress observer. [`LogObserver`] is used by default.
    pub fn with_observer(mut self, observer: Arc<dyn SortObserver>) -> ExternalSorterBuilder<E, B, C> {
        self.observer = Some(observer);
        return self;
    }

    /// Sets cancellation token the sorter will check while sorting.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> ExternalSorterBuilder<E, B, C> {
        self.cancellation = Some(cancellation);
        return self;
    }
}

impl<E, C> ExternalSorterBuilder<E, LengthLimitedBufferBuilder, C>
where
    E: Error,
    C: RunFormat,
{
    /// Sets chunk size threshold: cumulative length (in bytes) of records in a single run.
    pub fn with_chunk_size(self, chunk_size: usize) -> ExternalSorterBuilder<E, LengthLimitedBufferBuilder, C> {
        self.with_buffer(LengthLimitedBufferBuilder::new(chunk_size))
    }
}

impl<E, B, C> Default for ExternalSorterBuilder<E, B, C>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            buffer_builder: B::default(),
            pipelined: false,
            observer: None,
            cancellation: None,
            run_format_type: PhantomData,
            input_error_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<E = io::Error, B = LengthLimitedBufferBuilder, C = LineFormat>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory job temporary directories are created in.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Persist runs in a background thread.
    pipelined: bool,
    /// Progress observer.
    observer: Arc<dyn SortObserver>,
    /// Cancellation token.
    cancellation: CancellationToken,

    /// Run format type.
    run_format_type: PhantomData<C>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<E, B, C> ExternalSorter<E, B, C>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, JobError<C, E>> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_run_store(&self) -> Result<RunStore, JobError<C, E>> {
        let store = RunStore::new(self.tmp_dir.as_deref(), self.rw_buf_size).map_err(|err| SortError::TempDir(err))?;
        self.observer.on_temp_dir_created(store.path());

        return Ok(store);
    }

    /// Returns the token cancelling jobs of this sorter.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Sorts records from the input in natural (lexicographic) order.
    /// Returns an iterator that can be used to get sorted record stream.
    ///
    /// # Arguments
    /// * `input` - Input stream records to be fetched from
    pub fn sort<I>(
        &self,
        input: I,
    ) -> Result<SortedRecords<C, impl Fn(&str, &str) -> Ordering + Sync + Send + Copy, E>, JobError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
    {
        self.sort_by(input, |a: &str, b: &str| a.cmp(b))
    }

    /// Sorts records from the input using a custom compare function.
    /// Returns an iterator that can be used to get sorted record stream.
    ///
    /// The whole input is split into sorted runs before this method returns; merging happens
    /// lazily while the returned iterator is consumed.
    ///
    /// # Arguments
    /// * `input` - Input stream records to be fetched from
    /// * `compare` - Function to be used to compare records
    pub fn sort_by<I, F>(&self, input: I, compare: F) -> Result<SortedRecords<C, F, E>, JobError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
    {
        let started = Instant::now();
        let store = self.init_run_store()?;

        let runs = {
            let writer = RunWriter::new(&store, &self.thread_pool, self.observer.as_ref());
            let splitter: Splitter<B, C> = Splitter::new(writer, &self.buffer_builder, &self.cancellation);
            if self.pipelined {
                splitter.split_pipelined(input, compare)
            } else {
                splitter.split(input, compare)
            }
        }
        .map_err(|err| self.report(err))?;

        let records = runs.iter().map(Run::records).sum();
        self.observer.on_split_finished(runs.len(), records);

        let readers = self.open_runs(&store, runs).map_err(|err| self.report(err))?;
        self.observer.on_merge_started(readers.len());

        let stats = SortStats {
            records,
            runs: readers.len(),
            ..SortStats::default()
        };

        return Ok(SortedRecords {
            merger: BinaryHeapMerger::new(readers, compare, Arc::clone(&self.observer)),
            store: Some(store),
            observer: Arc::clone(&self.observer),
            cancellation: self.cancellation.clone(),
            stats,
            started,
            emitted: 0,
            failed: false,
            input_error_type: PhantomData,
        });
    }

    /// Opens all runs and loads their first records in parallel.
    fn open_runs(&self, store: &RunStore, runs: Vec<Run<C>>) -> Result<Vec<RunReader<C>>, JobError<C, E>> {
        self.thread_pool
            .install(|| {
                runs.into_par_iter()
                    .map(|run| store.open(run))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(SortError::from_read)
    }

    fn report(&self, err: JobError<C, E>) -> JobError<C, E> {
        if let SortError::Aborted = err {
            self.observer.on_aborted();
        }
        err
    }
}

impl<B, C> ExternalSorter<io::Error, B, C>
where
    B: ChunkBufferBuilder,
    C: RunFormat,
{
    /// Sorts lines of the input file in natural (lexicographic) order writing them to the output file.
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortStats, JobError<C, io::Error>> {
        self.sort_file_by(input, output, |a: &str, b: &str| a.cmp(b))
    }

    /// Sorts lines of the input file using a custom compare function writing them to the output file.
    ///
    /// The output is staged in a temporary file next to `output` and moved over it only after
    /// all records have been written, so a failed or cancelled job never leaves a truncated
    /// output behind. Any prior content of `output` is replaced.
    pub fn sort_file_by<F>(&self, input: &Path, output: &Path, compare: F) -> Result<SortStats, JobError<C, io::Error>>
    where
        F: Fn(&str, &str) -> Ordering + Sync + Send + Copy,
    {
        let input_stream = fs::File::open(input).map_err(SortError::InputError)?;
        let input_stream = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input_stream),
            None => io::BufReader::new(input_stream),
        };

        let sorted = self.sort_by(LineReader::new(input_stream), compare)?;

        let output_dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let staged = stage_output(output_dir, output).map_err(SortError::Output)?;

        let stats = {
            let mut output_stream = match self.rw_buf_size {
                Some(buf_size) => io::BufWriter::with_capacity(buf_size, staged.as_file()),
                None => io::BufWriter::new(staged.as_file()),
            };
            sorted.write_to(&mut output_stream)?
        };

        staged.persist(output).map_err(|err| SortError::Output(err.error))?;

        return Ok(stats);
    }
}

/// Creates a temporary file in `dir` to be persisted over `output` later.
///
/// The file gets the permissions of `output` if it exists, otherwise the permissions
/// a newly created file would get.
fn stage_output(dir: &Path, output: &Path) -> io::Result<tempfile::NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".ext-line-sort-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // the process umask is applied on creation
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let staged = builder.tempfile_in(dir)?;

    match fs::metadata(output) {
        Ok(metadata) => fs::set_permissions(staged.path(), metadata.permissions())?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    return Ok(staged);
}

/// Sorted record stream of a single sorting job.
///
/// Owns the job's temporary storage: runs are deleted as soon as they are merged and the job
/// directory is removed when the stream is finished or dropped. Either way release failures and
/// job completion are reported to the observer; a job which failed or was cancelled is not
/// reported as completed.
pub struct SortedRecords<C, F, E>
where
    C: RunFormat,
    F: Fn(&str, &str) -> Ordering + Copy,
    E: Error,
{
    merger: BinaryHeapMerger<RunReader<C>, F>,
    // taken once the job is released
    store: Option<RunStore>,
    observer: Arc<dyn SortObserver>,
    cancellation: CancellationToken,
    stats: SortStats,
    started: Instant,
    emitted: usize,
    failed: bool,

    input_error_type: PhantomData<E>,
}

impl<C, F, E> SortedRecords<C, F, E>
where
    C: RunFormat,
    F: Fn(&str, &str) -> Ordering + Copy,
    E: Error,
{
    /// Returns number of runs being merged.
    pub fn runs(&self) -> usize {
        self.stats.runs
    }

    /// Returns total number of records in the stream.
    pub fn records(&self) -> usize {
        self.stats.records
    }

    /// Writes all remaining records to the writer, one per line, and finishes the job.
    ///
    /// Records containing `\n` or `\r` can't be read back as a single line and are rejected.
    pub fn write_to<W: Write>(mut self, writer: &mut W) -> Result<SortStats, JobError<C, E>> {
        if let Err(err) = self.write_records(writer) {
            self.failed = true;
            return Err(err);
        }

        return Ok(self.finish());
    }

    fn write_records<W: Write>(&mut self, writer: &mut W) -> Result<(), JobError<C, E>> {
        while let Some(record) = self.next() {
            let record = record?;
            if record.contains(|c: char| c == '\n' || c == '\r') {
                return Err(SortError::Output(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "record contains a line terminator",
                )));
            }
            writer.write_all(record.as_bytes()).map_err(SortError::Output)?;
            writer.write_all(b"\n").map_err(SortError::Output)?;
        }
        writer.flush().map_err(SortError::Output)?;

        return Ok(());
    }

    /// Releases job temporary storage and reports job statistics.
    pub fn finish(mut self) -> SortStats {
        self.release();
        self.stats
    }

    fn release(&mut self) {
        let store = match self.store.take() {
            Some(store) => store,
            None => return,
        };

        // open runs are closed before their directory
        self.merger.close();
        if let Err(err) = store.close() {
            self.observer.on_release_failed(&err);
        }

        self.stats.elapsed = self.started.elapsed();
        if !self.failed {
            self.observer.on_sort_finished(&self.stats);
        }
    }
}

impl<C, F, E> Drop for SortedRecords<C, F, E>
where
    C: RunFormat,
    F: Fn(&str, &str) -> Ordering + Copy,
    E: Error,
{
    fn drop(&mut self) {
        self.release();
    }
}

impl<C, F, E> Iterator for SortedRecords<C, F, E>
where
    C: RunFormat,
    F: Fn(&str, &str) -> Ordering + Copy,
    E: Error,
{
    type Item = Result<String, JobError<C, E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.emitted < self.stats.records && self.cancellation.is_cancelled() {
            self.failed = true;
            self.observer.on_aborted();
            return Some(Err(SortError::Aborted));
        }

        match self.merger.next()? {
            Ok(record) => {
                self.emitted += 1;
                Some(Ok(record))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(SortError::from_read(err)))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::sync::Arc;

    use rand::distributions::Alphanumeric;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, SortError};
    use crate::buffer::LengthLimitedBufferBuilder;
    use crate::cancel::CancellationToken;
    use crate::format::RmpFormat;
    use crate::observer::testing::{Event, RecordingObserver};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn to_input(records: &[&str]) -> Vec<Result<String, io::Error>> {
        Vec::from_iter(records.iter().map(|record| Ok(record.to_string())))
    }

    fn build_sorter(tmp_path: &Path, chunk_size: usize, pipelined: bool) -> ExternalSorter {
        let builder: ExternalSorterBuilder = ExternalSorterBuilder::new();
        builder
            .with_chunk_size(chunk_size)
            .with_threads_number(2)
            .with_pipeline(pipelined)
            .with_tmp_dir(tmp_path)
            .build()
            .unwrap()
    }

    fn is_empty_dir(path: &Path) -> bool {
        fs::read_dir(path).unwrap().count() == 0
    }

    #[rstest]
    #[case(false, false)]
    #[case(true, false)]
    #[case(false, true)]
    #[case(true, true)]
    fn test_external_sorter(tmp_dir: tempfile::TempDir, #[case] reversed: bool, #[case] pipelined: bool) {
        let input_sorted = Vec::from_iter((0..100).map(|i| format!("{:03}", i)));

        let mut input_shuffled = input_sorted.clone();
        input_shuffled.shuffle(&mut rand::thread_rng());

        let input: Vec<Result<String, io::Error>> = Vec::from_iter(input_shuffled.into_iter().map(|item| Ok(item)));

        let sorter = build_sorter(tmp_dir.path(), 24, pipelined);

        let compare = if reversed {
            |a: &str, b: &str| a.cmp(b).reverse()
        } else {
            |a: &str, b: &str| a.cmp(b)
        };

        let result = sorter.sort_by(input, compare).unwrap();
        assert_eq!(result.runs(), 12);
        assert_eq!(result.records(), 100);

        let actual_result: Result<Vec<String>, _> = result.collect();
        let actual_result = actual_result.unwrap();
        let expected_result = if reversed {
            Vec::from_iter(input_sorted.into_iter().rev())
        } else {
            input_sorted
        };

        assert_eq!(actual_result, expected_result);
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    #[case(10, 2)]
    #[case(1, 4)]
    #[case(usize::MAX, 1)]
    fn test_chunk_granularity(tmp_dir: tempfile::TempDir, #[case] chunk_size: usize, #[case] expected_runs: usize) {
        let sorter = build_sorter(tmp_dir.path(), chunk_size, false);

        let result = sorter.sort(to_input(&["banana", "apple", "cherry", "date"])).unwrap();
        assert_eq!(result.runs(), expected_runs);

        let actual: Result<Vec<String>, _> = result.collect();
        assert_eq!(actual.unwrap(), vec!["apple", "banana", "cherry", "date"]);
    }

    #[rstest]
    fn test_duplicates_are_preserved(tmp_dir: tempfile::TempDir) {
        let sorter = build_sorter(tmp_dir.path(), 1, false);

        let actual: Result<Vec<String>, _> = sorter.sort(to_input(&["b", "a", "b", "a"])).unwrap().collect();
        assert_eq!(actual.unwrap(), vec!["a", "a", "b", "b"]);
    }

    #[rstest]
    #[case(vec![], 0)]
    #[case(vec!["single"], 1)]
    #[case(vec!["", "", ""], 1)]
    fn test_degenerate_inputs(tmp_dir: tempfile::TempDir, #[case] records: Vec<&str>, #[case] expected_runs: usize) {
        let sorter = build_sorter(tmp_dir.path(), 1, false);

        let result = sorter.sort(to_input(&records)).unwrap();
        assert_eq!(result.runs(), expected_runs);

        let actual: Result<Vec<String>, _> = result.collect();
        assert_eq!(actual.unwrap(), records);
    }

    #[rstest]
    #[case(1, false)]
    #[case(64, false)]
    #[case(64, true)]
    #[case(1000, true)]
    #[case(usize::MAX, false)]
    fn test_random_input(tmp_dir: tempfile::TempDir, #[case] chunk_size: usize, #[case] pipelined: bool) {
        let mut rng = rand::thread_rng();
        let input = Vec::from_iter((0..500).map(|_| {
            let len = rng.gen_range(0..12);
            // a narrow alphabet produces plenty of duplicates
            String::from_iter((0..len).map(|_| rng.gen_range(b'a'..=b'd') as char))
        }));

        let sorter = build_sorter(tmp_dir.path(), chunk_size, pipelined);

        let output: Vec<String> = sorter
            .sort(input.iter().cloned().map(Ok))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(output.len(), input.len());
        assert!(output.windows(2).all(|pair| pair[0] <= pair[1]));

        let mut expected = input.clone();
        expected.sort();
        assert_eq!(output, expected);

        let resorted: Vec<String> = sorter
            .sort(output.iter().cloned().map(Ok))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(resorted, output);
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    fn test_rmp_runs(tmp_dir: tempfile::TempDir) {
        let builder: ExternalSorterBuilder<io::Error, LengthLimitedBufferBuilder, RmpFormat> = ExternalSorterBuilder::new();
        let sorter = builder
            .with_chunk_size(4)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let actual: Result<Vec<String>, _> = sorter.sort(to_input(&["d", "c\nc", "b", "a"])).unwrap().collect();
        assert_eq!(actual.unwrap(), vec!["a", "b", "c\nc", "d"]);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_input_error_aborts(tmp_dir: tempfile::TempDir, #[case] pipelined: bool) {
        let sorter = build_sorter(tmp_dir.path(), 1, pipelined);

        let input = vec![
            Ok("b".to_string()),
            Ok("a".to_string()),
            Err(io::Error::new(io::ErrorKind::Other, "broken input")),
            Ok("c".to_string()),
        ];

        match sorter.sort(input) {
            Err(SortError::InputError(err)) => assert_eq!(err.to_string(), "broken input"),
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) => panic!("sorting should fail"),
        }
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    fn test_line_terminator_in_record_fails(tmp_dir: tempfile::TempDir) {
        let sorter = build_sorter(tmp_dir.path(), 1, true);

        let result = sorter.sort(to_input(&["a", "b\nc"]));
        assert!(matches!(result, Err(SortError::SerializationError(_))));
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    fn test_cancelled_before_split(tmp_dir: tempfile::TempDir) {
        let observer = Arc::new(RecordingObserver::default());
        let cancellation = CancellationToken::new();
        let builder: ExternalSorterBuilder = ExternalSorterBuilder::new();
        let sorter = builder
            .with_tmp_dir(tmp_dir.path())
            .with_observer(observer.clone())
            .with_cancellation(cancellation.clone())
            .build()
            .unwrap();

        cancellation.cancel();
        assert!(sorter.cancellation_token().is_cancelled());

        let result = sorter.sort(to_input(&["b", "a"]));
        assert!(matches!(result, Err(SortError::Aborted)));
        assert_eq!(observer.count(&Event::Aborted), 1);
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    fn test_cancelled_during_merge(tmp_dir: tempfile::TempDir) {
        let sorter = build_sorter(tmp_dir.path(), 1, false);

        let mut sorted = sorter.sort(to_input(&["c", "a", "b"])).unwrap();
        assert_eq!(sorted.next().unwrap().unwrap(), "a");

        sorter.cancellation_token().cancel();
        assert!(matches!(sorted.next(), Some(Err(SortError::Aborted))));
        assert!(sorted.next().is_none());

        drop(sorted);
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    fn test_observer_events(tmp_dir: tempfile::TempDir) {
        let observer = Arc::new(RecordingObserver::default());
        let builder: ExternalSorterBuilder = ExternalSorterBuilder::new();
        let sorter = builder
            .with_chunk_size(10)
            .with_threads_number(2)
            .with_tmp_dir(tmp_dir.path())
            .with_observer(observer.clone())
            .build()
            .unwrap();

        let mut output = Vec::new();
        let stats = sorter
            .sort(to_input(&["banana", "apple", "cherry", "date"]))
            .unwrap()
            .write_to(&mut output)
            .unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "apple\nbanana\ncherry\ndate\n");
        assert_eq!((stats.records, stats.runs), (4, 2));
        assert_eq!(
            observer.events(),
            vec![
                Event::ThreadPoolCreated(2),
                Event::TempDirCreated,
                Event::RunPersisted(2),
                Event::RunPersisted(2),
                Event::SplitFinished(2, 4),
                Event::MergeStarted(2),
                Event::RunReleased,
                Event::RunReleased,
                Event::SortFinished(4, 2),
            ]
        );
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_sort_file(tmp_dir: tempfile::TempDir, #[case] pipelined: bool) {
        let work_dir = tempfile::tempdir().unwrap();
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, "banana\napple\ncherry\ndate\n").unwrap();
        fs::write(&output, "stale content that is longer than the sorted output\n").unwrap();

        let sorter = build_sorter(tmp_dir.path(), 10, pipelined);
        let stats = sorter.sort_file(&input, &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "apple\nbanana\ncherry\ndate\n");
        assert_eq!(stats.records, 4);
        assert_eq!(stats.runs, 2);
        assert!(is_empty_dir(tmp_dir.path()));
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 2);
    }

    #[rstest]
    fn test_dropped_stream_releases_job(tmp_dir: tempfile::TempDir) {
        let observer = Arc::new(RecordingObserver::default());
        let builder: ExternalSorterBuilder = ExternalSorterBuilder::new();
        let sorter = builder
            .with_chunk_size(1)
            .with_tmp_dir(tmp_dir.path())
            .with_observer(observer.clone())
            .build()
            .unwrap();

        let mut sorted = sorter.sort(to_input(&["c", "a", "b"])).unwrap();
        assert_eq!(sorted.next().unwrap().unwrap(), "a");
        drop(sorted);

        assert!(is_empty_dir(tmp_dir.path()));
        assert_eq!(observer.count(&Event::RunReleased), 2);
        assert_eq!(observer.count(&Event::SortFinished(3, 2)), 1);
    }

    #[rstest]
    fn test_write_to_rejects_line_terminators(tmp_dir: tempfile::TempDir) {
        let sorter = build_sorter(tmp_dir.path(), 10, false);

        let mut output = Vec::new();
        let result = sorter.sort(to_input(&["a", "b\r"])).unwrap().write_to(&mut output);

        match result {
            Err(SortError::Output(err)) => assert_eq!(err.kind(), io::ErrorKind::InvalidData),
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) => panic!("writing should fail"),
        }
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    #[case(b"b\r\r\na\n", "\na\nb\n")]
    #[case(b"b\ra\r\nc", "a\nb\nc\n")]
    #[case(b"b\r\n\r\na\r\n", "\na\nb\n")]
    fn test_sorted_file_sorts_to_itself(tmp_dir: tempfile::TempDir, #[case] content: &[u8], #[case] expected: &str) {
        let work_dir = tempfile::tempdir().unwrap();
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        let resorted = work_dir.path().join("resorted.txt");
        fs::write(&input, content).unwrap();

        let sorter = build_sorter(tmp_dir.path(), 1, false);
        sorter.sort_file(&input, &output).unwrap();
        sorter.sort_file(&output, &resorted).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), expected);
        assert_eq!(fs::read_to_string(&resorted).unwrap(), expected);
    }

    #[cfg(unix)]
    #[rstest]
    fn test_sort_file_output_permissions(tmp_dir: tempfile::TempDir) {
        use std::os::unix::fs::PermissionsExt;

        let work_dir = tempfile::tempdir().unwrap();
        let input = work_dir.path().join("input.txt");
        let existing = work_dir.path().join("existing.txt");
        let created = work_dir.path().join("created.txt");
        let reference = work_dir.path().join("reference.txt");
        fs::write(&input, "b\na\n").unwrap();
        fs::write(&existing, "previous\n").unwrap();
        fs::set_permissions(&existing, fs::Permissions::from_mode(0o640)).unwrap();
        fs::File::create(&reference).unwrap();

        let sorter = build_sorter(tmp_dir.path(), 10, false);
        sorter.sort_file(&input, &existing).unwrap();
        sorter.sort_file(&input, &created).unwrap();

        let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&existing), 0o640);
        assert_eq!(mode(&created), mode(&reference));
        assert_eq!(fs::read_to_string(&existing).unwrap(), "a\nb\n");
    }

    #[rstest]
    fn test_sort_file_generated(tmp_dir: tempfile::TempDir) {
        let work_dir = tempfile::tempdir().unwrap();
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");

        let mut rng = rand::thread_rng();
        let mut lines = Vec::from_iter((0..2000).map(|_| {
            let len = rng.gen_range(1..40);
            String::from_iter((&mut rng).sample_iter(&Alphanumeric).take(len).map(char::from))
        }));
        fs::write(&input, lines.join("\n")).unwrap();

        let sorter = build_sorter(tmp_dir.path(), 1024, true);
        sorter.sort_file(&input, &output).unwrap();

        lines.sort();
        let actual = fs::read_to_string(&output).unwrap();
        assert_eq!(Vec::from_iter(actual.lines()), lines);
    }

    #[rstest]
    fn test_sort_empty_file(tmp_dir: tempfile::TempDir) {
        let work_dir = tempfile::tempdir().unwrap();
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, "").unwrap();

        let sorter = build_sorter(tmp_dir.path(), 10, false);
        let stats = sorter.sort_file(&input, &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "");
        assert_eq!((stats.records, stats.runs), (0, 0));
    }

    #[rstest]
    fn test_cancelled_sort_file_keeps_output(tmp_dir: tempfile::TempDir) {
        let work_dir = tempfile::tempdir().unwrap();
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, "b\na\n").unwrap();
        fs::write(&output, "previous\n").unwrap();

        let sorter = build_sorter(tmp_dir.path(), 10, false);
        sorter.cancellation_token().cancel();

        let result = sorter.sort_file(&input, &output);
        assert!(matches!(result, Err(SortError::Aborted)));
        assert_eq!(fs::read_to_string(&output).unwrap(), "previous\n");
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 2);
        assert!(is_empty_dir(tmp_dir.path()));
    }

    #[rstest]
    fn test_missing_input_file(tmp_dir: tempfile::TempDir) {
        let sorter = build_sorter(tmp_dir.path(), 10, false);

        let result = sorter.sort_file(&tmp_dir.path().join("missing.txt"), &tmp_dir.path().join("out.txt"));
        assert!(matches!(result, Err(SortError::InputError(_))));
    }
}
