//! Persisted sorted runs and sequential cursors over them.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;

use tempfile;

use crate::format::RunFormat;

/// Run level error.
#[derive(Debug)]
pub enum RunError<E: Error> {
    /// Run file I/O error.
    IO(io::Error),
    /// Record encoding or decoding error.
    Format(E),
}

impl<E: Error + 'static> Error for RunError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            RunError::IO(err) => err,
            RunError::Format(err) => err,
        })
    }
}

impl<E: Error> Display for RunError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunError::IO(err) => write!(f, "run file I/O error: {}", err),
            RunError::Format(err) => write!(f, "run record format error: {}", err),
        }
    }
}

impl<E: Error> From<io::Error> for RunError<E> {
    fn from(err: io::Error) -> Self {
        RunError::IO(err)
    }
}

/// An immutable sorted run stored in a temporary file.
///
/// The run owns its file: dropping the run deletes it.
pub struct Run<C: RunFormat> {
    file: tempfile::NamedTempFile,
    records: usize,
    bytes: u64,

    format: PhantomData<C>,
}

impl<C: RunFormat> Run<C> {
    pub(crate) fn new(file: tempfile::NamedTempFile, records: usize, bytes: u64) -> Self {
        Run {
            file,
            records,
            bytes,
            format: PhantomData,
        }
    }

    /// Returns run file path.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Returns number of records in the run.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Returns run file size in bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Deletes the run file reporting a failure if any.
    pub fn close(self) -> io::Result<()> {
        self.file.close()
    }
}

impl<C: RunFormat> Debug for Run<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("path", &self.path())
            .field("records", &self.records)
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Forward-only cursor over a sorted sequence of records.
pub trait RecordCursor {
    type Error: Error;

    /// Returns the current record or [`None`] if the cursor is exhausted.
    fn peek(&self) -> Option<&str>;

    /// Consumes the current record and moves to the next one.
    /// Returns the consumed record or [`None`] if the cursor is already exhausted.
    fn advance(&mut self) -> Result<Option<String>, Self::Error>;

    /// Releases resources held by the cursor.
    fn close(self) -> io::Result<()>;
}

/// Sequential reader of a single run.
///
/// A freshly opened reader already holds the first record of the run (if any).
pub struct RunReader<C: RunFormat> {
    reader: io::Take<io::BufReader<fs::File>>,
    current: Option<String>,
    run: Run<C>,
}

impl<C: RunFormat> RunReader<C> {
    /// Opens a run for reading and loads its first record.
    ///
    /// # Arguments
    /// * `run` - Run to be read, the reader takes ownership of it
    /// * `buf_size` - Read buffer size
    pub fn open(run: Run<C>, buf_size: Option<usize>) -> Result<Self, RunError<C::DecodeError>> {
        let file = run.file.reopen()?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        let mut reader = RunReader {
            reader: reader.take(run.bytes),
            current: None,
            run,
        };
        reader.current = reader.read_next()?;

        return Ok(reader);
    }

    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    fn read_next(&mut self) -> Result<Option<String>, RunError<C::DecodeError>> {
        C::read_record(&mut self.reader).map_err(RunError::Format)
    }
}

impl<C: RunFormat> RecordCursor for RunReader<C> {
    type Error = RunError<C::DecodeError>;

    fn peek(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn advance(&mut self) -> Result<Option<String>, Self::Error> {
        let record = match self.current.take() {
            Some(record) => record,
            None => return Ok(None),
        };
        self.current = self.read_next()?;

        return Ok(Some(record));
    }

    fn close(self) -> io::Result<()> {
        let RunReader { reader, run, .. } = self;
        drop(reader);
        run.close()
    }
}
