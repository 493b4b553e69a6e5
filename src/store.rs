//! Temporary storage of sorted runs.

use std::io;
use std::io::prelude::*;
use std::path::Path;

use tempfile;

use crate::format::RunFormat;
use crate::run::{Run, RunError, RunReader};

/// Owns a private temporary directory holding the runs of a single sorting job.
///
/// Every run file is deleted as soon as its [`Run`] handle is closed or dropped; the directory
/// itself is removed when the store is closed or dropped, whichever path the job takes.
pub struct RunStore {
    dir: tempfile::TempDir,
    rw_buf_size: Option<usize>,
}

impl RunStore {
    /// Creates a new run store.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory the store directory is created in. If the parameter is [`None`]
    ///   default OS temporary directory will be used.
    /// * `rw_buf_size` - Run files read/write buffer size.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ext-line-sort-");

        let dir = match tmp_path {
            Some(tmp_path) => builder.tempdir_in(tmp_path),
            None => builder.tempdir(),
        }?;

        return Ok(RunStore { dir, rw_buf_size });
    }

    /// Returns store directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes records to a new run file. Records are expected to be already sorted.
    ///
    /// On failure the partially written file is deleted.
    pub fn persist<C: RunFormat>(
        &self,
        records: impl IntoIterator<Item = String>,
    ) -> Result<Run<C>, RunError<C::EncodeError>> {
        let tmp_file = tempfile::Builder::new()
            .prefix("run-")
            .suffix(".tmp")
            .tempfile_in(self.dir.path())?;

        let mut run_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file.as_file().try_clone()?),
            None => io::BufWriter::new(tmp_file.as_file().try_clone()?),
        };

        let mut count = 0;
        for record in records.into_iter() {
            C::write_record(&mut run_writer, &record).map_err(RunError::Format)?;
            count += 1;
        }
        run_writer.flush()?;
        drop(run_writer);

        let bytes = tmp_file.as_file().metadata()?.len();

        return Ok(Run::new(tmp_file, count, bytes));
    }

    /// Opens a run for sequential reading using the store read buffer size.
    pub fn open<C: RunFormat>(&self, run: Run<C>) -> Result<RunReader<C>, RunError<C::DecodeError>> {
        RunReader::open(run, self.rw_buf_size)
    }

    /// Removes the store directory reporting a failure if any.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}
