//! Run file formats.

use std::error::Error;
use std::fs;
use std::io;
use std::io::prelude::*;

/// Run record encoding. Describes how records are written to a run file and read back from it.
pub trait RunFormat: Send + Sync + 'static {
    /// Record encoding error.
    type EncodeError: Error + Send + 'static;
    /// Record decoding error.
    type DecodeError: Error + Send + 'static;

    /// Writes a single record to a run file.
    fn write_record(writer: &mut io::BufWriter<fs::File>, record: &str) -> Result<(), Self::EncodeError>;

    /// Reads the next record from a run file. Returns [`None`] once the run is exhausted.
    ///
    /// The reader is limited to the run's persisted length.
    fn read_record(reader: &mut io::Take<io::BufReader<fs::File>>) -> Result<Option<String>, Self::DecodeError>;
}

/// Newline-delimited UTF-8 text, one record per line.
pub struct LineFormat;

impl RunFormat for LineFormat {
    type EncodeError = io::Error;
    type DecodeError = io::Error;

    fn write_record(writer: &mut io::BufWriter<fs::File>, record: &str) -> Result<(), Self::EncodeError> {
        if record.contains('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "record contains a line terminator",
            ));
        }
        writer.write_all(record.as_bytes())?;
        writer.write_all(b"\n")?;

        return Ok(());
    }

    fn read_record(reader: &mut io::Take<io::BufReader<fs::File>>) -> Result<Option<String>, Self::DecodeError> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }

        return Ok(Some(line));
    }
}

/// RMP (Rust MessagePack) run format.
/// Every record is stored as a MessagePack string.
/// For more information see https://msgpack.org/.
pub struct RmpFormat;

impl RunFormat for RmpFormat {
    type EncodeError = rmp_serde::encode::Error;
    type DecodeError = rmp_serde::decode::Error;

    fn write_record(writer: &mut io::BufWriter<fs::File>, record: &str) -> Result<(), Self::EncodeError> {
        rmp_serde::encode::write(writer, &record)
    }

    fn read_record(reader: &mut io::Take<io::BufReader<fs::File>>) -> Result<Option<String>, Self::DecodeError> {
        if reader.limit() == 0 {
            Ok(None)
        } else {
            rmp_serde::decode::from_read(reader).map(Some)
        }
    }
}
