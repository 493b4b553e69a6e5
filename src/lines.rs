//! Input line splitting.

use std::io;
use std::io::prelude::*;

/// Iterator over the lines of a buffered reader.
///
/// A line is terminated by `\n`, `\r` or `\r\n`. Terminators are not included in the returned
/// lines. Unlike [`BufRead::lines`] a lone `\r` ends a line, so no record read by this iterator
/// ever contains a line terminator.
pub struct LineReader<R> {
    reader: R,
    skip_lf: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> Self {
        LineReader { reader, skip_lf: false }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut terminated = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                break;
            }

            // `\n` following a `\r` belongs to the previous terminator
            if self.skip_lf {
                self.skip_lf = false;
                if available[0] == b'\n' {
                    self.reader.consume(1);
                    continue;
                }
            }

            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    line.extend_from_slice(&available[..pos]);
                    self.skip_lf = available[pos] == b'\r';
                    self.reader.consume(pos + 1);
                    terminated = true;
                    break;
                }
                None => {
                    let len = available.len();
                    line.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }

        if !terminated && line.is_empty() {
            return Ok(None);
        }

        return String::from_utf8(line)
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err));
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}
