//! Random test data generator.

use std::io;
use std::io::prelude::*;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Minimal length of a generated line (unless clipped at the end of the file).
pub const MIN_LINE_LEN: usize = 10;

/// Generates files of random alphanumeric lines.
#[derive(Clone, Debug)]
pub struct Generator {
    total_size: u64,
    max_line_len: usize,
}

impl Generator {
    /// Creates a generator.
    ///
    /// # Arguments
    /// * `total_size` - Total length of all generated lines, line terminators excluded
    /// * `max_line_len` - Maximum line length, must not be less than [`MIN_LINE_LEN`]
    pub fn new(total_size: u64, max_line_len: usize) -> io::Result<Self> {
        if max_line_len < MIN_LINE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("maximum line length must be at least {}", MIN_LINE_LEN),
            ));
        }

        return Ok(Generator {
            total_size,
            max_line_len,
        });
    }

    /// Writes newline-terminated random lines to the writer.
    /// Returns number of written lines.
    pub fn write_to<W: Write, R: Rng>(&self, writer: &mut W, rng: &mut R) -> io::Result<u64> {
        let mut written = 0;
        let mut lines = 0;
        let mut line = Vec::with_capacity(self.max_line_len + 1);

        while written < self.total_size {
            let remaining = self.total_size - written;
            let line_len = rng.gen_range(MIN_LINE_LEN..=self.max_line_len);
            let line_len = if (line_len as u64) < remaining { line_len } else { remaining as usize };

            line.clear();
            line.extend((&mut *rng).sample_iter(&Alphanumeric).take(line_len));
            line.push(b'\n');
            writer.write_all(&line)?;

            written += line_len as u64;
            lines += 1;
        }
        writer.flush()?;

        return Ok(lines);
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::*;

    use super::{Generator, MIN_LINE_LEN};

    #[rstest]
    #[case(0, 10)]
    #[case(5, 10)]
    #[case(1000, 10)]
    #[case(10_000, 80)]
    fn test_generator(#[case] total_size: u64, #[case] max_line_len: usize) {
        let generator = Generator::new(total_size, max_line_len).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let mut output = Vec::new();
        let lines = generator.write_to(&mut output, &mut rng).unwrap();

        let output = String::from_utf8(output).unwrap();
        let generated = Vec::from_iter(output.lines());

        assert_eq!(generated.len() as u64, lines);
        assert_eq!(generated.iter().map(|line| line.len() as u64).sum::<u64>(), total_size);
        assert!(generated.iter().all(|line| line.len() <= max_line_len));
        assert!(generated.iter().all(|line| line.chars().all(|c| c.is_ascii_alphanumeric())));
        if let Some((_, rest)) = generated.split_last() {
            assert!(rest.iter().all(|line| line.len() >= MIN_LINE_LEN));
        }
    }

    #[test]
    fn test_too_short_lines_rejected() {
        assert!(Generator::new(100, MIN_LINE_LEN - 1).is_err());
    }
}
