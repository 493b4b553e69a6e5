use std::fs;
use std::io;
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use log;

use ext_line_sort::cli::{init_logger, LogLevel};
use ext_line_sort::generator::{Generator, MIN_LINE_LEN};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let file_size = arg_parser.value_of("file_size").expect("value is required");
    let file_size = file_size.parse::<ByteSize>().expect("value is pre-validated").as_u64();
    let max_line_len: usize = arg_parser.value_of_t_or_exit("max_line_len");
    let output = arg_parser.value_of("output").expect("value is required");

    let generator = match Generator::new(file_size, max_line_len) {
        Ok(generator) => generator,
        Err(err) => {
            log::error!("generator initialization error: {}", err);
            process::exit(1);
        }
    };

    let mut output_stream = match fs::File::create(output) {
        Ok(file) => io::BufWriter::new(file),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    log::info!("generating random-line file of {} to {}", ByteSize::b(file_size), output);
    let started = Instant::now();

    match generator.write_to(&mut output_stream, &mut rand::thread_rng()) {
        Ok(lines) => log::info!(
            "generation completed in {}ms (lines: {})",
            started.elapsed().as_millis(),
            lines
        ),
        Err(err) => {
            log::error!("data saving error: {}", err);
            process::exit(1);
        }
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-line-gen")
        .about("random text file generator")
        .arg(
            clap::Arg::new("file_size")
                .short('f')
                .long("file-size")
                .help("total length of generated lines")
                .required(true)
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("File size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("max_line_len")
                .short('m')
                .long("max-line-length")
                .help("maximum line length")
                .required(true)
                .takes_value(true)
                .validator(|v| match v.parse::<usize>() {
                    Ok(len) if len >= MIN_LINE_LEN => Ok(()),
                    Ok(_) => Err(format!("Maximum line length must be at least {}", MIN_LINE_LEN)),
                    Err(err) => Err(format!("Maximum line length format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("output file")
                .required(true)
                .takes_value(true),
        )
        .arg(LogLevel::arg())
        .get_matches()
}
