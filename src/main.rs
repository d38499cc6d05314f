use csv_core::{ReadFieldResult, ReaderBuilder};
use pyro_profiler::{ColumnLayoutRelation, Configuration, Profiler};
use std::error::Error;
use std::io;
use std::str;
use tracing_subscriber::EnvFilter;

/// Reads a tab-separated table from `input`. The first record names the columns; empty
/// fields are nulls.
fn load_data<I: io::Read>(
    mut input: I,
    name: &str,
    null_equals_null: bool,
) -> Result<ColumnLayoutRelation, Box<dyn Error>> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 4096];
    let mut fieldlen = 0;
    let mut record: Vec<Option<String>> = Vec::new();
    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').build();

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = tsv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("field too long on line {}", tsv.line()),
                    )
                    .into());
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen])
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    fieldlen = 0;
                    record.push(if field.is_empty() {
                        None
                    } else {
                        Some(field.to_owned())
                    });

                    if record_end {
                        let fields = std::mem::take(&mut record);
                        if headers.is_some() {
                            rows.push(fields);
                        } else {
                            headers = Some(
                                fields
                                    .into_iter()
                                    .enumerate()
                                    .map(|(i, f)| f.unwrap_or_else(|| format!("column{}", i)))
                                    .collect(),
                            );
                        }
                    }
                }
                ReadFieldResult::End => {
                    let headers = headers.unwrap_or_default();
                    return Ok(ColumnLayoutRelation::from_rows(
                        name,
                        headers,
                        rows,
                        null_equals_null,
                    )?);
                }
            }
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = Configuration::default();
    if let Some(max_error) = args.next() {
        let max_error = max_error.parse()?;
        config.max_ucc_error = max_error;
        config.max_fd_error = max_error;
    }
    if let Some(seed) = args.next() {
        config.seed = seed.parse()?;
    }
    if let Some(max_lhs) = args.next() {
        config.max_lhs = max_lhs.parse()?;
    }

    // Fail on a bad configuration before reading any input.
    config.clone().validate()?;

    let relation = load_data(io::stdin().lock(), "stdin", config.is_null_equal_null)?;
    println!(
        "data: {} columns, {} rows",
        relation.num_columns(),
        relation.num_rows()
    );

    let result = Profiler::new(config).execute(&relation)?;
    let schema = relation.schema();
    let mut lines: Vec<String> = result
        .keys
        .iter()
        .map(|key| key.describe(schema))
        .chain(result.fds.iter().map(|fd| fd.describe(schema)))
        .collect();
    lines.sort_unstable();
    for line in lines {
        println!("{}", line);
    }

    let diagnostics = result.diagnostics;
    println!();
    println!("  init time: {} ms", diagnostics.init_time.as_millis());
    println!("  search time: {} ms", diagnostics.search_time.as_millis());
    println!(
        "  ascension time: {} ms",
        diagnostics.ascension_time.as_millis()
    );
    println!(
        "  trickle-down time: {} ms",
        diagnostics.trickle_time.as_millis()
    );
    println!(
        "  error calculations: {}",
        diagnostics.error_calculations
    );
    println!("  intersections: {}", diagnostics.intersections);
    println!(
        "  {} keys, {} FDs, checksum {:04x}",
        diagnostics.num_keys, diagnostics.num_fds, diagnostics.checksum
    );

    Ok(())
}
