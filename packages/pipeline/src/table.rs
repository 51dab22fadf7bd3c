//! Input and output tables.
//!
//! Input is CSV or Parquet, chosen by file extension, and needs at least
//! `id` and `address` columns; other columns are ignored. Parquet files
//! are read through an in-memory `DuckDB` connection. Output is CSV. Output has `id` followed by the geocode
//! columns and, when enrichment is on, the IRIS columns. Missing values
//! are written as empty cells.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use address_geocoder_models::{GEOCODE_COLUMNS, OutputRow, ZONE_COLUMNS};
use thiserror::Error;

use crate::input::InputRow;

/// Name of the identifier column.
pub const ID_COLUMN: &str = "id";
/// Name of the address column.
pub const ADDRESS_COLUMN: &str = "address";

/// Table read/write failures.
#[derive(Debug, Error)]
pub enum TableError {
    /// A required input column is absent from the header.
    #[error("input is missing the required '{0}' column")]
    MissingColumn(&'static str),

    /// The input is not valid CSV.
    #[error("failed to read input: {0}")]
    Read(csv::Error),

    /// The output sink rejected a write.
    #[error("failed to write output: {0}")]
    Write(csv::Error),

    /// The input file could not be opened.
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        /// Input path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The output file could not be created or moved into place.
    #[error("failed to write {}: {source}", .path.display())]
    Output {
        /// Output path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// `DuckDB` failed to read a Parquet input.
    #[error("failed to read Parquet input: {0}")]
    Parquet(#[from] duckdb::Error),

    /// Flushing the output sink failed.
    #[error("failed to flush output: {0}")]
    Flush(#[from] std::io::Error),
}

/// Supported input file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// Apache Parquet.
    Parquet,
}

impl InputFormat {
    /// Picks the format from the file extension. Anything that is not
    /// `.parquet` or `.pq` is read as CSV.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let is_parquet = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("parquet") || e.eq_ignore_ascii_case("pq"));
        if is_parquet { Self::Parquet } else { Self::Csv }
    }
}

/// Reads input rows from the file at `path`, in the format its extension
/// names.
///
/// # Errors
///
/// * [`TableError::Open`] if the file cannot be opened
/// * [`TableError::MissingColumn`] if `id` or `address` is absent
/// * [`TableError::Read`] or [`TableError::Parquet`] if the file is malformed
pub fn read_path(path: &Path) -> Result<Vec<InputRow>, TableError> {
    match InputFormat::from_path(path) {
        InputFormat::Csv => {
            let file = std::fs::File::open(path).map_err(|source| TableError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            read_rows(BufReader::new(file))
        }
        InputFormat::Parquet => {
            if !path.is_file() {
                return Err(TableError::Open {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            read_parquet_rows(path)
        }
    }
}

/// Reads input rows from a Parquet file.
///
/// Column names match case-insensitively and any column type is accepted;
/// values are cast to text. Nulls and empty strings become `None`.
///
/// # Errors
///
/// * [`TableError::MissingColumn`] if `id` or `address` is absent
/// * [`TableError::Parquet`] if `DuckDB` cannot read the file
pub fn read_parquet_rows(path: &Path) -> Result<Vec<InputRow>, TableError> {
    let conn = duckdb::Connection::open_in_memory()?;
    let source = format!(
        "read_parquet('{}')",
        path.to_string_lossy().replace('\'', "''")
    );

    let mut columns = Vec::new();
    {
        let mut stmt = conn.prepare(&format!("DESCRIBE SELECT * FROM {source}"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            columns.push(name);
        }
    }

    let column = |name: &'static str| {
        columns
            .iter()
            .find(|c| c.trim().eq_ignore_ascii_case(name))
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .ok_or(TableError::MissingColumn(name))
    };
    let id_col = column(ID_COLUMN)?;
    let address_col = column(ADDRESS_COLUMN)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT CAST({id_col} AS VARCHAR), CAST({address_col} AS VARCHAR) FROM {source}"
    ))?;
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id: Option<String> = row.get(0)?;
        let address: Option<String> = row.get(1)?;
        out.push(InputRow {
            line: out.len() as u64 + 1,
            id: id.filter(|v| !v.is_empty()),
            address: address.filter(|v| !v.is_empty()),
        });
    }

    log::debug!("Read {} rows from {}", out.len(), path.display());
    Ok(out)
}

/// Reads input rows from CSV.
///
/// Blank cells become `None`; validation happens later.
///
/// # Errors
///
/// * [`TableError::MissingColumn`] if `id` or `address` is absent
/// * [`TableError::Read`] if the CSV is malformed
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<InputRow>, TableError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(TableError::Read)?.clone();
    let position = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
            .ok_or(TableError::MissingColumn(name))
    };
    let id_col = position(ID_COLUMN)?;
    let address_col = position(ADDRESS_COLUMN)?;

    let mut rows = Vec::new();
    for (i, record) in csv_reader.records().enumerate() {
        let record = record.map_err(TableError::Read)?;
        let cell = |col: usize| {
            record
                .get(col)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        rows.push(InputRow {
            line: i as u64 + 1,
            id: cell(id_col),
            address: cell(address_col),
        });
    }

    Ok(rows)
}

/// Header of the output table.
#[must_use]
pub fn output_header(include_zones: bool) -> Vec<&'static str> {
    let mut header = vec![ID_COLUMN];
    header.extend_from_slice(GEOCODE_COLUMNS);
    if include_zones {
        header.extend_from_slice(ZONE_COLUMNS);
    }
    header
}

/// Writes `rows` as CSV.
///
/// # Errors
///
/// Returns [`TableError::Write`] or [`TableError::Flush`] if the sink
/// fails.
pub fn write_rows<W: Write>(
    writer: W,
    rows: &[OutputRow],
    include_zones: bool,
) -> Result<(), TableError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(output_header(include_zones))
        .map_err(TableError::Write)?;

    for row in rows {
        let mut values = Vec::with_capacity(1 + GEOCODE_COLUMNS.len() + ZONE_COLUMNS.len());
        values.push(row.id.clone());
        values.extend(row.enriched.result.column_values());
        if include_zones {
            match &row.enriched.zone {
                Some(zone) => values.extend(zone.column_values()),
                None => values.extend(std::iter::repeat_n(String::new(), ZONE_COLUMNS.len())),
            }
        }
        csv_writer.write_record(&values).map_err(TableError::Write)?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Writes `rows` as CSV to `path`.
///
/// The table is written to a hidden sibling file first and renamed over
/// `path` once complete, so an existing output is never left truncated.
///
/// # Errors
///
/// Returns [`TableError::Output`] if the file cannot be created or
/// renamed, or the errors of [`write_rows`].
pub fn write_path(path: &Path, rows: &[OutputRow], include_zones: bool) -> Result<(), TableError> {
    let tmp = temp_sibling(path);
    let output_err = |source| TableError::Output {
        path: path.to_path_buf(),
        source,
    };

    let written = std::fs::File::create(&tmp)
        .map_err(output_err)
        .and_then(|file| write_rows(BufWriter::new(file), rows, include_zones))
        .and_then(|()| std::fs::rename(&tmp, path).map_err(output_err));

    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

fn temp_sibling(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(format!(".{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    }
}
