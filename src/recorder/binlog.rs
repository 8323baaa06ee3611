//! Headerless binary log of fixed-width records
//!
//! Record layout (all fields 8 bytes, session byte order):
//!
//! ```text
//! ┌────────────────────┬──────────┬─────┬──────────┐
//! │ timestamp_us (f64) │ value 0  │ ... │ value N-1│
//! └────────────────────┴──────────┴─────┴──────────┘
//! ```
//!
//! The timestamp is stored as a double so a record reads as N+1 doubles.
//! There are no delimiters or headers: a reader must already know N.

use super::buffer::Record;
use crate::error::{Error, Result};
use crate::protocol::ByteOrder;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Bytes per record field
pub const FIELD_SIZE: usize = 8;

/// Size of one record holding `values` numbers
pub fn record_size(values: usize) -> usize {
    (values + 1) * FIELD_SIZE
}

/// Append-only binary log writer
#[derive(Debug, Clone)]
pub struct BinaryLog {
    path: PathBuf,
    byte_order: ByteOrder,
    /// N, fixed by the first record written unless set up front
    values_per_record: Option<usize>,
}

impl BinaryLog {
    pub fn new(path: impl AsRef<Path>, byte_order: ByteOrder) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            byte_order,
            values_per_record: None,
        }
    }

    /// Log at `{dir}/{base}_{YYYY-MM-DD}{extension}` for today's local date
    pub fn dated(
        dir: impl AsRef<Path>,
        base: &str,
        extension: &str,
        byte_order: ByteOrder,
    ) -> Self {
        let date = chrono::Local::now().format("%Y-%m-%d");
        let name = format!("{}_{}{}", base, date, extension);
        Self::new(dir.as_ref().join(name), byte_order)
    }

    /// Fix the number of values per record
    pub fn with_values_per_record(mut self, values: usize) -> Self {
        self.values_per_record = Some(values);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn values_per_record(&self) -> Option<usize> {
        self.values_per_record
    }

    /// Pack records and append them with a single write
    ///
    /// Records whose length differs from N are skipped. Returns the number
    /// of records written.
    pub fn append(&mut self, records: &[Record]) -> Result<usize> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let n = *self.values_per_record.get_or_insert(first.values.len());

        let mut packed = Vec::with_capacity(records.len() * record_size(n));
        let mut written = 0;
        for record in records {
            if record.values.len() != n {
                log::warn!(
                    "Skipping record with {} values (log holds {})",
                    record.values.len(),
                    n
                );
                continue;
            }
            let timestamp = record.timestamp_us as f64;
            packed.extend_from_slice(&self.byte_order.f64_to_bytes(timestamp));
            for &value in &record.values {
                packed.extend_from_slice(&self.byte_order.f64_to_bytes(value));
            }
            written += 1;
        }

        self.write_all(&packed)?;
        Ok(written)
    }

    /// Truncate the log to zero length
    pub fn clear(&self) -> Result<()> {
        self.ensure_dir()?;
        File::create(&self.path).map_err(|source| self.write_error(source))?;
        log::info!("Cleared log {}", self.path.display());
        Ok(())
    }

    /// Read every complete record back
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let n = self.values_per_record.ok_or_else(|| {
            Error::Other("record width unknown until the first write".to_string())
        })?;
        read_records(&self.path, n, self.byte_order)
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        self.ensure_dir()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.write_error(source))?;
        file.write_all(bytes)
            .map_err(|source| self.write_error(source))
    }

    fn ensure_dir(&self) -> Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                fs::create_dir_all(dir).map_err(|source| self.write_error(source))
            }
            _ => Ok(()),
        }
    }

    fn write_error(&self, source: std::io::Error) -> Error {
        Error::LogWrite {
            path: self.path.clone(),
            source,
        }
    }
}

/// Parse a log file holding `values` numbers per record
///
/// A trailing partial record (interrupted write) is ignored.
pub fn read_records(
    path: impl AsRef<Path>,
    values: usize,
    byte_order: ByteOrder,
) -> Result<Vec<Record>> {
    let mut bytes = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut bytes)?;

    let size = record_size(values);
    let trailing = bytes.len() % size;
    if trailing != 0 {
        log::warn!(
            "{}: ignoring {} trailing bytes",
            path.as_ref().display(),
            trailing
        );
    }

    let field = |chunk: &[u8]| {
        let mut buf = [0u8; FIELD_SIZE];
        buf.copy_from_slice(chunk);
        byte_order.f64_from_bytes(buf)
    };

    Ok(bytes
        .chunks_exact(size)
        .map(|chunk| {
            let mut fields = chunk.chunks_exact(FIELD_SIZE).map(field);
            let timestamp_us = fields.next().unwrap_or_default() as i64;
            Record {
                timestamp_us,
                values: fields.collect(),
            }
        })
        .collect())
}
