//! Asynchronous recording of inbound frames
//!
//! The receiver pushes timestamped records into a [`RecordBuffer`]; a saver
//! thread wakes every `threshold` records and appends the whole queue to a
//! [`BinaryLog`] with one write. Records still queued when the saver is
//! stopped are not written, and nothing is queued while no saver runs.

pub mod buffer;
pub mod binlog;
mod saver;

pub use buffer::{Record, RecordBuffer};
pub use binlog::{BinaryLog, read_records, record_size};

pub(crate) use saver::saver_loop;

/// Default number of records per saver wake-up
pub const DEFAULT_THRESHOLD: usize = 100;
