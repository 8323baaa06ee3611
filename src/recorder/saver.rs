//! Saver thread: drains the record buffer into the binary log

use super::buffer::RecordBuffer;
use super::binlog::BinaryLog;
use crate::stats::LinkStats;
use std::sync::Arc;

/// Saver loop - one append write per drained batch
///
/// Runs until the buffer is stopped. Write failures are logged and counted;
/// the loop keeps going so a transient disk problem does not end recording.
pub(crate) fn saver_loop(
    buffer: Arc<RecordBuffer>,
    mut sink: BinaryLog,
    stats: Arc<LinkStats>,
) {
    log::info!(
        "Saver thread started, writing to {} every {} records",
        sink.path().display(),
        buffer.threshold()
    );

    while let Some(batch) = buffer.wait_batch() {
        match sink.append(&batch) {
            Ok(written) => {
                LinkStats::add(&stats.records_written, written as u64);
                log::debug!("Saved {} records to {}", written, sink.path().display());
            }
            Err(e) => {
                LinkStats::bump(&stats.write_failures);
                log::error!("Dropped batch of {} records: {}", batch.len(), e);
            }
        }
    }

    let unflushed = buffer.len();
    if unflushed > 0 {
        log::warn!("Saver stopping with {} records not written", unflushed);
    }
    log::info!("Saver thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ByteOrder;
    use crate::recorder::binlog::read_records;
    use crate::recorder::Record;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_threshold_flush_writes_batch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rec.bin");
        let buffer = Arc::new(RecordBuffer::new(100));
        buffer.resume();
        let stats = Arc::new(LinkStats::new());

        let saver = {
            let log = BinaryLog::new(&path, ByteOrder::Little).with_values_per_record(2);
            let (buffer, stats) = (Arc::clone(&buffer), Arc::clone(&stats));
            thread::spawn(move || saver_loop(buffer, log, stats))
        };

        for i in 0..100 {
            buffer.push_record(Record {
                timestamp_us: i,
                values: vec![i as f64, -(i as f64)],
            });
        }
        wait_until(|| stats.snapshot().records_written == 100);

        assert!(buffer.is_empty());
        let records = read_records(&path, 2, ByteOrder::Little).unwrap();
        assert_eq!(records.len(), 100);
        assert_eq!(records[0].timestamp_us, 0);
        assert_eq!(records[99].values, vec![99.0, -99.0]);

        buffer.stop();
        saver.join().unwrap();
    }

    #[test]
    fn test_stop_leaves_tail_unwritten() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rec.bin");
        let buffer = Arc::new(RecordBuffer::new(10));
        buffer.resume();
        let stats = Arc::new(LinkStats::new());

        let saver = {
            let log = BinaryLog::new(&path, ByteOrder::Little);
            let (buffer, stats) = (Arc::clone(&buffer), Arc::clone(&stats));
            thread::spawn(move || saver_loop(buffer, log, stats))
        };

        for _ in 0..3 {
            buffer.push(vec![1.0]);
        }
        buffer.stop();
        saver.join().unwrap();

        assert_eq!(buffer.len(), 3);
        assert!(!path.exists());
        assert_eq!(stats.snapshot().records_written, 0);
    }

    #[test]
    fn test_write_failure_keeps_saver_alive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocked");
        std::fs::create_dir(&path).unwrap();
        let buffer = Arc::new(RecordBuffer::new(1));
        buffer.resume();
        let stats = Arc::new(LinkStats::new());

        let saver = {
            let log = BinaryLog::new(&path, ByteOrder::Little);
            let (buffer, stats) = (Arc::clone(&buffer), Arc::clone(&stats));
            thread::spawn(move || saver_loop(buffer, log, stats))
        };

        buffer.push(vec![1.0]);
        wait_until(|| stats.snapshot().write_failures == 1);
        buffer.push(vec![2.0]);
        wait_until(|| stats.snapshot().write_failures == 2);

        assert!(!saver.is_finished());
        buffer.stop();
        saver.join().unwrap();
    }
}
