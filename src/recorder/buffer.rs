//! Threshold-signalled record queue between receiver and saver

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// One timestamped inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Microseconds since the Unix epoch
    pub timestamp_us: i64,
    pub values: Vec<f64>,
}

impl Record {
    /// Stamp values with the current wall-clock time
    pub fn now(values: Vec<f64>) -> Self {
        Self {
            timestamp_us: chrono::Utc::now().timestamp_micros(),
            values,
        }
    }
}

struct BufferState {
    entries: VecDeque<Record>,
    running: bool,
}

/// FIFO of records drained in batches by the saver thread
///
/// Both the queue and the running flag are mutated only under the lock, and
/// the condition variable is notified after the lock is released. The buffer
/// starts stopped: records are only accepted between [`resume`](Self::resume)
/// and [`stop`](Self::stop), so the queue never grows without a saver.
pub struct RecordBuffer {
    state: Mutex<BufferState>,
    ready: Condvar,
    threshold: usize,
}

impl RecordBuffer {
    /// Create a buffer that wakes the saver every `threshold` records
    pub fn new(threshold: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                entries: VecDeque::with_capacity(threshold),
                running: false,
            }),
            ready: Condvar::new(),
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Append values stamped with the current time
    pub fn push(&self, values: Vec<f64>) -> bool {
        self.push_record(Record::now(values))
    }

    /// Append a record; wakes the saver once the threshold is reached
    ///
    /// Returns `false` and drops the record when no saver is running.
    pub fn push_record(&self, record: Record) -> bool {
        let ready = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            state.entries.push_back(record);
            state.entries.len() >= self.threshold
        };

        if ready {
            self.ready.notify_one();
        }
        true
    }

    /// Block until a full batch is queued, then drain the whole queue
    ///
    /// Returns `None` once [`stop`](Self::stop) has been called. Entries still
    /// queued at that point stay in the buffer and are not returned.
    pub fn wait_batch(&self) -> Option<Vec<Record>> {
        let mut state = self.state.lock();
        while state.entries.len() < self.threshold && state.running {
            self.ready.wait(&mut state);
        }
        if !state.running {
            return None;
        }
        Some(state.entries.drain(..).collect())
    }

    /// Wake the saver unconditionally and make it exit
    pub fn stop(&self) {
        self.state.lock().running = false;
        self.ready.notify_all();
    }

    /// Accept records again and let a saver wait on the buffer
    pub fn resume(&self) {
        self.state.lock().running = true;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn record(ts: i64) -> Record {
        Record {
            timestamp_us: ts,
            values: vec![ts as f64],
        }
    }

    fn running_buffer(threshold: usize) -> RecordBuffer {
        let buffer = RecordBuffer::new(threshold);
        buffer.resume();
        buffer
    }

    #[test]
    fn test_batch_released_at_threshold_in_order() {
        let buffer = Arc::new(running_buffer(3));
        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.wait_batch())
        };

        for ts in 1..=3 {
            buffer.push_record(record(ts));
        }

        let batch = consumer.join().unwrap().unwrap();
        let stamps: Vec<i64> = batch.iter().map(|r| r.timestamp_us).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_takes_everything_queued() {
        let buffer = running_buffer(2);
        for ts in 0..5 {
            buffer.push_record(record(ts));
        }
        let batch = buffer.wait_batch().unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_stop_wakes_waiter_and_keeps_tail() {
        let buffer = Arc::new(running_buffer(10));
        buffer.push_record(record(1));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.wait_batch())
        };
        thread::sleep(Duration::from_millis(20));
        buffer.stop();

        assert_eq!(consumer.join().unwrap(), None);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_resume_after_stop() {
        let buffer = running_buffer(1);
        buffer.stop();
        assert_eq!(buffer.wait_batch(), None);

        buffer.resume();
        assert!(buffer.push_record(record(9)));
        assert_eq!(buffer.wait_batch().unwrap().len(), 1);
    }

    #[test]
    fn test_records_dropped_without_saver() {
        let buffer = RecordBuffer::new(10);
        assert!(!buffer.is_running());
        for ts in 0..1000 {
            assert!(!buffer.push_record(record(ts)));
        }
        assert!(buffer.is_empty());

        // Stopping keeps the tail but accepts nothing further
        buffer.resume();
        for ts in 0..3 {
            buffer.push_record(record(ts));
        }
        buffer.stop();
        for ts in 0..1000 {
            buffer.push_record(record(ts));
        }
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let buffer = RecordBuffer::new(0);
        assert_eq!(buffer.threshold(), 1);
    }

    #[test]
    fn test_push_stamps_current_time() {
        let before = chrono::Utc::now().timestamp_micros();
        let buffer = running_buffer(1);
        assert!(buffer.push(vec![0.5]));
        let batch = buffer.wait_batch().unwrap();
        assert!(batch[0].timestamp_us >= before);
        assert_eq!(batch[0].values, vec![0.5]);
    }
}
