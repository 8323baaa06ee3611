//! Link counters shared by the receiver and saver threads

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from the worker threads
#[derive(Debug, Default)]
pub struct LinkStats {
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub checksum_errors: AtomicU64,
    pub size_errors: AtomicU64,
    pub transport_errors: AtomicU64,
    pub records_written: AtomicU64,
    pub write_failures: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub checksum_errors: u64,
    pub size_errors: u64,
    pub transport_errors: u64,
    pub records_written: u64,
    pub write_failures: u64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            size_errors: self.size_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rx={} tx={} tx_err={} checksum_err={} size_err={} io_err={} logged={} log_fail={}",
            self.frames_received,
            self.frames_sent,
            self.send_errors,
            self.checksum_errors,
            self.size_errors,
            self.transport_errors,
            self.records_written,
            self.write_failures
        )
    }
}
