//! Receiver thread: socket → decode → cache + record buffer

use crate::cache::LatestValue;
use crate::error::Error;
use crate::protocol::FrameCodec;
use crate::recorder::{Record, RecordBuffer};
use crate::stats::LinkStats;
use crate::transport::FrameReceiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep while backing off, so a stop request is seen promptly
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Exponential backoff after consecutive transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub initial: Duration,
    /// Upper bound on the delay
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before the next attempt after `failures` errors in a row
    pub fn delay(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << shift).min(self.max)
    }
}

/// Destinations for decoded frames
pub(crate) struct Sinks {
    pub cache: Arc<LatestValue>,
    /// `None` when recording is disabled
    pub records: Option<Arc<RecordBuffer>>,
    pub stats: Arc<LinkStats>,
}

/// Receiver loop - runs until `running` is cleared
///
/// Each complete frame is decoded; valid values overwrite the cache and a
/// timestamped copy is queued for the saver. Corrupt frames are dropped and
/// counted without delay. Transport errors back off per `retry`. Read
/// timeouts only exist so the stop flag gets checked.
pub(crate) fn receiver_loop(
    mut rx: FrameReceiver,
    codec: FrameCodec,
    sinks: Sinks,
    running: Arc<AtomicBool>,
    retry: RetryPolicy,
) {
    log::info!(
        "Receiver thread started, expecting {}-byte frames",
        rx.frame_size()
    );
    let mut failures: u32 = 0;

    while running.load(Ordering::Relaxed) {
        match rx.recv_frame() {
            Ok(None) => {}
            Ok(Some(frame)) => {
                failures = 0;
                match codec.try_decode(frame) {
                    Ok(values) => {
                        LinkStats::bump(&sinks.stats.frames_received);
                        if let Some(records) = &sinks.records {
                            records.push_record(Record::now(values.clone()));
                        }
                        sinks.cache.put(values);
                    }
                    Err(e @ Error::Checksum { .. }) => {
                        LinkStats::bump(&sinks.stats.checksum_errors);
                        log::warn!("Dropping inbound frame: {}", e);
                    }
                    Err(e) => {
                        LinkStats::bump(&sinks.stats.size_errors);
                        log::warn!("Dropping inbound frame: {}", e);
                    }
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                LinkStats::bump(&sinks.stats.transport_errors);
                let delay = retry.delay(failures);
                log::error!(
                    "Receive error ({} in a row): {}, retrying in {:?}",
                    failures,
                    e,
                    delay
                );
                sleep_while_running(delay, &running);
            }
        }
    }

    log::info!("Receiver thread exiting");
}

fn sleep_while_running(delay: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + delay;
    loop {
        let now = Instant::now();
        if now >= deadline || !running.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep((deadline - now).min(BACKOFF_SLICE));
    }
}
