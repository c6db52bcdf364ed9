//! Ingest worker.
//!
//! Pulls frames from the configured [`FrameSource`] and pushes them into the
//! shared bounded queue with a put timeout, so a stalled consumer back-
//! pressures the producer instead of dropping frames. File replay is paced
//! with a configurable delay between enqueues to model live arrival rates —
//! the metric engine's timing behaviour depends on it.

use anyhow::Result;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::frame::Frame;
use crate::source::{FrameSource, SourceConfig};

/// Seconds between enqueues during file replay when nothing is configured.
pub const DEFAULT_REPLAY_DELAY: f64 = 0.2;

/// How long a queue put may block before the producer logs and retries.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait before retrying a full queue on the live path; the radio keeps its
/// own socket buffer meanwhile.
const FULL_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Downstream decoder workers need a moment to come up. Losing the first
/// frame to a cold consumer is acceptable; racing one is not.
const COLD_START: Duration = Duration::from_secs(2);

pub struct IngestWorker {
    id: String,
    config: SourceConfig,
    /// Replay pacing; `None` means unspecified and falls back to
    /// [`DEFAULT_REPLAY_DELAY`] with a warning. Ignored for live capture.
    replay_delay: Option<f64>,
    tx: Sender<Frame>,
    /// Kept for the shutdown drain: consumers blocked on a full queue are
    /// unblocked by emptying it.
    rx: Receiver<Frame>,
    cancel: Arc<AtomicBool>,
}

impl IngestWorker {
    pub fn new(
        id: impl Into<String>,
        config: SourceConfig,
        replay_delay: Option<f64>,
        tx: Sender<Frame>,
        rx: Receiver<Frame>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self { id: id.into(), config, replay_delay, tx, rx, cancel }
    }

    /// Main worker loop. Returns when the source ends, the consumers vanish,
    /// or shutdown is requested.
    pub fn run(self) -> Result<()> {
        thread::sleep(COLD_START);
        debug!("{}: worker started", self.id);

        let delay = match &self.config {
            SourceConfig::Live { .. } => None,
            SourceConfig::File { .. } => Some(self.replay_delay.unwrap_or_else(|| {
                warn!(
                    "{}: no replay delay configured, using default {}s",
                    self.id, DEFAULT_REPLAY_DELAY
                );
                DEFAULT_REPLAY_DELAY
            })),
        };

        let mut source = FrameSource::open(&self.config, self.cancel.clone())?;
        let live = source.is_live();

        'produce: while !self.cancel.load(Relaxed) {
            let Some(frame) = source.next() else {
                info!("{}: capture terminated", self.id);
                break;
            };

            let mut frame = frame;
            loop {
                if self.cancel.load(Relaxed) {
                    break 'produce;
                }
                match self.tx.send_timeout(frame, ENQUEUE_TIMEOUT) {
                    Ok(()) => {
                        trace!(
                            "{}: produced frame, queue depth is now {}",
                            self.id,
                            self.tx.len()
                        );
                        break;
                    }
                    Err(SendTimeoutError::Timeout(returned)) => {
                        warn!("{}: cannot write to full queue", self.id);
                        if live {
                            thread::sleep(FULL_RETRY_BACKOFF);
                        }
                        frame = returned;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        warn!("{}: all consumers gone, stopping capture", self.id);
                        break 'produce;
                    }
                }
            }

            if let Some(secs) = delay {
                // Simulate arrival pacing.
                thread::sleep(Duration::from_secs_f64(secs));
            }
        }

        if self.cancel.load(Relaxed) {
            drain(&self.id, &self.rx);
        }
        info!("{}: exiting", self.id);
        Ok(())
    }
}

/// Empty the queue with non-blocking receives so consumers blocked on a put
/// or a get observe shutdown promptly.
fn drain(id: &str, rx: &Receiver<Frame>) {
    debug!("{}: flushing the queue", id);
    let mut flushed = 0usize;
    while rx.try_recv().is_ok() {
        flushed += 1;
    }
    debug!("{}: queue empty, {} frames flushed", id, flushed);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
