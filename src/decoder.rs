//! Decoder worker.
//!
//! Drains the shared queue, classifies and projects each frame into a typed
//! record, and inserts it into the store. Several workers can run against the
//! same queue and database; insertion order across workers is not defined.

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use gsm_ingest::{classify, project, subtype, Frame, Variant};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::store::Store;

/// How long a queue get may block. A timeout is not an error — file replay
/// can be slower than the consumers.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DecoderWorker {
    id: String,
    rx: Receiver<Frame>,
    store: Store,
    cancel: Arc<AtomicBool>,
}

impl DecoderWorker {
    pub fn new(
        id: impl Into<String>,
        rx: Receiver<Frame>,
        store: Store,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self { id: id.into(), rx, store, cancel }
    }

    /// Main worker loop. Exits on shutdown, on queue disconnect (producer
    /// finished and the queue is dry), or on an unrecoverable store error.
    pub fn run(self) -> Result<()> {
        debug!("{}: worker started", self.id);
        info!("{}: database storage at {}", self.id, self.store.path().display());

        while !self.cancel.load(Relaxed) {
            let frame = match self.rx.recv_timeout(DEQUEUE_TIMEOUT) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => {
                    info!("{}: queue empty", self.id);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            trace!(
                "{}: consumed frame, queue depth is now {}",
                self.id,
                self.rx.len()
            );
            self.handle_frame(&frame)?;
        }

        info!("{}: exiting", self.id);
        Ok(())
    }

    fn handle_frame(&self, frame: &Frame) -> Result<()> {
        let highest = frame.highest_layer();
        let variant = classify(&highest, subtype(frame));
        let kind = match variant {
            Variant::Generic => "undecoded",
            _ => "found",
        };
        debug!(
            "{}: {} packet {} at index {} '{}'",
            self.id,
            kind,
            highest,
            frame.number.saturating_sub(1),
            frame.info()
        );

        let record = match project(frame) {
            Ok(record) => record,
            Err(e) => {
                warn!("{}: frame {} skipped: {}", self.id, frame.number, e);
                return Ok(());
            }
        };
        // The store retries transient failures once; anything that comes back
        // here takes the worker down.
        self.store.insert(&record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
