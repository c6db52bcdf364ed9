//! Shared threat indicator.
//!
//! A single-slot atomic cell holding the current threat level, 1 (worst) to
//! 5 (calm). The metric engine is the only writer; the UI collaborator — or
//! the built-in console announcer when no UI is attached — reads it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering::Relaxed, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Nothing detected.
pub const LEVEL_CALM: u8 = 5;

#[derive(Debug, Clone)]
pub struct ThreatIndicator(Arc<AtomicU8>);

impl ThreatIndicator {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(LEVEL_CALM)))
    }

    /// Store a new level, returning the previous one.
    pub fn publish(&self, level: u8) -> u8 {
        self.0.swap(level, SeqCst)
    }

    pub fn level(&self) -> u8 {
        self.0.load(SeqCst)
    }
}

impl Default for ThreatIndicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Operator-facing advisory for a threat level.
pub fn advisory(level: u8) -> &'static str {
    match level {
        1 => "turn all devices off and vacate the area immediately",
        2 => "turn all devices off and take countermeasures for an attack",
        3 => "analyze your surroundings and take precautionary procedures",
        4 => "you are in the vicinity of a suspicious base station",
        _ => "no immediate danger or threat detected",
    }
}

/// Console announcer: the stand-in for the graphical indicator when running
/// without one. Polls the shared cell and prints the advisory on change.
pub struct Announcer {
    indicator: ThreatIndicator,
    cancel: Arc<AtomicBool>,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

impl Announcer {
    pub fn new(indicator: ThreatIndicator, cancel: Arc<AtomicBool>) -> Self {
        Self { indicator, cancel }
    }

    pub fn run(self) {
        let mut last = self.indicator.level();
        println!("[*] threat level {}: {}", last, advisory(last));
        while !self.cancel.load(Relaxed) {
            thread::sleep(POLL_INTERVAL);
            let level = self.indicator.level();
            if level != last {
                println!("[*] threat level {}: {}", level, advisory(level));
                last = level;
            }
        }
        info!("indicator: exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_starts_calm() {
        assert_eq!(ThreatIndicator::new().level(), LEVEL_CALM);
    }

    #[test]
    fn test_publish_returns_previous_level() {
        let indicator = ThreatIndicator::new();
        assert_eq!(indicator.publish(3), LEVEL_CALM);
        assert_eq!(indicator.publish(5), 3);
        assert_eq!(indicator.level(), 5);
    }

    #[test]
    fn test_clones_share_the_cell() {
        let writer = ThreatIndicator::new();
        let reader = writer.clone();
        writer.publish(2);
        assert_eq!(reader.level(), 2);
    }

    #[test]
    fn test_every_level_has_an_advisory() {
        for level in 1..=5 {
            assert!(!advisory(level).is_empty());
        }
    }
}
