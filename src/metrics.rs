//! Detection rules and the periodic metric engine.
//!
//! Every pass, each rule answers one question about the accumulated records;
//! the number of rules that fire is subtracted from the calm level 5 and the
//! result is published to the shared indicator. The heuristics follow the
//! SnoopSnitch IMSI-catcher scoring catalogue.
//!
//! The engine's view of the database is a snapshot per statement; rules never
//! need cross-statement atomicity.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::indicator::{ThreatIndicator, LEVEL_CALM};
use crate::store::Store;

/// Pause between evaluation passes.
const EVAL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// Same (LAC, CID) advertised on two or more distinct ARFCNs. A catcher
    /// reusing a real cell's identity on its own frequency trips this.
    ImposterCell,
    /// A LAC reported by neighbour lists that no serving cell claims as its
    /// own. Experimental until neighbour-report ingestion is complete: the
    /// serving-cell marker is the provisional `LAC = CID` encoding.
    InconsistentLac,
    /// A location area containing exactly one observed cell. A catcher
    /// opening a fresh LAC to force location updates is alone in it.
    LonelyLac,
}

const RULES: [Rule; 3] = [Rule::ImposterCell, Rule::InconsistentLac, Rule::LonelyLac];

impl Rule {
    fn name(self) -> &'static str {
        match self {
            Rule::ImposterCell => "imposter cell",
            Rule::InconsistentLac => "inconsistent LAC",
            Rule::LonelyLac => "lonely LAC",
        }
    }
}

/// Threat level from the number of rules that fired this pass.
pub fn threat_level(fired: u8) -> u8 {
    LEVEL_CALM.saturating_sub(fired).max(1)
}

pub struct MetricEngine {
    id: String,
    store: Store,
    indicator: ThreatIndicator,
    cancel: Arc<AtomicBool>,
}

impl MetricEngine {
    pub fn new(
        id: impl Into<String>,
        store: Store,
        indicator: ThreatIndicator,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self { id: id.into(), store, indicator, cancel }
    }

    /// Main engine loop. A database error that survives the store's retry
    /// takes the engine down; the rest of the pipeline keeps running.
    pub fn run(self) -> Result<()> {
        debug!("{}: worker started", self.id);
        while !self.cancel.load(Relaxed) {
            debug!("{}: metrics pass begin", self.id);
            match self.evaluate_pass() {
                Ok(fired) => self.publish(fired),
                Err(e) => {
                    error!("{}: rule evaluation failed: {:#}", self.id, e);
                    return Err(e);
                }
            }
            thread::sleep(EVAL_INTERVAL);
        }
        info!("{}: exiting", self.id);
        Ok(())
    }

    /// One full pass over the rules; returns how many fired. Shutdown is
    /// honored between rules, never inside one.
    pub fn evaluate_pass(&self) -> Result<u8> {
        let mut fired = 0;
        for rule in RULES {
            if self.cancel.load(Relaxed) {
                break;
            }
            if self.evaluate(rule)? {
                fired += 1;
            }
        }
        Ok(fired)
    }

    fn evaluate(&self, rule: Rule) -> Result<bool> {
        let hits = match rule {
            Rule::ImposterCell => self.store.imposter_cells()?.len(),
            Rule::InconsistentLac => self.store.inconsistent_lacs()?.len(),
            Rule::LonelyLac => self.store.lonely_lacs()?.len(),
        };
        debug!("{}: {} offenders: {}", self.id, rule.name(), hits);
        if hits > 0 {
            info!("{}: {} detected", self.id, rule.name());
        }
        Ok(hits > 0)
    }

    fn publish(&self, fired: u8) {
        let level = threat_level(fired);
        let previous = self.indicator.publish(level);
        if level != previous {
            error!("{}: threat level changed to {}", self.id, level);
        } else {
            debug!("{}: threat level holds at {}", self.id, level);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::{lac_cid, neighbor};
    use crate::store::DB_FILE;

    fn engine() -> (tempfile::TempDir, MetricEngine, ThreatIndicator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join(DB_FILE)).unwrap();
        let indicator = ThreatIndicator::new();
        let engine = MetricEngine::new(
            "metrics",
            store,
            indicator.clone(),
            Arc::new(AtomicBool::new(false)),
        );
        (dir, engine, indicator)
    }

    #[test]
    fn test_threat_level_is_five_minus_fired() {
        assert_eq!(threat_level(0), 5);
        assert_eq!(threat_level(1), 4);
        assert_eq!(threat_level(2), 3);
        assert_eq!(threat_level(3), 2);
        // Head-room for future rules: the scale bottoms out at 1.
        assert_eq!(threat_level(4), 1);
        assert_eq!(threat_level(7), 1);
    }

    #[test]
    fn test_empty_database_is_calm() {
        let (_dir, engine, indicator) = engine();
        let fired = engine.evaluate_pass().unwrap();
        assert_eq!(fired, 0);
        engine.publish(fired);
        assert_eq!(indicator.level(), 5);
    }

    #[test]
    fn test_imposter_pair_fires_imposter_and_lonely_rules() {
        let (_dir, engine, indicator) = engine();
        engine.store.insert(&lac_cid("a", 1, 7, 42)).unwrap();
        engine.store.insert(&lac_cid("b", 1, 7, 1337)).unwrap();

        // The imposter pair is also alone in LAC 1, so the lonely rule
        // fires with it.
        let fired = engine.evaluate_pass().unwrap();
        assert_eq!(fired, 2);
        engine.publish(fired);
        assert_eq!(indicator.level(), 3);
    }

    #[test]
    fn test_all_three_rules_firing_reach_level_two() {
        let (_dir, engine, indicator) = engine();
        // R1 + R3: one identity on two ARFCNs, alone in its LAC.
        engine.store.insert(&lac_cid("a", 1, 7, 42)).unwrap();
        engine.store.insert(&lac_cid("b", 1, 7, 1337)).unwrap();
        // R2: a neighbour LAC with no serving-cell row.
        engine.store.insert(&neighbor("n1", 13, 1337, 7)).unwrap();

        let fired = engine.evaluate_pass().unwrap();
        assert_eq!(fired, 3);
        engine.publish(fired);
        assert_eq!(indicator.level(), 2);
    }

    #[test]
    fn test_healthy_network_stays_calm() {
        let (_dir, engine, indicator) = engine();
        // Two populated LACs, each cell on its own ARFCN, consistent
        // neighbour reports.
        for (n, (lac, cid, arfcn)) in
            [(1, 7, 42), (1, 8, 43), (2, 10, 44), (2, 11, 45)].iter().enumerate()
        {
            engine
                .store
                .insert(&lac_cid(&format!("h{n}"), *lac, *cid, *arfcn))
                .unwrap();
        }
        engine.store.insert(&neighbor("n1", 1, 1, 2)).unwrap();
        engine.store.insert(&neighbor("n2", 2, 2, 1)).unwrap();

        let fired = engine.evaluate_pass().unwrap();
        assert_eq!(fired, 0);
        engine.publish(fired);
        assert_eq!(indicator.level(), 5);
    }

    #[test]
    fn test_cancelled_engine_stops_between_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join(DB_FILE)).unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let engine =
            MetricEngine::new("metrics", store, ThreatIndicator::new(), cancel);
        // Already cancelled: no rule runs, nothing fires.
        assert_eq!(engine.evaluate_pass().unwrap(), 0);
    }
}
