//! Supervisor: owns the queue, the shutdown flag, and every worker thread.
//!
//! One bounded channel carries frames from the ingest worker to the decoder
//! pool; one atomic flag fans the shutdown signal out to everyone. Workers
//! observe the flag at their natural check points — nothing is ever killed
//! synchronously — and the supervisor joins them all before returning.

use anyhow::{Context, Result};
use gsm_ingest::{Frame, IngestWorker};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

use crate::config::DetectorConfig;
use crate::decoder::DecoderWorker;
use crate::indicator::{Announcer, ThreatIndicator};
use crate::metrics::MetricEngine;
use crate::store::Store;

/// Build the pipeline, run it until shutdown, join everything.
pub fn run(config: DetectorConfig) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("shutting down, waiting for workers...");
            cancel.store(true, Relaxed);
        })
        .context("failed to install interrupt handler")?;
    }

    run_with_cancel(config, cancel)
}

/// As [`run`], with the shutdown flag supplied by the caller.
pub fn run_with_cancel(config: DetectorConfig, cancel: Arc<AtomicBool>) -> Result<()> {
    let store = Store::open(config.db_path.clone())?;
    info!("database storage set to {}", store.path().display());

    let (tx, rx) = crossbeam_channel::bounded::<Frame>(config.qsize);
    let indicator = ThreatIndicator::new();

    let mut handles: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();

    let ingest = IngestWorker::new(
        "radio",
        config.source.clone(),
        config.replay_delay,
        tx,
        rx.clone(),
        cancel.clone(),
    );
    handles.push(("radio".into(), spawn("radio", move || ingest.run())?));

    for i in 0..config.threads {
        let name = format!("decoder-{i}");
        let worker =
            DecoderWorker::new(name.clone(), rx.clone(), store.clone(), cancel.clone());
        handles.push((name.clone(), spawn(&name, move || worker.run())?));
    }
    // The supervisor holds no queue endpoints: once the ingest worker is
    // done, drained decoders see the disconnect and exit.
    drop(rx);

    let engine =
        MetricEngine::new("metrics", store, indicator.clone(), cancel.clone());
    handles.push(("metrics".into(), spawn("metrics", move || engine.run())?));

    if !config.headless {
        let announcer = Announcer::new(indicator, cancel.clone());
        handles.push((
            "indicator".into(),
            spawn("indicator", move || {
                announcer.run();
                Ok(())
            })?,
        ));
    }

    info!("all workers started");

    let mut first_failure: Option<anyhow::Error> = None;
    for (name, handle) in handles {
        info!("joining {}", name);
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{}: {:#}", name, e);
                first_failure.get_or_insert(e);
            }
            Err(_) => {
                error!("{}: worker panicked", name);
                first_failure
                    .get_or_insert_with(|| anyhow::anyhow!("worker {} panicked", name));
            }
        }
    }

    info!("all done, shutting down");
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn spawn(
    name: &str,
    f: impl FnOnce() -> Result<()> + Send + 'static,
) -> Result<JoinHandle<Result<()>>> {
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .with_context(|| format!("failed to spawn {} worker", name))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gsm_ingest::SourceConfig;
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use pcap_file::{DataLink, Endianness, TsResolution};
    use rusqlite::Connection;
    use std::time::{Duration, Instant};

    // GSMTAP wire-format builders, mirroring the dissector's layout.
    fn gsmtap_si6(arfcn: u16, frame_nr: u32, ci: u16, lac: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 16];
        buf[0] = 2; // version
        buf[1] = 4; // header words
        buf[2] = 1; // GSM Um
        buf[4..6].copy_from_slice(&arfcn.to_be_bytes());
        buf[6] = -71i8 as u8;
        buf[8..12].copy_from_slice(&frame_nr.to_be_bytes());
        buf[12] = 0x80 | 9; // SACCH/TCH-F

        let mut block = vec![0u8; 23];
        block[2] = 0x03;
        block[3] = 0x03;
        block[4] = 0x01;
        block[5] = 0x06; // RR
        block[6] = 0x1e; // System Information Type 6
        block[7..9].copy_from_slice(&ci.to_be_bytes());
        block[12..14].copy_from_slice(&lac.to_be_bytes());
        buf.extend_from_slice(&block);
        buf
    }

    fn ethernet_udp(payload: &[u8]) -> Vec<u8> {
        let udp_len = (8 + payload.len()) as u16;
        let ip_total = (20 + 8 + payload.len()) as u16;
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0u8; 12]);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[0x45, 0x00]);
        frame.extend_from_slice(&ip_total.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0, 64, 17, 0, 0]);
        frame.extend_from_slice(&[127, 0, 0, 1, 127, 0, 0, 1]);
        frame.extend_from_slice(&[0x12, 0x79, 0x12, 0x79]); // port 4729
        frame.extend_from_slice(&udp_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(payload);
        frame
    }

    fn write_capture(path: &std::path::Path) {
        let header = PcapHeader {
            version_major: 2,
            version_minor: 4,
            ts_correction: 0,
            ts_accuracy: 0,
            snaplen: 65535,
            datalink: DataLink::ETHERNET,
            ts_resolution: TsResolution::MicroSecond,
            endianness: Endianness::native(),
        };
        let file = std::fs::File::create(path).unwrap();
        let mut writer = PcapWriter::with_header(file, header).unwrap();
        // The same cell identity on two ARFCNs: the imposter rule will fire.
        for (n, (arfcn, lac, ci)) in
            [(42u16, 1u16, 7u16), (1337, 1, 7)].iter().enumerate()
        {
            let wire = ethernet_udp(&gsmtap_si6(*arfcn, n as u32, *ci, *lac));
            let pkt = PcapPacket::new(
                Duration::from_secs(n as u64 + 1),
                wire.len() as u32,
                &wire,
            );
            writer.write_packet(&pkt).unwrap();
        }
    }

    #[test]
    fn test_pipeline_end_to_end_with_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("air.pcap");
        write_capture(&capture);
        let db_path = dir.path().join("anti.sqlite3");

        let config = DetectorConfig {
            threads: 2,
            qsize: 64,
            headless: true,
            source: SourceConfig::File { path: capture },
            replay_delay: Some(0.0),
            db_path: db_path.clone(),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let supervisor = {
            let cancel = cancel.clone();
            std::thread::spawn(move || run_with_cancel(config, cancel))
        };

        // Wait (through the ingest cold start) for both rows to land.
        let deadline = Instant::now() + Duration::from_secs(10);
        let rows = loop {
            if let Ok(conn) = Connection::open(&db_path) {
                if let Ok(n) = conn.query_row(
                    "SELECT COUNT(*) FROM LAC_CID",
                    [],
                    |row| row.get::<_, i64>(0),
                ) {
                    if n >= 2 {
                        break n;
                    }
                }
            }
            assert!(Instant::now() < deadline, "records never appeared");
            std::thread::sleep(Duration::from_millis(50));
        };
        assert_eq!(rows, 2);

        cancel.store(true, Relaxed);
        // Shutdown liveness: one queue-get timeout plus slack.
        let join_deadline = Instant::now() + Duration::from_secs(15);
        while !supervisor.is_finished() {
            assert!(
                Instant::now() < join_deadline,
                "workers did not exit within the shutdown budget"
            );
            std::thread::sleep(Duration::from_millis(50));
        }
        supervisor.join().unwrap().unwrap();

        // Both sightings carry the same identity on different ARFCNs.
        let conn = Connection::open(&db_path).unwrap();
        let offenders: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM (
                     SELECT LAC, CID FROM LAC_CID
                     GROUP BY LAC, CID
                     HAVING COUNT(DISTINCT ARFCN) > 1
                 )",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(offenders, 1);
    }
}
