//! Runtime configuration bundle handed to the supervisor.

use anyhow::{bail, Result};
use gsm_ingest::SourceConfig;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Decoder worker count, at least 1.
    pub threads: usize,
    /// Shared queue capacity.
    pub qsize: usize,
    /// Suppress the indicator UI collaborator.
    pub headless: bool,
    pub source: SourceConfig,
    /// Seconds between enqueues during file replay. `None` lets the ingest
    /// worker warn and fall back to its default.
    pub replay_delay: Option<f64>,
    pub db_path: PathBuf,
}

impl DetectorConfig {
    /// Build and validate the bundle. Exactly one capture method must be
    /// present; anything else is fatal before any worker starts.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let source = match (&cli.capture, &cli.interface) {
            (Some(path), None) => SourceConfig::File { path: path.clone() },
            (None, Some(interface)) => SourceConfig::Live { interface: interface.clone() },
            (Some(_), Some(_)) => bail!("--capture and --interface are mutually exclusive"),
            (None, None) => bail!("no capture method supplied, aborting"),
        };
        Ok(Self {
            threads: cli.threads.max(1),
            qsize: cli.qsize.max(1),
            headless: cli.headless,
            source,
            replay_delay: None,
            db_path: Store::default_path(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_capture_source() {
        let cli = Cli::parse_from(["stingwatch", "--capture", "air.pcap"]);
        let config = DetectorConfig::from_cli(&cli).unwrap();
        assert!(matches!(config.source, SourceConfig::File { .. }));
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn test_interface_source() {
        let cli = Cli::parse_from(["stingwatch", "--interface", "lo"]);
        let config = DetectorConfig::from_cli(&cli).unwrap();
        assert!(matches!(config.source, SourceConfig::Live { .. }));
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let cli = Cli::parse_from(["stingwatch", "-i", "lo", "-t", "0", "-q", "0"]);
        let config = DetectorConfig::from_cli(&cli).unwrap();
        assert_eq!(config.threads, 1);
        assert_eq!(config.qsize, 1);
    }

    #[test]
    fn test_db_path_ends_with_fixed_file_name() {
        let cli = Cli::parse_from(["stingwatch", "-i", "lo"]);
        let config = DetectorConfig::from_cli(&cli).unwrap();
        assert!(config.db_path.ends_with("anti.sqlite3"));
    }
}
