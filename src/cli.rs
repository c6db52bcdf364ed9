//! Command-line interface.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[clap(
    name = "stingwatch",
    version,
    about = "GSM IMSI-catcher detector\n\nIngests GSMTAP frames from a radio or a capture file, scores detection \
heuristics over what it sees, and keeps a 1-5 threat level up to date.",
    long_about = None,
    group(ArgGroup::new("source").required(true)),
    group(ArgGroup::new("verbosity"))
)]
pub struct Cli {
    /// Number of decoder workers
    #[clap(short = 't', long, default_value_t = 1)]
    pub threads: usize,

    /// Maximum number of frames waiting in the shared queue
    #[clap(short = 'q', long, default_value_t = 100_000)]
    pub qsize: usize,

    /// Run without the indicator UI
    #[clap(long)]
    pub headless: bool,

    /// Set log level to INFO
    #[clap(short = 'v', long, group = "verbosity")]
    pub verbose: bool,

    /// Set log level to DEBUG
    #[clap(long = "very-verbose", group = "verbosity")]
    pub very_verbose: bool,

    /// Set log level to TRACE
    #[clap(long, group = "verbosity")]
    pub trace: bool,

    /// Replay from a GSMTAP-bearing capture file
    #[clap(short = 'c', long, value_name = "PATH", group = "source")]
    pub capture: Option<PathBuf>,

    /// Live capture from the named radio interface
    #[clap(short = 'i', long, value_name = "NAME", group = "source")]
    pub interface: Option<String>,
}

impl Cli {
    /// Log level from the verbosity flags; WARN when none is given.
    pub fn log_level(&self) -> LevelFilter {
        if self.trace {
            LevelFilter::TRACE
        } else if self.very_verbose {
            LevelFilter::DEBUG
        } else if self.verbose {
            LevelFilter::INFO
        } else {
            LevelFilter::WARN
        }
    }
}
