//! Configuration options.
//!
//! The runtime is driven by a TOML configuration file naming the analysis
//! mode and exactly one input source: either a capture file to run through
//! the external decoder, or a pre-extracted record stream. The path to the
//! configuration file itself is typically a command line argument of the
//! application.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> RuntimeConfig {
    let config_str = fs::read_to_string(path).expect("ERROR: File read failed");
    let config: RuntimeConfig = toml::from_str(&config_str).expect("Invalid config file");

    // error check config
    if config.extract.is_some() == config.records.is_some() {
        log::error!(
            "Configure either a capture file to extract or a record stream: {:#?}",
            config
        );
        panic!();
    }
    config
}

/// Loads a default configuration.
///
/// For demonstration purposes only. The default configuration reads
/// pre-extracted records from stdin and writes flow summaries to stdout:
/// ```toml
/// analysis = "flow"
///
/// [records]
///     path = "-"
/// ```
pub fn default_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

/* --------------------------------------------------------------------------------- */

/// Runtime configuration options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Analysis mode: per-packet delta samples or per-flow summaries.
    /// Defaults to `flow`.
    #[serde(default)]
    pub analysis: AnalysisMode,

    /// Diagnostic verbosity. `0` keeps the default log filtering; higher
    /// values enable debug and trace output.
    #[serde(default)]
    pub debug: u32,

    /// Output file. Defaults to stdout.
    #[serde(default)]
    pub outfile: Option<String>,

    /// Capture-extraction settings. Either `extract` or `records` must be
    /// specified.
    #[serde(default)]
    pub extract: Option<ExtractConfig>,

    /// Pre-extracted record stream settings. Either `extract` or `records`
    /// must be specified.
    #[serde(default)]
    pub records: Option<RecordsConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            analysis: AnalysisMode::Flow,
            debug: 0,
            outfile: None,
            extract: None,
            records: Some(RecordsConfig::default()),
        }
    }
}

/// Analysis modes.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Aggregate per connection, emit one summary line per connection at
    /// end of trace.
    #[default]
    Flow,
    /// Emit one line per delta sample as it is observed.
    Packet,
}

/// Capture-extraction settings: run the external decoder over a capture
/// file and consume its record output.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExtractConfig {
    /// Decoder binary. Defaults to `tshark` on the PATH.
    #[serde(default = "default_tshark")]
    pub tshark: String,

    /// Path of the capture file to analyze.
    pub pcap: String,
}

fn default_tshark() -> String {
    String::from("tshark")
}

/// Pre-extracted record stream settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RecordsConfig {
    /// Path of the record file, or `-` for stdin.
    #[serde(default = "default_records_path")]
    pub path: String,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        RecordsConfig {
            path: default_records_path(),
        }
    }
}

fn default_records_path() -> String {
    String::from("-")
}
