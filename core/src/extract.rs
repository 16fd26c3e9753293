//! Input sources.
//!
//! The engine consumes record lines from one of two places: the external
//! capture decoder run over a pcap file, or a pre-extracted record file
//! (possibly stdin). Both are exposed as a line iterator; parsing happens
//! downstream so a bad line never kills the source.

use crate::config::{ExtractConfig, RecordsConfig, RuntimeConfig};

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};

/// Decoder fields requested per packet, in record order.
const EXTRACT_FIELDS: [&str; 14] = [
    "frame.time_epoch",
    "ip.proto",
    "ip.src",
    "ip.dst",
    "ip.len",
    "tcp.srcport",
    "tcp.dstport",
    "tcp.seq",
    "tcp.len",
    "tcp.nxtseq",
    "tcp.ack",
    "tcp.flags.syn",
    "tcp.options.timestamp.tsval",
    "tcp.options.timestamp.tsecr",
];

/// Builds the decoder invocation for `config`.
fn extractor_command(config: &ExtractConfig) -> Command {
    let mut cmd = Command::new(&config.tshark);
    cmd.args(["-n", "-T", "fields", "-E", "separator=;"]);
    // absolute (raw) sequence numbers are required for the sequence math
    cmd.args(["-o", "tcp.relative_sequence_numbers: false"]);
    for field in EXTRACT_FIELDS {
        cmd.args(["-e", field]);
    }
    cmd.args(["-r", &config.pcap]);
    cmd
}

/// An ordered stream of record lines.
pub struct InputSource {
    lines: io::Lines<Box<dyn BufRead>>,
    child: Option<Child>,
}

impl InputSource {
    /// Opens the source selected by `config`.
    pub fn open(config: &RuntimeConfig) -> Result<Self> {
        if let Some(extract) = &config.extract {
            Self::spawn_extractor(extract)
        } else if let Some(records) = &config.records {
            Self::open_records(records)
        } else {
            bail!("no input source configured");
        }
    }

    fn spawn_extractor(config: &ExtractConfig) -> Result<Self> {
        let mut cmd = extractor_command(config);
        log::info!("Launching extractor: {:?}", cmd);
        let mut child = cmd
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to launch extractor {:?}", config.tshark))?;
        let stdout = child
            .stdout
            .take()
            .context("extractor stdout unavailable")?;
        let reader: Box<dyn BufRead> = Box::new(BufReader::new(stdout));
        Ok(InputSource {
            lines: reader.lines(),
            child: Some(child),
        })
    }

    fn open_records(config: &RecordsConfig) -> Result<Self> {
        let reader: Box<dyn BufRead> = if config.path == "-" {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let file = File::open(&config.path)
                .with_context(|| format!("failed to open record file {:?}", config.path))?;
            Box::new(BufReader::new(file))
        };
        Ok(InputSource {
            lines: reader.lines(),
            child: None,
        })
    }
}

impl Iterator for InputSource {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next()
    }
}

impl Drop for InputSource {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
