//! Pipeline wiring.
//!
//! [`Runtime`] connects the configured input source to the connection
//! tracker and the output sink, then drives the stream to completion.
//! Per-line faults are logged and skipped; the run only fails on sink or
//! source I/O errors.

use crate::config::RuntimeConfig;
use crate::conntrack::ConnTracker;
use crate::extract::InputSource;
use crate::record::PacketRecord;
use crate::sink::EmitSink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use cpu_time::ProcessTime;

/// The analysis runtime.
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    /// Creates a new runtime from `config`.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        if config.extract.is_some() == config.records.is_some() {
            bail!("configure either a capture file to extract or a record stream");
        }
        Ok(Runtime { config })
    }

    /// Runs the analysis to end of input and drains all connections.
    ///
    /// On interrupt the input is abandoned but connections are still
    /// drained, so a partial trace yields complete summary lines.
    pub fn run(&mut self) -> Result<()> {
        let sink = match &self.config.outfile {
            Some(path) => EmitSink::from_path(path)?,
            None => EmitSink::stdout(),
        };
        let mut tracker = ConnTracker::new(self.config.analysis, sink)?;

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        if let Err(err) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
            log::warn!("Unable to install interrupt handler: {}", err);
        }

        let source = InputSource::open(&self.config)?;
        log::info!("Launched analysis: {:?}", self.config.analysis);
        let start = ProcessTime::try_now().expect("Getting process time failed");

        let mut nb_pkts = 0;
        let mut nb_bytes = 0;
        for line in source {
            if !running.load(Ordering::SeqCst) {
                log::info!("Interrupted, draining connections");
                break;
            }
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match PacketRecord::parse_line(&line) {
                Ok(pkt) => {
                    nb_pkts += 1;
                    nb_bytes += pkt.ip_len;
                    tracker.process(&pkt)?;
                }
                Err(err) => log::warn!("discarding line = {:?}: {}", line, err),
            }
        }

        tracker.drain()?;
        let cpu_time = start.elapsed();
        println!("Processed: {} pkts, {} bytes", nb_pkts, nb_bytes);
        println!("CPU time: {:?}ms", cpu_time.as_millis());
        Ok(())
    }
}
