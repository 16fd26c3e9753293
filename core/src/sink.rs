//! Output emission.
//!
//! [`EmitSink`] is the single, line-buffered text sink the analysis writes
//! to: per-packet delta lines in `packet` mode, per-connection summary
//! lines in `flow` mode. Every emit call produces exactly one complete
//! line; callers format their own fields. Sink I/O errors are the only
//! fatal errors in the pipeline.

use crate::config::AnalysisMode;
use crate::conntrack::conn_id::Endpoint;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Result;

/// Delta sample kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// Data segment to first covering ACK.
    Delta1,
    /// TSval to first echoing TSecr.
    Delta2,
    /// Residual against the sender's timestamp clock.
    Delta3,
    /// Inter-arrival spacing from the same endpoint.
    Delta4,
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeltaKind::Delta1 => "delta1",
            DeltaKind::Delta2 => "delta2",
            DeltaKind::Delta3 => "delta3",
            DeltaKind::Delta4 => "delta4",
        };
        write!(f, "{}", name)
    }
}

/// Traffic classes for inter-arrival samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    /// Segment carries payload.
    Data,
    /// Pure ACK.
    Ack,
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficClass::Data => write!(f, "data"),
            TrafficClass::Ack => write!(f, "ack"),
        }
    }
}

/// A line-buffered text sink.
pub struct EmitSink {
    wtr: BufWriter<Box<dyn Write>>,
}

impl EmitSink {
    /// Creates a sink writing to `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    /// Creates a sink writing to stdout.
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(io::stdout()))
    }

    /// Creates a sink over an arbitrary writer.
    pub fn from_writer(wtr: Box<dyn Write>) -> Self {
        EmitSink {
            wtr: BufWriter::new(wtr),
        }
    }

    /// Writes the header line for `mode`.
    pub fn write_header(&mut self, mode: AnalysisMode) -> Result<()> {
        match mode {
            AnalysisMode::Flow => writeln!(
                self.wtr,
                "#connhash first_ts last_ts ip_proto tcp_seq_syn[A] tcp_seq_syn[B] \
                 ip_total_pkt ip_total_bytes pps ip_bitrate tcp_bytes tcp_goodput_bytes \
                 tcp_goodput_bitrate delta1_small_mean delta1_small_median \
                 delta1_large_mean delta1_large_median"
            )?,
            AnalysisMode::Packet => {
                writeln!(self.wtr, "#type timestamp src dst delta other")?
            }
        }
        Ok(())
    }

    /// Emits one delta sample line.
    ///
    /// `src` and `dst` are the direction of the segment the sample
    /// describes, which for delta1/delta2 is the reverse of the packet
    /// that triggered it.
    pub fn emit_delta(
        &mut self,
        kind: DeltaKind,
        timestamp: f64,
        src: &Endpoint,
        dst: &Endpoint,
        delta: f64,
        class: Option<TrafficClass>,
    ) -> Result<()> {
        match class {
            Some(class) => writeln!(
                self.wtr,
                "{} {:.6} {} {} {:.6} {}",
                kind, timestamp, src, dst, delta, class
            )?,
            None => writeln!(
                self.wtr,
                "{} {:.6} {} {} {:.6} -",
                kind, timestamp, src, dst, delta
            )?,
        }
        Ok(())
    }

    /// Emits one pre-formatted line.
    pub fn emit_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.wtr, "{}", line)?;
        Ok(())
    }

    /// Flushes buffered output to the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.wtr.flush()?;
        Ok(())
    }
}
