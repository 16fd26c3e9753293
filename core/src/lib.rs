//! Passive TCP performance analysis from extracted packet records.
//!
//! rttcp consumes a stream of per-packet records produced by a capture
//! decoder (one text line per packet, see [record]) and computes per-TCP-
//! connection latency and throughput measurements: data-to-ACK round trips,
//! TCP timestamp echo delays, sender-clock residuals, and inter-arrival
//! spacing, plus flow-level goodput and rate summaries.
//!
//! The pipeline is single-threaded and fully streaming: every record
//! advances per-connection state immediately, and remaining state is
//! drained when the trace ends.
//!
//! ```no_run
//! use rttcp_core::config::load_config;
//! use rttcp_core::Runtime;
//!
//! fn main() {
//!     let config = load_config("configs/flow.toml");
//!     let mut runtime = Runtime::new(config).unwrap();
//!     runtime.run().unwrap();
//! }
//! ```

pub mod config;
pub mod conntrack;
pub mod extract;
pub mod record;
mod runtime;
pub mod sink;
pub mod utils;

pub use self::conntrack::conn_id::{ConnId, Endpoint, FiveTuple};
pub use self::conntrack::ConnTracker;
pub use self::record::PacketRecord;
pub use self::runtime::Runtime;
pub use self::sink::EmitSink;
