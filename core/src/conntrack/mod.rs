//! Connection state management.
//!
//! The tracker demultiplexes the record stream into per-connection state
//! keyed by the canonical [ConnId](conn_id::ConnId). Connections live for
//! the whole trace; at end of input the tracker drains them in the order
//! they were first seen, which keeps flow output stable across runs.

pub(crate) mod conn;
pub mod conn_id;

use self::conn::Conn;
use self::conn_id::FiveTuple;
use crate::config::AnalysisMode;
use crate::record::{PacketRecord, SCTP_PROTOCOL, TCP_PROTOCOL, UDP_PROTOCOL};
use crate::sink::EmitSink;

use anyhow::Result;
use hashlink::linked_hash_map::{LinkedHashMap, RawEntryMut};

/// Manages state for all connections of a trace.
pub struct ConnTracker {
    mode: AnalysisMode,
    /// Manages `ConnId` to `Conn` mappings, in first-seen order.
    table: LinkedHashMap<conn_id::ConnId, Conn>,
    /// Shared output sink; connections borrow it per emission.
    sink: EmitSink,
}

impl ConnTracker {
    /// Creates a new `ConnTracker` writing to `sink`. The header line for
    /// `mode` is written immediately.
    pub fn new(mode: AnalysisMode, mut sink: EmitSink) -> Result<Self> {
        sink.write_header(mode)?;
        Ok(ConnTracker {
            mode,
            table: LinkedHashMap::new(),
            sink,
        })
    }

    /// Returns the number of tracked connections.
    #[inline]
    pub fn size(&self) -> usize {
        self.table.len()
    }

    /// Processes a single record, creating connection state on first
    /// sight. Records of unhandled protocols are dropped.
    pub fn process(&mut self, pkt: &PacketRecord) -> Result<()> {
        if !matches!(pkt.ip_proto, TCP_PROTOCOL | UDP_PROTOCOL | SCTP_PROTOCOL) {
            return Ok(());
        }
        let five_tuple = FiveTuple::from_record(pkt);
        let conn_id = five_tuple.conn_id();
        match self.table.raw_entry_mut().from_key(&conn_id) {
            RawEntryMut::Occupied(mut occupied) => {
                occupied.get_mut().process_packet(pkt, &mut self.sink)
            }
            RawEntryMut::Vacant(vacant) => {
                log::debug!("new connection {}", five_tuple);
                let conn = Conn::new(conn_id.clone(), self.mode, pkt);
                let (_, conn) = vacant.insert(conn_id, conn);
                conn.process_packet(pkt, &mut self.sink)
            }
        }
    }

    /// Emits every connection's flow summary in first-seen order and
    /// flushes the sink.
    pub fn drain(&mut self) -> Result<()> {
        log::info!("Draining {} connections", self.table.len());
        for (_, conn) in self.table.iter() {
            conn.emit_summary(&mut self.sink)?;
        }
        self.sink.flush()
    }
}
