//! Per-connection analysis state.
//!
//! A [`Conn`] owns everything the engine knows about one canonical
//! connection: per-direction latency bookkeeping (see [`latency`]), byte
//! and packet totals, and the sequence-range tracking behind the goodput
//! summary. The tracker feeds it every packet of the connection in
//! observation order and asks it to emit a summary when the trace ends.

mod latency;

use crate::config::AnalysisMode;
use crate::conntrack::conn_id::{ConnId, Endpoint};
use crate::record::PacketRecord;
use crate::sink::{EmitSink, TrafficClass};
use crate::utils::modulo::{Modulo, TCP_SEQ_MAX};
use crate::utils::stats;

use self::latency::{HzEstimate, TsvalSegment, UnackedSegment};

use std::fmt;

use anyhow::Result;
use itertools::Itertools;

/// Per-direction state, keyed by the endpoint that sends in that
/// direction.
#[derive(Debug, Default)]
struct FlowState {
    /// Data segments sent by this endpoint, not yet covered by the peer's
    /// ACK.
    unacked_segments: Vec<UnackedSegment>,
    /// Greatest ACK number sent by this endpoint.
    ack_highest: Option<i64>,
    /// Data-to-ACK round trips recorded from this endpoint's ACKs.
    delta1_samples: Vec<f64>,
    /// Segments carrying a TSval not yet echoed by the peer.
    untsecred_segments: Vec<TsvalSegment>,
    /// Greatest TSecr sent by this endpoint.
    tsecr_highest: Option<i64>,
    /// First `(timestamp, tsval)` observed from this endpoint.
    tsval_reference: Option<TsvalSegment>,
    /// Estimated frequency of this endpoint's timestamp clock.
    hz: HzEstimate,
    /// Arrival time of the last data segment from this endpoint.
    last_data_ts: Option<f64>,
    /// Arrival time of the last pure ACK from this endpoint.
    last_ack_ts: Option<f64>,
    /// Sequence number of this endpoint's SYN.
    seq_syn: Option<i64>,
    /// First-seen sequence number.
    seq_first: Option<i64>,
    /// Highest sequence consumed so far (`nxtseq`, falling back to `seq`).
    seq_last: Option<i64>,
    /// Sum of TCP payload bytes sent by this endpoint.
    total_bytes: u64,
}

impl FlowState {
    fn last_seen_mut(&mut self, class: TrafficClass) -> &mut Option<f64> {
        match class {
            TrafficClass::Data => &mut self.last_data_ts,
            TrafficClass::Ack => &mut self.last_ack_ts,
        }
    }
}

/// State of one canonical connection.
pub(crate) struct Conn {
    conn_id: ConnId,
    mode: AnalysisMode,
    /// Sequence-space arithmetic shared by both directions.
    seq: Modulo,
    first_ts: f64,
    last_ts: f64,
    ip_total_pkt: u64,
    ip_total_bytes: u64,
    /// State of the canonically-first endpoint.
    a: FlowState,
    /// State of the canonically-second endpoint.
    b: FlowState,
}

impl Conn {
    /// Creates the state for a connection whose first observed packet is
    /// `first`. All per-direction structures exist from the start; nothing
    /// is attached lazily later.
    pub(crate) fn new(conn_id: ConnId, mode: AnalysisMode, first: &PacketRecord) -> Self {
        Conn {
            conn_id,
            mode,
            seq: Modulo::new(TCP_SEQ_MAX),
            first_ts: first.timestamp,
            last_ts: first.timestamp,
            ip_total_pkt: 0,
            ip_total_bytes: 0,
            a: FlowState::default(),
            b: FlowState::default(),
        }
    }

    /// `true` when `pkt` was sent by the canonically-first endpoint.
    fn packet_dir(&self, pkt: &PacketRecord) -> bool {
        let src = self.conn_id.src();
        src.ip == pkt.ip_src && src.port == pkt.sport
    }

    fn flow(&self, dir: bool) -> &FlowState {
        if dir {
            &self.a
        } else {
            &self.b
        }
    }

    fn flow_mut(&mut self, dir: bool) -> &mut FlowState {
        if dir {
            &mut self.a
        } else {
            &mut self.b
        }
    }

    /// The endpoint sending in direction `dir`.
    fn endpoint(&self, dir: bool) -> &Endpoint {
        if dir {
            self.conn_id.src()
        } else {
            self.conn_id.dst()
        }
    }

    /// Advances the connection state by one packet.
    pub(crate) fn process_packet(&mut self, pkt: &PacketRecord, sink: &mut EmitSink) -> Result<()> {
        let dir = self.packet_dir(pkt);
        log::trace!(
            "{} {:.6} {}:{} -> {}:{} len {}",
            self.conn_id,
            pkt.timestamp,
            pkt.ip_src,
            pkt.sport,
            pkt.ip_dst,
            pkt.dport,
            pkt.ip_len
        );
        self.update_delta1(pkt, dir, sink)?;
        self.update_delta2(pkt, dir, sink)?;
        self.update_delta3(pkt, dir, sink)?;
        self.update_delta4(pkt, dir, sink)?;
        self.update_flow_stats(pkt, dir);
        self.ip_total_pkt += 1;
        Ok(())
    }

    fn update_flow_stats(&mut self, pkt: &PacketRecord, dir: bool) {
        let seq = self.seq;
        self.last_ts = pkt.timestamp;
        self.ip_total_bytes += pkt.ip_len;

        let flow = self.flow_mut(dir);
        if pkt.tcp_flags_syn {
            flow.seq_syn = Some(i64::from(pkt.tcp_seq));
        }
        flow.total_bytes += u64::from(pkt.tcp_len);
        if flow.seq_first.is_none() {
            flow.seq_first = Some(i64::from(pkt.tcp_seq));
        }
        // segments that consume no sequence space still pin the range
        let nxtseq = pkt.tcp_nxtseq.map_or(i64::from(pkt.tcp_seq), i64::from);
        flow.seq_last = seq.max(flow.seq_last, Some(nxtseq));
    }

    /// Bytes covered by this direction's observed sequence range.
    fn side_goodput(&self, flow: &FlowState) -> i64 {
        match (flow.seq_last, flow.seq_first) {
            (Some(last), Some(first)) => self.seq.diff(last, first),
            _ => 0,
        }
    }

    /// Emits the flow-mode summary line. No-op in packet mode.
    pub(crate) fn emit_summary(&self, sink: &mut EmitSink) -> Result<()> {
        if self.mode == AnalysisMode::Packet {
            return Ok(());
        }
        let mut fields = vec![
            self.conn_id.to_string(),
            format!("{:.6}", self.first_ts),
            format!("{:.6}", self.last_ts),
            self.conn_id.proto().to_string(),
            display_or_dash(self.a.seq_syn),
            display_or_dash(self.b.seq_syn),
            self.ip_total_pkt.to_string(),
            self.ip_total_bytes.to_string(),
        ];
        if self.last_ts > self.first_ts {
            let duration = self.last_ts - self.first_ts;
            let pps = self.ip_total_pkt as f64 / duration;
            let ip_bitrate = 8.0 * self.ip_total_bytes as f64 / duration;
            let tcp_bytes = self.a.total_bytes + self.b.total_bytes;
            let goodput_bytes = self.side_goodput(&self.a) + self.side_goodput(&self.b);
            let goodput_bitrate = 8.0 * goodput_bytes as f64 / duration;
            fields.push(format!("{:.6}", pps));
            fields.push(format!("{:.6}", ip_bitrate));
            fields.push(tcp_bytes.to_string());
            fields.push(goodput_bytes.to_string());
            fields.push(format!("{:.6}", goodput_bitrate));

            // order the two directions by their delta1 medians
            let median_a = stats::median(&self.a.delta1_samples);
            let median_b = stats::median(&self.b.delta1_samples);
            let a_is_small = matches!((median_a, median_b), (Some(a), Some(b)) if a < b);
            let (small, large) = if a_is_small {
                (&self.a, &self.b)
            } else {
                (&self.b, &self.a)
            };
            for flow in [small, large] {
                fields.push(float_or_dash(stats::mean(&flow.delta1_samples)));
                fields.push(float_or_dash(stats::median(&flow.delta1_samples)));
            }
        } else {
            // a single-timestamp connection has no rates to report
            fields.extend(std::iter::repeat(String::from("-")).take(9));
        }
        sink.emit_line(&fields.iter().join(" "))
    }
}

fn display_or_dash<T: fmt::Display>(value: Option<T>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => String::from("-"),
    }
}

fn float_or_dash(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.6}", value),
        None => String::from("-"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conntrack::conn_id::FiveTuple;
    use crate::sink::testutil::SharedBuf;

    fn record(ts: f64, forward: bool) -> PacketRecord {
        let (src, sport, dst, dport) = if forward {
            ("10.0.0.1", 1000, "10.0.0.2", 80)
        } else {
            ("10.0.0.2", 80, "10.0.0.1", 1000)
        };
        PacketRecord {
            timestamp: ts,
            ip_proto: 6,
            ip_src: src.to_owned(),
            ip_dst: dst.to_owned(),
            ip_len: 40,
            sport,
            dport,
            tcp_seq: 0,
            tcp_len: 0,
            tcp_nxtseq: None,
            tcp_ack: None,
            tcp_flags_syn: false,
            tcp_tsval: None,
            tcp_tsecr: None,
        }
    }

    fn conn(mode: AnalysisMode, first: &PacketRecord) -> (Conn, EmitSink, SharedBuf) {
        let buf = SharedBuf::default();
        let sink = EmitSink::from_writer(Box::new(buf.clone()));
        let conn = Conn::new(FiveTuple::from_record(first).conn_id(), mode, first);
        (conn, sink, buf)
    }

    fn summary_fields(conn: &Conn, sink: &mut EmitSink, buf: &SharedBuf) -> Vec<String> {
        conn.emit_summary(sink).unwrap();
        sink.flush().unwrap();
        let contents = buf.contents();
        contents.trim_end().split_whitespace().map(str::to_owned).collect()
    }

    #[test]
    fn core_conn_flow_rates() {
        // 10 packets and 10000 IP bytes over one second
        let mut first = record(0.0, true);
        first.ip_len = 1000;
        let (mut conn, mut sink, buf) = conn(AnalysisMode::Flow, &first);
        for i in 0..10 {
            let mut pkt = record(f64::from(i) / 9.0, i % 2 == 0);
            pkt.ip_len = 1000;
            conn.process_packet(&pkt, &mut sink).unwrap();
        }
        let fields = summary_fields(&conn, &mut sink, &buf);
        assert_eq!("10.0.0.1:1000-10.0.0.2:80-6", fields[0]);
        assert_eq!("0.000000", fields[1]);
        assert_eq!("1.000000", fields[2]);
        assert_eq!("6", fields[3]);
        assert_eq!("10", fields[6]);
        assert_eq!("10000", fields[7]);
        assert_eq!(10.0, fields[8].parse::<f64>().unwrap());
        assert_eq!(80000.0, fields[9].parse::<f64>().unwrap());
    }

    #[test]
    fn core_conn_goodput_from_seq_range() {
        let mut first = record(0.0, true);
        first.tcp_seq = 1000;
        first.tcp_len = 100;
        first.tcp_nxtseq = Some(1100);
        let (mut conn, mut sink, buf) = conn(AnalysisMode::Flow, &first);
        conn.process_packet(&first, &mut sink).unwrap();
        let mut second = record(1.0, true);
        second.tcp_seq = 1100;
        second.tcp_len = 100;
        second.tcp_nxtseq = Some(1200);
        conn.process_packet(&second, &mut sink).unwrap();

        let fields = summary_fields(&conn, &mut sink, &buf);
        // tcp_bytes and goodput agree on a loss-free one-way trace
        assert_eq!("200", fields[10]);
        assert_eq!("200", fields[11]);
        assert_eq!(1600.0, fields[12].parse::<f64>().unwrap());
        // no delta1 samples on either side
        assert_eq!(vec!["-", "-", "-", "-"], fields[13..17].to_vec());
    }

    #[test]
    fn core_conn_syn_seq_reported() {
        let mut first = record(0.0, true);
        first.tcp_flags_syn = true;
        first.tcp_seq = 123456;
        let (mut conn, mut sink, buf) = conn(AnalysisMode::Flow, &first);
        conn.process_packet(&first, &mut sink).unwrap();
        let mut synack = record(0.1, false);
        synack.tcp_flags_syn = true;
        synack.tcp_seq = 654321;
        conn.process_packet(&synack, &mut sink).unwrap();

        let fields = summary_fields(&conn, &mut sink, &buf);
        assert_eq!("123456", fields[4]);
        assert_eq!("654321", fields[5]);
    }

    #[test]
    fn core_conn_single_timestamp_renders_dashes() {
        let first = record(5.0, true);
        let (mut conn, mut sink, buf) = conn(AnalysisMode::Flow, &first);
        conn.process_packet(&first, &mut sink).unwrap();

        let fields = summary_fields(&conn, &mut sink, &buf);
        assert_eq!(17, fields.len());
        assert_eq!("1", fields[6]);
        for field in &fields[8..17] {
            assert_eq!("-", field);
        }
    }

    #[test]
    fn core_conn_packet_mode_emits_no_summary() {
        let first = record(0.0, true);
        let (mut conn, mut sink, buf) = conn(AnalysisMode::Packet, &first);
        conn.process_packet(&first, &mut sink).unwrap();
        conn.emit_summary(&mut sink).unwrap();
        sink.flush().unwrap();
        assert_eq!("", buf.contents());
    }

    #[test]
    fn core_conn_delta1_medians_order_directions() {
        let first = record(0.0, true);
        let (mut conn, mut sink, buf) = conn(AnalysisMode::Flow, &first);
        conn.process_packet(&first, &mut sink).unwrap();
        let mut last = record(1.0, false);
        last.ip_len = 40;
        conn.process_packet(&last, &mut sink).unwrap();
        // samples recorded by the two sides' ACKs
        conn.a.delta1_samples = vec![0.2, 0.4, 0.3];
        conn.b.delta1_samples = vec![0.01, 0.03, 0.02];

        let fields = summary_fields(&conn, &mut sink, &buf);
        assert_eq!(0.02, fields[13].parse::<f64>().unwrap());
        assert_eq!(0.02, fields[14].parse::<f64>().unwrap());
        assert_eq!(0.3, fields[15].parse::<f64>().unwrap());
        assert_eq!(0.3, fields[16].parse::<f64>().unwrap());
    }
}
