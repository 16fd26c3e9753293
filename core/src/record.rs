//! Per-packet records produced by the capture decoder.
//!
//! The extractor emits one line per packet with 14 `;`-separated fields:
//!
//! ```text
//! frame.time_epoch;ip.proto;ip.src;ip.dst;ip.len;tcp.srcport;tcp.dstport;
//! tcp.seq;tcp.len;tcp.nxtseq;tcp.ack;tcp.flags.syn;
//! tcp.options.timestamp.tsval;tcp.options.timestamp.tsecr
//! ```
//!
//! Sequence numbers are absolute (the decoder is run with relative
//! sequence numbers disabled). A field holding a comma-separated list
//! (multi-layer capture) collapses to its last value. Empty `tcp.nxtseq`,
//! `tcp.ack`, `tcp.options.timestamp.*` fields mean "absent".

use std::str::FromStr;

use thiserror::Error;

/// TCP assigned protocol number.
pub const TCP_PROTOCOL: u8 = 6;
/// UDP assigned protocol number.
pub const UDP_PROTOCOL: u8 = 17;
/// SCTP assigned protocol number.
pub const SCTP_PROTOCOL: u8 = 132;

/// Number of fields in an extractor line.
pub const NB_FIELDS: usize = 14;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("expected {NB_FIELDS} fields, found {0}")]
    FieldCount(usize),
    #[error("invalid {field} value {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// A decoded packet summary.
///
/// Wire-typed: sequence-space fields are the raw 32-bit values observed on
/// the wire; the engine widens them to 64 bits for modular arithmetic.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    /// Capture timestamp, seconds since the epoch.
    pub timestamp: f64,
    pub ip_proto: u8,
    pub ip_src: String,
    pub ip_dst: String,
    /// Total IP packet length in bytes.
    pub ip_len: u64,
    pub sport: u16,
    pub dport: u16,
    /// Absolute TCP sequence number.
    pub tcp_seq: u32,
    /// TCP payload length.
    pub tcp_len: u32,
    /// Expected next sequence number; absent when the segment consumes no
    /// sequence space.
    pub tcp_nxtseq: Option<u32>,
    /// ACK number, present iff the ACK flag is set.
    pub tcp_ack: Option<u32>,
    pub tcp_flags_syn: bool,
    /// TCP Timestamp option value.
    pub tcp_tsval: Option<u32>,
    /// TCP Timestamp option echo reply.
    pub tcp_tsecr: Option<u32>,
}

impl PacketRecord {
    /// Parses one extractor output line.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = line.trim_end().split(';').collect();
        if fields.len() != NB_FIELDS {
            return Err(ParseError::FieldCount(fields.len()));
        }
        Ok(PacketRecord {
            timestamp: parse_field(fields[0], "frame.time_epoch")?,
            ip_proto: parse_field(fields[1], "ip.proto")?,
            ip_src: last_value(fields[2]).to_owned(),
            ip_dst: last_value(fields[3]).to_owned(),
            ip_len: parse_field(fields[4], "ip.len")?,
            sport: parse_field(fields[5], "tcp.srcport")?,
            dport: parse_field(fields[6], "tcp.dstport")?,
            tcp_seq: parse_field(fields[7], "tcp.seq")?,
            tcp_len: parse_field(fields[8], "tcp.len")?,
            tcp_nxtseq: parse_opt_field(fields[9], "tcp.nxtseq")?,
            tcp_ack: parse_opt_field(fields[10], "tcp.ack")?,
            tcp_flags_syn: parse_field::<u8>(fields[11], "tcp.flags.syn")? != 0,
            tcp_tsval: parse_opt_field(fields[12], "tcp.options.timestamp.tsval")?,
            tcp_tsecr: parse_opt_field(fields[13], "tcp.options.timestamp.tsecr")?,
        })
    }

    /// Whether the segment carries payload.
    #[inline]
    pub fn is_data(&self) -> bool {
        self.tcp_len > 0
    }
}

/// Collapses a multi-layer capture field to its innermost value.
fn last_value(field: &str) -> &str {
    field.rsplit(',').next().unwrap_or(field)
}

fn parse_field<T: FromStr>(field: &str, name: &'static str) -> Result<T, ParseError> {
    let value = last_value(field);
    value.parse().map_err(|_| ParseError::InvalidField {
        field: name,
        value: value.to_owned(),
    })
}

fn parse_opt_field<T: FromStr>(field: &str, name: &'static str) -> Result<Option<T>, ParseError> {
    let value = last_value(field);
    if value.is_empty() {
        return Ok(None);
    }
    parse_field(value, name).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_record_parse_full_line() {
        let line = "1.000200;6;10.0.0.1;10.0.0.2;152;1000;80;1000;100;1100;501;0;77;55\n";
        let pkt = PacketRecord::parse_line(line).unwrap();
        assert_eq!(1.0002, pkt.timestamp);
        assert_eq!(TCP_PROTOCOL, pkt.ip_proto);
        assert_eq!("10.0.0.1", pkt.ip_src);
        assert_eq!("10.0.0.2", pkt.ip_dst);
        assert_eq!(152, pkt.ip_len);
        assert_eq!(1000, pkt.sport);
        assert_eq!(80, pkt.dport);
        assert_eq!(1000, pkt.tcp_seq);
        assert_eq!(100, pkt.tcp_len);
        assert_eq!(Some(1100), pkt.tcp_nxtseq);
        assert_eq!(Some(501), pkt.tcp_ack);
        assert!(!pkt.tcp_flags_syn);
        assert_eq!(Some(77), pkt.tcp_tsval);
        assert_eq!(Some(55), pkt.tcp_tsecr);
        assert!(pkt.is_data());
    }

    #[test]
    fn core_record_parse_absent_fields() {
        // pure ACK without timestamps: nxtseq, tsval, tsecr are empty
        let line = "2.5;6;10.0.0.2;10.0.0.1;40;80;1000;501;0;;1100;0;;";
        let pkt = PacketRecord::parse_line(line).unwrap();
        assert_eq!(None, pkt.tcp_nxtseq);
        assert_eq!(Some(1100), pkt.tcp_ack);
        assert_eq!(None, pkt.tcp_tsval);
        assert_eq!(None, pkt.tcp_tsecr);
        assert!(!pkt.is_data());
    }

    #[test]
    fn core_record_parse_multi_layer_values() {
        // tunneled capture: the decoder reports one value per layer
        let line = "1.0;4,6;192.168.0.1,10.0.0.1;192.168.0.2,10.0.0.2;120,100;1000;80;7;0;;;1;;";
        let pkt = PacketRecord::parse_line(line).unwrap();
        assert_eq!(TCP_PROTOCOL, pkt.ip_proto);
        assert_eq!("10.0.0.1", pkt.ip_src);
        assert_eq!("10.0.0.2", pkt.ip_dst);
        assert_eq!(100, pkt.ip_len);
        assert!(pkt.tcp_flags_syn);
    }

    #[test]
    fn core_record_parse_rejects_short_line() {
        assert!(matches!(
            PacketRecord::parse_line("1.0;6;10.0.0.1"),
            Err(ParseError::FieldCount(3))
        ));
    }

    #[test]
    fn core_record_parse_rejects_garbage() {
        let line = "not-a-time;6;10.0.0.1;10.0.0.2;152;1000;80;1000;100;1100;;0;;";
        assert!(matches!(
            PacketRecord::parse_line(line),
            Err(ParseError::InvalidField { field: "frame.time_epoch", .. })
        ));
        // non-TCP rows leave the tcp fields empty, which fails the
        // required-field parse and skips the line
        let line = "1.0;17;10.0.0.1;10.0.0.2;152;;;;;;;;;";
        assert!(PacketRecord::parse_line(line).is_err());
    }
}
