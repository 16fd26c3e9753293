//! Bidirectional connection identifiers.
//!
//! Provides a directional identifier (distinguishes the sender and
//! receiver of a given packet) and a canonical, direction-normalized
//! identifier used to bucket both directions of a flow together.

use crate::record::PacketRecord;

use std::fmt;

/// One side of a connection.
///
/// Addresses stay textual: records carry whatever address representation
/// the capture decoder printed, and canonical ordering is defined
/// lexicographically on that text, then numerically on the port.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Endpoint { ip: ip.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Directional connection 5-tuple: the endpoints as observed on one
/// packet, sender first.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct FiveTuple {
    pub orig: Endpoint,
    pub resp: Endpoint,
    pub proto: u8,
}

impl FiveTuple {
    /// Builds the 5-tuple of `record`.
    pub fn from_record(record: &PacketRecord) -> Self {
        FiveTuple {
            orig: Endpoint::new(record.ip_src.as_str(), record.sport),
            resp: Endpoint::new(record.ip_dst.as_str(), record.dport),
            proto: record.ip_proto,
        }
    }

    /// Converts to the non-directional connection identifier.
    pub fn conn_id(&self) -> ConnId {
        ConnId::new(self.orig.clone(), self.resp.clone(), self.proto)
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} protocol {}", self.orig, self.resp, self.proto)
    }
}

/// A canonical connection identifier.
///
/// Both observation directions of a flow yield the same `ConnId`: the
/// endpoint with the smaller `(ip, port)` goes first. Its `Display` form
/// (`<ip>:<port>-<ip>:<port>-<proto>`) is the connection hash used in
/// flow output.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ConnId(Endpoint, Endpoint, u8);

impl ConnId {
    pub(crate) fn new(src: Endpoint, dst: Endpoint, proto: u8) -> Self {
        if src <= dst {
            ConnId(src, dst, proto)
        } else {
            ConnId(dst, src, proto)
        }
    }

    /// The canonically smaller endpoint ("A").
    #[inline]
    pub fn src(&self) -> &Endpoint {
        &self.0
    }

    /// The canonically larger endpoint ("B").
    #[inline]
    pub fn dst(&self) -> &Endpoint {
        &self.1
    }

    #[inline]
    pub fn proto(&self) -> u8 {
        self.2
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.0, self.1, self.2)
    }
}
