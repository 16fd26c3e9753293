//! The four per-direction latency engines.
//!
//! Every arriving packet is run through all four:
//!
//! - delta1 pairs each data segment with the first ACK that covers its
//!   `nxtseq`, under wrap-aware sequence comparison.
//! - delta2 pairs each timestamped data segment with the first reverse
//!   segment whose TSecr echoes its TSval.
//! - delta3 measures each timestamped segment's arrival against the time
//!   predicted by the sender's timestamp clock, once that clock's
//!   frequency has been estimated.
//! - delta4 measures the spacing between consecutive segments from the
//!   same endpoint, split into data and pure-ACK trains.
//!
//! delta1 and delta2 samples describe the *segment's* direction even
//! though they are observed on the ACK/echo, which travels the other way.

use crate::config::AnalysisMode;
use crate::conntrack::conn::Conn;
use crate::conntrack::conn_id::Endpoint;
use crate::record::PacketRecord;
use crate::sink::{DeltaKind, EmitSink, TrafficClass};

use std::cmp::Ordering;
use std::mem;

use anyhow::Result;

/// Deltas above this are reported as suspect (and kept).
const SUSPECT_DELTA_SECS: f64 = 1.0;

/// Timestamp clock frequencies observed in the wild.
const POPULAR_HZ_VALUES: [f64; 4] = [100.0, 200.0, 250.0, 1000.0];

/// Maximum relative error tolerated when snapping a raw clock estimate to
/// a popular frequency.
const HZ_MAX_RELATIVE_ERROR: f64 = 0.05;

/// A data segment awaiting the ACK that covers it.
#[derive(Debug, Clone)]
pub(super) struct UnackedSegment {
    pub(super) ts: f64,
    pub(super) len: u32,
    pub(super) nxtseq: i64,
}

/// A `(timestamp, tsval)` pair: either a segment awaiting its echo or the
/// clock reference of a direction.
#[derive(Debug, Clone, Copy)]
pub(super) struct TsvalSegment {
    pub(super) ts: f64,
    pub(super) tsval: i64,
}

/// Estimation state of one endpoint's timestamp clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(super) enum HzEstimate {
    /// Not enough observations yet.
    #[default]
    Pending,
    /// Estimation failed; delta3 is disabled for the direction.
    Invalid,
    /// Snapped clock frequency.
    Hz(f64),
}

impl Conn {
    /// delta1: match data segments with the first ACK that covers them.
    pub(super) fn update_delta1(
        &mut self,
        pkt: &PacketRecord,
        dir: bool,
        sink: &mut EmitSink,
    ) -> Result<()> {
        let seq = self.seq;
        if pkt.is_data() {
            if let Some(nxtseq) = pkt.tcp_nxtseq {
                let nxtseq = i64::from(nxtseq);
                let flow = self.flow_mut(dir);
                if flow.unacked_segments.iter().any(|seg| seg.nxtseq == nxtseq) {
                    // retransmission: drop every pending copy of the
                    // segment, the ACK can no longer be paired with either
                    flow.unacked_segments.retain(|seg| seg.nxtseq != nxtseq);
                } else {
                    flow.unacked_segments.push(UnackedSegment {
                        ts: pkt.timestamp,
                        len: pkt.tcp_len,
                        nxtseq,
                    });
                }
            }
        }

        let ack = match pkt.tcp_ack {
            Some(ack) => i64::from(ack),
            None => return Ok(()),
        };
        let flow = self.flow_mut(dir);
        let advanced = flow
            .ack_highest
            .map_or(true, |highest| seq.cmp(highest, ack) == Ordering::Less);
        if !advanced {
            return Ok(());
        }
        flow.ack_highest = Some(ack);

        // the advanced ACK may cover segments sent by the peer
        let pending = mem::take(&mut self.flow_mut(!dir).unacked_segments);
        let mut still_unacked = Vec::with_capacity(pending.len());
        for seg in pending {
            if seq.cmp(seg.nxtseq, ack) == Ordering::Greater {
                still_unacked.push(seg);
                continue;
            }
            let delta1 = pkt.timestamp - seg.ts;
            if delta1 > SUSPECT_DELTA_SECS {
                log::warn!(
                    "{}: suspect delta1 {:.6}s ({} bytes, nxtseq {})",
                    self.conn_id,
                    delta1,
                    seg.len,
                    seg.nxtseq
                );
            }
            match self.mode {
                AnalysisMode::Flow => self.flow_mut(dir).delta1_samples.push(delta1),
                AnalysisMode::Packet => sink.emit_delta(
                    DeltaKind::Delta1,
                    seg.ts,
                    self.endpoint(!dir),
                    self.endpoint(dir),
                    delta1,
                    None,
                )?,
            }
        }
        self.flow_mut(!dir).unacked_segments = still_unacked;
        Ok(())
    }

    /// delta2: match segments with the first TSecr that echoes their
    /// TSval.
    pub(super) fn update_delta2(
        &mut self,
        pkt: &PacketRecord,
        dir: bool,
        sink: &mut EmitSink,
    ) -> Result<()> {
        let (Some(tsval), Some(tsecr)) = (pkt.tcp_tsval, pkt.tcp_tsecr) else {
            return Ok(());
        };
        let (tsval, tsecr) = (i64::from(tsval), i64::from(tsecr));
        // cause-effect only holds for echoes of data segments
        if pkt.is_data() {
            self.flow_mut(dir).untsecred_segments.push(TsvalSegment {
                ts: pkt.timestamp,
                tsval,
            });
        }

        let flow = self.flow_mut(dir);
        // TSval clocks are monotone per sender, plain ordering suffices
        let advanced = flow.tsecr_highest.map_or(true, |highest| highest < tsecr);
        if !advanced {
            return Ok(());
        }
        flow.tsecr_highest = Some(tsecr);

        let pending = mem::take(&mut self.flow_mut(!dir).untsecred_segments);
        let mut still_unechoed = Vec::with_capacity(pending.len());
        for seg in pending {
            if seg.tsval > tsecr {
                still_unechoed.push(seg);
                continue;
            }
            let delta2 = pkt.timestamp - seg.ts;
            if delta2 > SUSPECT_DELTA_SECS {
                log::warn!(
                    "{}: suspect delta2 {:.6}s (tsval {})",
                    self.conn_id,
                    delta2,
                    seg.tsval
                );
            }
            if self.mode == AnalysisMode::Packet {
                sink.emit_delta(
                    DeltaKind::Delta2,
                    seg.ts,
                    self.endpoint(!dir),
                    self.endpoint(dir),
                    delta2,
                    None,
                )?;
            }
        }
        self.flow_mut(!dir).untsecred_segments = still_unechoed;
        Ok(())
    }

    /// delta3: residual between a segment's arrival and the arrival
    /// predicted by the sender's timestamp clock.
    pub(super) fn update_delta3(
        &mut self,
        pkt: &PacketRecord,
        dir: bool,
        sink: &mut EmitSink,
    ) -> Result<()> {
        let (Some(tsval), Some(_tsecr)) = (pkt.tcp_tsval, pkt.tcp_tsecr) else {
            return Ok(());
        };
        let tsval = i64::from(tsval);
        let reference = match self.flow(dir).tsval_reference {
            Some(reference) => reference,
            None => {
                self.flow_mut(dir).tsval_reference = Some(TsvalSegment {
                    ts: pkt.timestamp,
                    tsval,
                });
                return Ok(());
            }
        };
        if self.flow(dir).hz == HzEstimate::Pending {
            let estimate = estimate_hz(reference, pkt.timestamp, tsval, self.endpoint(dir));
            self.flow_mut(dir).hz = estimate;
        }
        let HzEstimate::Hz(hz) = self.flow(dir).hz else {
            return Ok(());
        };
        let expected_ts = reference.ts + (tsval - reference.tsval) as f64 / hz;
        let delta3 = pkt.timestamp - expected_ts;
        if self.mode == AnalysisMode::Packet {
            if delta3 > SUSPECT_DELTA_SECS {
                log::warn!("{}: suspect delta3 {:.6}s", self.conn_id, delta3);
            }
            sink.emit_delta(
                DeltaKind::Delta3,
                pkt.timestamp,
                self.endpoint(dir),
                self.endpoint(!dir),
                delta3,
                None,
            )?;
        }
        Ok(())
    }

    /// delta4: spacing between consecutive segments from the same
    /// endpoint, per traffic class.
    pub(super) fn update_delta4(
        &mut self,
        pkt: &PacketRecord,
        dir: bool,
        sink: &mut EmitSink,
    ) -> Result<()> {
        let class = if pkt.is_data() {
            TrafficClass::Data
        } else {
            TrafficClass::Ack
        };
        let previous = self.flow_mut(dir).last_seen_mut(class).replace(pkt.timestamp);
        if let Some(previous) = previous {
            if self.mode == AnalysisMode::Packet {
                let delta4 = pkt.timestamp - previous;
                sink.emit_delta(
                    DeltaKind::Delta4,
                    pkt.timestamp,
                    self.endpoint(dir),
                    self.endpoint(!dir),
                    delta4,
                    Some(class),
                )?;
            }
        }
        Ok(())
    }
}

/// Estimates an endpoint's timestamp clock from the reference pair and one
/// later observation, snapped to the nearest popular frequency.
fn estimate_hz(
    reference: TsvalSegment,
    timestamp: f64,
    tsval: i64,
    endpoint: &Endpoint,
) -> HzEstimate {
    let raw_hz = (tsval - reference.tsval) as f64 / (timestamp - reference.ts);
    let mut best_hz = POPULAR_HZ_VALUES[0];
    let mut best_error = f64::INFINITY;
    for hz in POPULAR_HZ_VALUES {
        let error = ((raw_hz - hz) / hz).abs();
        if error < best_error {
            best_hz = hz;
            best_error = error;
        }
    }
    if best_error > HZ_MAX_RELATIVE_ERROR {
        log::error!(
            "unexpected estimated HZ for {}: {:.3} = {} + {:.2}%",
            endpoint,
            raw_hz,
            best_hz,
            100.0 * best_error
        );
        return HzEstimate::Invalid;
    }
    HzEstimate::Hz(best_hz)
}
