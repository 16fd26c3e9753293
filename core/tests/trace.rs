//! End-to-end scenarios: literal extractor lines through the full
//! parse -> track -> emit pipeline.

use rttcp_core::config::AnalysisMode;
use rttcp_core::record::PacketRecord;
use rttcp_core::{ConnTracker, EmitSink};

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Cloneable in-memory writer capturing sink output.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs record lines through the pipeline the way the runtime does:
/// unparseable lines are skipped, everything else feeds the tracker.
fn run_lines(mode: AnalysisMode, lines: &[&str]) -> String {
    let buf = SharedBuf::default();
    let sink = EmitSink::from_writer(Box::new(buf.clone()));
    let mut tracker = ConnTracker::new(mode, sink).unwrap();
    for line in lines {
        if let Ok(pkt) = PacketRecord::parse_line(line) {
            tracker.process(&pkt).unwrap();
        }
    }
    tracker.drain().unwrap();
    buf.contents()
}

/// One handshake plus a single acked data segment, with noise mixed in.
const HANDSHAKE_AND_DATA: [&str; 7] = [
    "1.000000;6;10.0.0.1;10.0.0.2;60;1000;80;999;0;1000;;1;;",
    "1.010000;6;10.0.0.2;10.0.0.1;60;80;1000;4999;0;5000;1000;1;;",
    "1.020000;6;10.0.0.1;10.0.0.2;40;1000;80;1000;0;;5000;0;;",
    // an ICMP record and a corrupt line must not disturb the connection
    "1.050000;1;10.0.0.9;10.0.0.8;84;0;0;0;0;;;0;;",
    "this line did not come from the extractor",
    "1.100000;6;10.0.0.1;10.0.0.2;140;1000;80;1000;100;1100;5000;0;;",
    "1.150000;6;10.0.0.2;10.0.0.1;40;80;1000;5000;0;;1100;0;;",
];

#[test]
fn flow_mode_summary() {
    let output = run_lines(AnalysisMode::Flow, &HANDSHAKE_AND_DATA);
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(2, lines.len());
    assert!(lines[0].starts_with("#connhash first_ts last_ts"));

    let fields: Vec<&str> = lines[1].split_whitespace().collect();
    assert_eq!(17, fields.len());
    assert_eq!("10.0.0.1:1000-10.0.0.2:80-6", fields[0]);
    assert_eq!("1.000000", fields[1]);
    assert_eq!("1.150000", fields[2]);
    assert_eq!("6", fields[3]);
    // SYN sequence numbers of both directions
    assert_eq!("999", fields[4]);
    assert_eq!("4999", fields[5]);
    // 5 TCP packets, 340 IP bytes
    assert_eq!("5", fields[6]);
    assert_eq!("340", fields[7]);
    assert_eq!("33.333333", fields[8]);
    // payload went one way only; goodput also counts the SYNs
    assert_eq!("100", fields[10]);
    assert_eq!("102", fields[11]);
    // the only delta1 samples sit on the "small" side
    assert_eq!("0.050000", fields[13]);
    assert_eq!("0.050000", fields[14]);
    assert_eq!("-", fields[15]);
    assert_eq!("-", fields[16]);
}

#[test]
fn packet_mode_delta_lines() {
    let output = run_lines(AnalysisMode::Packet, &HANDSHAKE_AND_DATA);
    assert_eq!(
        "#type timestamp src dst delta other\n\
         delta4 1.020000 10.0.0.1:1000 10.0.0.2:80 0.020000 ack\n\
         delta1 1.100000 10.0.0.1:1000 10.0.0.2:80 0.050000 -\n\
         delta4 1.150000 10.0.0.2:80 10.0.0.1:1000 0.140000 ack\n",
        output
    );
}

#[test]
fn flow_mode_keeps_first_seen_order() {
    let lines = [
        "1.000000;6;10.0.0.3;10.0.0.4;40;5000;443;1;0;;;0;;",
        "1.100000;6;10.0.0.1;10.0.0.2;40;1000;80;1;0;;;0;;",
        "2.000000;6;10.0.0.4;10.0.0.3;40;443;5000;1;0;;;0;;",
        "2.100000;6;10.0.0.2;10.0.0.1;40;80;1000;1;0;;;0;;",
    ];
    let output = run_lines(AnalysisMode::Flow, &lines);
    let summaries: Vec<&str> = output.lines().skip(1).collect();
    assert_eq!(2, summaries.len());
    assert!(summaries[0].starts_with("10.0.0.3:5000-10.0.0.4:443-6"));
    assert!(summaries[1].starts_with("10.0.0.1:1000-10.0.0.2:80-6"));
}

#[test]
fn flow_mode_single_packet_connection() {
    let lines = ["5.000000;6;10.0.0.1;10.0.0.2;40;1000;80;1;0;;;0;;"];
    let output = run_lines(AnalysisMode::Flow, &lines);
    let fields: Vec<&str> = output.lines().nth(1).unwrap().split_whitespace().collect();
    assert_eq!("1", fields[6]);
    for field in &fields[8..] {
        assert_eq!(&"-", field);
    }
}

#[test]
fn packet_mode_timestamp_echo_deltas() {
    // both endpoints run 1000 Hz timestamp clocks
    let lines = [
        "0.000000;6;10.0.0.1;10.0.0.2;140;1000;80;1000;100;1100;500;0;1000;90",
        "0.040000;6;10.0.0.2;10.0.0.1;40;80;1000;500;0;;1100;0;130;1000",
        "1.000000;6;10.0.0.1;10.0.0.2;140;1000;80;1100;100;1200;500;0;2000;130",
        "1.040000;6;10.0.0.2;10.0.0.1;40;80;1000;500;0;;1200;0;1130;2000",
    ];
    let output = run_lines(AnalysisMode::Packet, &lines);
    let lines: Vec<&str> = output.lines().collect();
    // the second data segment arrives exactly when its TSval predicts
    assert!(lines.contains(&"delta3 1.000000 10.0.0.1:1000 10.0.0.2:80 0.000000 -"));
    // both data segments are echoed 40ms later
    assert!(lines.contains(&"delta2 0.000000 10.0.0.1:1000 10.0.0.2:80 0.040000 -"));
    assert!(lines.contains(&"delta2 1.000000 10.0.0.1:1000 10.0.0.2:80 0.040000 -"));
}
