//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use flowscan::config::ScanConfig;
use flowscan::ipset::IpSet;
use flowscan::reader::flowpack_bytes;
use flowscan::summary::SummarySnapshot;
use flowscan::{FlowRecord, ScanEngine};

/// A `Write` sink that can be read back after the engine consumed it.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn tcp_flow(sip: Ipv4Addr, dip: Ipv4Addr, flags: u8) -> FlowRecord {
    FlowRecord {
        sip,
        dip,
        sport: 40000,
        dport: 80,
        protocol_number: 6,
        flags,
        icmp_type: 0,
        icmp_code: 0,
        pkts: 1,
        bytes: 40,
        stime: 1_234_567_890,
        etime: 1_234_567_899,
    }
}

pub fn udp_flow(sip: Ipv4Addr, dip: Ipv4Addr, sport: u16, dport: u16) -> FlowRecord {
    FlowRecord {
        sip,
        dip,
        sport,
        dport,
        protocol_number: 17,
        flags: 0,
        icmp_type: 0,
        icmp_code: 0,
        pkts: 1,
        bytes: 30,
        stime: 1_234_567_890,
        etime: 1_234_567_899,
    }
}

pub fn icmp_flow(sip: Ipv4Addr, dip: Ipv4Addr, icmp_type: u8, icmp_code: u8) -> FlowRecord {
    FlowRecord {
        sip,
        dip,
        sport: 0,
        dport: 0,
        protocol_number: 1,
        flags: 0,
        icmp_type,
        icmp_code,
        pkts: 1,
        bytes: 64,
        stime: 1_234_567_890,
        etime: 1_234_567_899,
    }
}

pub struct RunResult {
    pub summary: SummarySnapshot,
    pub output: String,
    pub scanners: Vec<Ipv4Addr>,
    pub benign: Vec<Ipv4Addr>,
}

impl RunResult {
    /// Output rows, headers excluded.
    pub fn rows(&self) -> Vec<&str> {
        self.output
            .lines()
            .filter(|line| !line.trim_start().starts_with("sip") && !line.contains("| proto|"))
            .collect()
    }
}

/// Run one stream through a fresh engine.
pub fn run_engine(config: ScanConfig, existing: IpSet, flows: &[FlowRecord]) -> RunResult {
    let stream = flowpack_bytes(flows);
    let buf = SharedBuf::default();
    let mut engine = ScanEngine::new(config, existing, Box::new(buf.clone()))
        .expect("engine construction failed");
    engine.start_workers();
    engine
        .process_stream("test-stream", Cursor::new(stream))
        .expect("stream processing failed");
    let summary = engine.finish().expect("engine finish failed");
    RunResult {
        summary,
        output: buf.contents(),
        scanners: engine.trw_scanners(),
        benign: engine.trw_benign(),
    }
}

pub fn ipset_from(text: &str) -> IpSet {
    IpSet::from_reader(Cursor::new(text)).expect("bad test IP set")
}
