//! Diagnostic streams on standard error.
//!
//! Every write happens under one stream lock so lines from concurrent
//! workers never interleave mid-line. Result lines for a single event are
//! emitted as separate fragments, each locking independently.

use std::io::Write;
use std::sync::Mutex;

use crate::config::ScanConfig;
use crate::flow::FlowRecord;
use crate::output::format_timestamp;
use crate::protocol::FlowProtocol;

#[derive(Debug)]
pub struct Verbose {
    lock: Mutex<()>,
    flows: bool,
    results: u32,
    progress_mask: u32,
}

impl Verbose {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            lock: Mutex::new(()),
            flows: config.verbose_flows,
            results: config.verbose_results,
            progress_mask: config.verbose_progress,
        }
    }

    pub fn progress_enabled(&self) -> bool {
        self.progress_mask != 0
    }

    pub fn progress_mask(&self) -> u32 {
        self.progress_mask
    }

    fn emit(&self, text: &str) {
        let _guard = self.lock.lock().unwrap();
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(text.as_bytes());
    }

    /// Progress and lifecycle notes, shown only in verbose-progress mode.
    pub fn progress(&self, text: &str) {
        if self.progress_enabled() {
            self.emit(text);
        }
    }

    /// One line per flow visited by a classifier.
    pub fn flow(&self, index: u32, total: u32, rec: &FlowRecord) {
        if !self.flows {
            return;
        }
        let prefix = format!("{index:>4}/{total:>4}  ");
        let time = format_timestamp(rec.stime);
        let line = match rec.protocol() {
            Ok(FlowProtocol::Icmp) => format!(
                "{}{:<4} {:>16} -> {:>16} icmp({:03},{:03}) {:<24} {:>6} {:>3} {:>6} {:>8}\n",
                prefix,
                rec.protocol_number,
                rec.sip.to_string(),
                rec.dip.to_string(),
                rec.icmp_type,
                rec.icmp_code,
                time,
                rec.bytes,
                rec.pkts,
                rec.bytes_per_pkt(),
                rec.flags_string(),
            ),
            Ok(FlowProtocol::Tcp) | Ok(FlowProtocol::Udp) => format!(
                "{}{:<4} {:>16}:{:>5} -> {:>16}:{:>5} {:<24} {:>6} {:>3} {:>6} {:>8}\n",
                prefix,
                rec.protocol_number,
                rec.sip.to_string(),
                rec.sport,
                rec.dip.to_string(),
                rec.dport,
                time,
                rec.bytes,
                rec.pkts,
                rec.bytes_per_pkt(),
                rec.flags_string(),
            ),
            Err(_) => return,
        };
        self.emit(&line);
    }

    /// A fragment of an event's result line, gated on the event size
    /// threshold of `--verbose-results`.
    pub fn result(&self, event_size: u32, text: &str) {
        if self.results != 0 && event_size >= self.results {
            self.emit(text);
        }
    }
}
