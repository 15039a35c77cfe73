//! Textual scanner-record output.
//!
//! One row per detected scanner, in a fixed column order. Workers emit
//! rows as events are decided, serialized by the writer's internal mutex.

use serde::Serialize;

use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::config::ScanConfig;
use crate::metrics::{EventMetrics, ScanModel};

struct FieldDef {
    label: &'static str,
    width: usize,
    model_field: bool,
}

const FIELD_DEFS: [FieldDef; 9] = [
    FieldDef { label: "sip", width: 16, model_field: false },
    FieldDef { label: "proto", width: 6, model_field: false },
    FieldDef { label: "stime", width: 24, model_field: false },
    FieldDef { label: "etime", width: 24, model_field: false },
    FieldDef { label: "flows", width: 10, model_field: false },
    FieldDef { label: "packets", width: 10, model_field: false },
    FieldDef { label: "bytes", width: 10, model_field: false },
    FieldDef { label: "scan_model", width: 12, model_field: true },
    FieldDef { label: "scan_prob", width: 10, model_field: true },
];

/// Format seconds since the epoch as UTC `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(secs: u32) -> String {
    match chrono::DateTime::from_timestamp(i64::from(secs), 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

/// One emitted scanner row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanRecord {
    pub sip: Ipv4Addr,
    pub proto: u8,
    pub stime: u32,
    pub etime: u32,
    pub flows: u32,
    pub pkts: u64,
    pub bytes: u64,
    pub scan_prob: f64,
    pub model: ScanModel,
}

impl From<&EventMetrics> for ScanRecord {
    fn from(metrics: &EventMetrics) -> Self {
        Self {
            sip: metrics.sip,
            proto: metrics.protocol.number(),
            stime: metrics.stime,
            etime: metrics.etime,
            flows: metrics.event_size,
            pkts: metrics.pkts,
            bytes: metrics.bytes,
            scan_prob: metrics.scan_probability,
            model: metrics.model,
        }
    }
}

/// Mutex-serialized writer for scanner rows.
pub struct ScanWriter {
    out: Mutex<Box<dyn Write + Send>>,
    delimiter: char,
    no_columns: bool,
    no_final_delimiter: bool,
    model_fields: bool,
    integer_ips: bool,
}

impl std::fmt::Debug for ScanWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanWriter")
            .field("delimiter", &self.delimiter)
            .field("no_columns", &self.no_columns)
            .field("no_final_delimiter", &self.no_final_delimiter)
            .field("model_fields", &self.model_fields)
            .field("integer_ips", &self.integer_ips)
            .finish_non_exhaustive()
    }
}

impl ScanWriter {
    pub fn new(out: Box<dyn Write + Send>, config: &ScanConfig) -> Self {
        Self {
            out: Mutex::new(out),
            delimiter: config.delimiter,
            no_columns: config.no_columns,
            no_final_delimiter: config.no_final_delimiter,
            model_fields: config.model_fields,
            integer_ips: config.integer_ips,
        }
    }

    fn width(&self, def: &FieldDef) -> usize {
        if self.no_columns { 0 } else { def.width }
    }

    /// Write the titles row.
    pub fn write_header(&self) -> io::Result<()> {
        let mut line = String::new();
        for (i, def) in FIELD_DEFS.iter().enumerate() {
            if def.model_field && !self.model_fields {
                continue;
            }
            if i != 0 {
                line.push(self.delimiter);
            }
            line.push_str(&format!("{:>1$}", def.label, self.width(def)));
        }
        if !self.no_final_delimiter {
            line.push(self.delimiter);
        }
        line.push('\n');
        self.out.lock().unwrap().write_all(line.as_bytes())
    }

    /// Write one scanner row.
    pub fn write_record(&self, rec: &ScanRecord) -> io::Result<()> {
        let mut line = String::new();
        for (i, def) in FIELD_DEFS.iter().enumerate() {
            if def.model_field && !self.model_fields {
                continue;
            }
            if i != 0 {
                line.push(self.delimiter);
            }
            let width = self.width(def);
            let value = match def.label {
                "sip" => {
                    if self.integer_ips {
                        format!("{:>width$}", u32::from(rec.sip))
                    } else {
                        format!("{:>width$}", rec.sip.to_string())
                    }
                }
                "proto" => format!("{:>width$}", rec.proto),
                "stime" => format!("{:>width$}", format_timestamp(rec.stime)),
                "etime" => format!("{:>width$}", format_timestamp(rec.etime)),
                "flows" => format!("{:>width$}", rec.flows),
                "packets" => format!("{:>width$}", rec.pkts),
                "bytes" => format!("{:>width$}", rec.bytes),
                "scan_model" => format!("{:>width$}", rec.model.number()),
                "scan_prob" => format!("{:>width$.6}", rec.scan_prob),
                _ => unreachable!("unknown output field"),
            };
            line.push_str(&value);
        }
        if !self.no_final_delimiter {
            line.push(self.delimiter);
        }
        line.push('\n');
        self.out.lock().unwrap().write_all(line.as_bytes())
    }

    pub fn flush(&self) -> io::Result<()> {
        self.out.lock().unwrap().flush()
    }
}
