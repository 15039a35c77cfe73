#![doc = include_str!("../README.md")]

pub mod bitmap;
pub mod config;
pub mod engine;
pub mod event;
pub mod flow;
pub mod ipset;
pub mod metrics;
pub mod models;
pub mod output;
pub mod protocol;
pub mod reader;
pub mod summary;
pub mod verbose;
pub mod workqueue;

pub use config::ScanConfig;
pub use engine::ScanEngine;
pub use event::EventBatch;
pub use flow::FlowRecord;
pub use metrics::{EventClass, EventMetrics, ScanModel};
pub use output::ScanRecord;
pub use protocol::FlowProtocol;
pub use summary::SummarySnapshot;

/// Errors surfaced by the engine and its readers.
///
/// Per-event classification never fails; these cover configuration,
/// input, and output problems only.
#[derive(Debug)]
pub enum ScanError {
    /// An underlying I/O operation failed.
    Io {
        /// What was being done when the failure occurred.
        context: String,
        source: std::io::Error,
    },

    /// A flowpack stream did not start with the expected magic number.
    BadMagic {
        /// The value found in the header.
        found: u32,
    },

    /// A flowpack stream uses a version this reader does not understand.
    UnsupportedVersion {
        version: u16,
    },

    /// A stream ended in the middle of a header or record.
    Truncated {
        /// Bytes available where a full unit was expected.
        available: usize,
        /// What was being parsed.
        context: String,
    },

    /// A line of the internal IP-set file could not be parsed.
    IpSet {
        line: usize,
        message: String,
    },

    /// The configuration is inconsistent or incomplete.
    Config {
        message: String,
    },
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Io { context, source } => {
                write!(f, "{context}: {source}")
            }
            ScanError::BadMagic { found } => {
                write!(f, "not a flowpack stream (magic {found:#010x})")
            }
            ScanError::UnsupportedVersion { version } => {
                write!(f, "unsupported flowpack version {version}")
            }
            ScanError::Truncated { available, context } => {
                write!(f, "truncated input: {context} ({available} bytes available)")
            }
            ScanError::IpSet { line, message } => {
                write!(f, "IP set line {line}: {message}")
            }
            ScanError::Config { message } => {
                write!(f, "{message}")
            }
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
