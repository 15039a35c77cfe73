//! Run totals, updated from both the producer and the workers.

use serde::Serialize;

use std::sync::Mutex;

use crate::metrics::EventClass;

/// A point-in-time copy of the run totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummarySnapshot {
    /// Records read successfully, before protocol filtering.
    pub total_flows: u64,
    /// Records whose protocol is not ICMP, TCP, or UDP.
    pub ignored_flows: u64,
    pub scanners: u64,
    pub benign: u64,
    pub backscatter: u64,
    pub flooders: u64,
    pub unknown: u64,
}

impl SummarySnapshot {
    /// Total events that reached a terminal class.
    pub fn events(&self) -> u64 {
        self.scanners + self.benign + self.backscatter + self.flooders + self.unknown
    }
}

#[derive(Debug, Default)]
pub struct SummaryMetrics {
    inner: Mutex<SummarySnapshot>,
}

impl SummaryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_flow(&self) {
        self.inner.lock().unwrap().total_flows += 1;
    }

    pub fn record_ignored(&self) {
        self.inner.lock().unwrap().ignored_flows += 1;
    }

    pub fn record_class(&self, class: EventClass) {
        let mut totals = self.inner.lock().unwrap();
        match class {
            EventClass::Scan => totals.scanners += 1,
            EventClass::Benign => totals.benign += 1,
            EventClass::Backscatter => totals.backscatter += 1,
            EventClass::Flood => totals.flooders += 1,
            EventClass::Unknown => totals.unknown += 1,
        }
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        *self.inner.lock().unwrap()
    }
}
