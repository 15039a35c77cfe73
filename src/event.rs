//! Event grouping: partitioning the input stream into per-(source IP,
//! protocol) batches.
//!
//! The input is pre-sorted by (source IP, protocol, destination IP), so an
//! event is simply a maximal contiguous run sharing the first two keys. The
//! grouper never re-sorts across events; the TRW model's destination-IP
//! ordering is inherited from the input.

use crate::flow::FlowRecord;
use crate::metrics::EventMetrics;
use crate::protocol::FlowProtocol;

/// One event: the owned flows of a contiguous (source IP, protocol) run
/// plus the metrics accumulated about them. Moves through the work queue
/// by value and is dropped as a unit by the worker that finishes it.
#[derive(Debug)]
pub struct EventBatch {
    pub flows: Vec<FlowRecord>,
    pub metrics: EventMetrics,
}

#[derive(Debug)]
struct CurrentEvent {
    flows: Vec<FlowRecord>,
    metrics: EventMetrics,
}

impl CurrentEvent {
    fn finalize(self) -> EventBatch {
        debug_assert!(!self.flows.is_empty());
        debug_assert!(
            self.flows
                .iter()
                .all(|f| f.sip == self.metrics.sip
                    && f.protocol_number == self.metrics.protocol.number())
        );
        EventBatch {
            flows: self.flows,
            metrics: self.metrics,
        }
    }
}

/// Single-threaded, per-stream grouping state.
#[derive(Debug, Default)]
pub struct EventGrouper {
    current: Option<CurrentEvent>,
}

impl EventGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one (already protocol-filtered) record. When the record opens a
    /// new (source IP, protocol) run, the finished previous batch is
    /// returned.
    pub fn push(&mut self, protocol: FlowProtocol, rec: FlowRecord) -> Option<EventBatch> {
        match &mut self.current {
            Some(cur) if cur.metrics.sip == rec.sip && cur.metrics.protocol == protocol => {
                cur.metrics.stime = cur.metrics.stime.min(rec.stime);
                cur.metrics.etime = cur.metrics.etime.max(rec.etime);
                cur.metrics.event_size += 1;
                cur.flows.push(rec);
                None
            }
            _ => {
                let prev = self.current.take().map(CurrentEvent::finalize);
                let mut metrics = EventMetrics::new(rec.sip, protocol, rec.stime, rec.etime);
                metrics.event_size = 1;
                self.current = Some(CurrentEvent {
                    flows: vec![rec],
                    metrics,
                });
                prev
            }
        }
    }

    /// Flush the in-progress batch at end of stream.
    pub fn finish(&mut self) -> Option<EventBatch> {
        self.current.take().map(CurrentEvent::finalize)
    }
}
