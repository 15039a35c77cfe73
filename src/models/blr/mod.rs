//! Per-protocol logistic-regression scoring.
//!
//! Each protocol has a feature extractor and a fixed-coefficient logistic
//! scorer. Events below the flow threshold pass through unscored at
//! whatever class the chain already assigned.

pub mod icmp;
pub mod tcp;
pub mod udp;

use crate::event::EventBatch;
use crate::flow::compare_dip_sport;
use crate::metrics::{EventClass, ScanModel};
use crate::protocol::FlowProtocol;
use crate::verbose::Verbose;

/// Minimum event size for BLR scoring.
pub const EVENT_FLOW_THRESHOLD: u32 = 32;
/// Flows with fewer packets than this count as "small".
pub const SMALL_PKT_CUTOFF: u32 = 3;
/// Flows averaging more bytes per packet than this carry payload.
pub const PACKET_PAYLOAD_CUTOFF: u32 = 60;

/// The standard logistic function `e^y / (1 + e^y)`.
pub(crate) fn logistic(y: f64) -> f64 {
    y.exp() / (1.0 + y.exp())
}

/// Score one event. Flows are expected pre-sorted by (protocol, start
/// time); the extractor pass re-sorts them by (destination IP, source
/// port) before computing run-length metrics.
pub fn classify(verbose: &Verbose, batch: &mut EventBatch) -> EventClass {
    let EventBatch { flows, metrics } = batch;
    metrics.model = ScanModel::Blr;

    if metrics.event_size >= EVENT_FLOW_THRESHOLD {
        for (i, rec) in flows.iter().enumerate() {
            verbose.flow(i as u32 + 1, metrics.event_size, rec);
            match rec.protocol() {
                Ok(FlowProtocol::Icmp) => icmp::increment_counters(rec, metrics),
                Ok(FlowProtocol::Tcp) => tcp::increment_counters(rec, metrics),
                Ok(FlowProtocol::Udp) => udp::increment_counters(rec, metrics),
                Err(proto) => unreachable!("protocol {proto} escaped the filter"),
            }
        }

        flows.sort_by(compare_dip_sport);

        match metrics.protocol {
            FlowProtocol::Icmp => {
                icmp::calculate_metrics(flows, metrics, verbose);
                icmp::calculate_scan_probability(metrics);
            }
            FlowProtocol::Tcp => {
                tcp::calculate_metrics(flows, metrics, verbose);
                tcp::calculate_scan_probability(metrics);
            }
            FlowProtocol::Udp => {
                udp::calculate_metrics(flows, metrics, verbose);
                udp::calculate_scan_probability(metrics);
            }
        }
    } else {
        verbose.result(metrics.event_size, "\tblr: small");
    }
    metrics.event_class
}
