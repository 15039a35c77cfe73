//! TCP feature extraction and scoring.

use crate::flow::{FlowRecord, is_backscatter_pattern, tcp_flags};
use crate::metrics::{EventClass, EventMetrics, calculate_shared_metrics};
use crate::models::blr::{PACKET_PAYLOAD_CUTOFF, SMALL_PKT_CUTOFF, logistic};
use crate::verbose::Verbose;

pub const BETA0: f64 = -2.838353611;
pub const BETA2: f64 = 3.309023427;
pub const BETA4: f64 = -0.157047027;
pub const BETA13: f64 = -0.002319304;
pub const BETA15: f64 = -1.047413699;
pub const BETA19: f64 = 3.163018548;
pub const BETA21: f64 = -3.260270447;

pub fn increment_counters(rec: &FlowRecord, metrics: &mut EventMetrics) {
    if rec.flags & tcp_flags::ACK == 0 {
        metrics.flows_noack += 1;
    }
    if rec.pkts < SMALL_PKT_CUTOFF {
        metrics.flows_small += 1;
    }
    if rec.bytes_per_pkt() > PACKET_PAYLOAD_CUTOFF {
        metrics.flows_with_payload += 1;
    }
    if is_backscatter_pattern(rec.flags) {
        metrics.flows_backscatter += 1;
    }
    metrics.add_flag_count(rec.flags);
}

pub fn calculate_metrics(flows: &[FlowRecord], metrics: &mut EventMetrics, verbose: &Verbose) {
    calculate_shared_metrics(flows, metrics);

    let size = f64::from(metrics.event_size);
    let noack_ratio = f64::from(metrics.flows_noack) / size;
    let small_ratio = f64::from(metrics.flows_small) / size;
    let sp_dip_ratio = f64::from(metrics.sp_count) / f64::from(metrics.unique_dips);
    let payload_ratio = f64::from(metrics.flows_with_payload) / size;
    let unique_dip_ratio = f64::from(metrics.unique_dips) / size;
    let backscatter_ratio = f64::from(metrics.flows_backscatter) / size;
    let event_size = metrics.event_size;

    let tcp = metrics.tcp_mut();
    tcp.noack_ratio = noack_ratio;
    tcp.small_ratio = small_ratio;
    tcp.sp_dip_ratio = sp_dip_ratio;
    tcp.payload_ratio = payload_ratio;
    tcp.unique_dip_ratio = unique_dip_ratio;
    tcp.backscatter_ratio = backscatter_ratio;

    verbose.result(
        event_size,
        &format!(
            "\ttcp ({:.3}, {:.3}, {:.3}, {:.3}, {:.3}, {:.3})",
            noack_ratio, small_ratio, sp_dip_ratio, payload_ratio, unique_dip_ratio,
            backscatter_ratio
        ),
    );
}

pub fn calculate_scan_probability(metrics: &mut EventMetrics) {
    let tcp = metrics.tcp();
    let y = BETA0
        + BETA2 * tcp.noack_ratio
        + BETA4 * tcp.small_ratio
        + BETA13 * tcp.sp_dip_ratio
        + BETA15 * tcp.payload_ratio
        + BETA19 * tcp.unique_dip_ratio
        + BETA21 * tcp.backscatter_ratio;

    metrics.scan_probability = logistic(y);
    if metrics.scan_probability > 0.5 {
        metrics.event_class = EventClass::Scan;
    }
}
