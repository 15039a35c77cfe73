//! ICMP feature extraction and scoring.
//!
//! The extractor walks the destination-IP-sorted flows measuring how
//! methodically the source covered address space: the longest run of
//! consecutive addresses inside one /24, the longest run of consecutive
//! /24s, and the densest single /24.

use crate::flow::FlowRecord;
use crate::metrics::{EventClass, EventMetrics, calculate_shared_metrics};
use crate::models::blr::logistic;
use crate::verbose::Verbose;

pub const BETA0: f64 = -4.307079;
pub const BETA1: f64 = -0.08245704;
pub const BETA5: f64 = -0.02800612;
pub const BETA6: f64 = 0.04877852;
pub const BETA11: f64 = -0.000006398878;
pub const BETA22: f64 = 4.016751;

/// Echo-style ICMP queries: echo, timestamp, information, address mask.
const ECHO_TYPES: [u8; 4] = [8, 13, 15, 17];

pub fn increment_counters(rec: &FlowRecord, metrics: &mut EventMetrics) {
    if ECHO_TYPES.contains(&rec.icmp_type) && rec.icmp_code == 0 {
        metrics.flows_icmp_echo += 1;
    }
}

pub fn calculate_metrics(flows: &[FlowRecord], metrics: &mut EventMetrics, verbose: &Verbose) {
    calculate_shared_metrics(flows, metrics);

    // run counts +1 address steps between distinct dips in one /24;
    // subnet_run and dip_count count members of their runs.
    let mut run: u32 = 0;
    let mut max_run: u32 = 0;
    let mut subnet_run: u32 = 1;
    let mut max_subnet_run: u32 = 1;
    let mut dip_count: u32 = 1;
    let mut max_dip_count: u32 = 1;

    let n = flows.len();
    for i in 0..n {
        let dip_curr = flows[i].dip_u32();
        let class_c_curr = dip_curr & 0xFFFF_FF00;

        if i + 1 < n {
            let dip_next = flows[i + 1].dip_u32();
            let class_c_next = dip_next & 0xFFFF_FF00;

            if class_c_curr == class_c_next {
                if dip_curr != dip_next {
                    dip_count += 1;
                    if dip_next.wrapping_sub(dip_curr) == 1 {
                        run += 1;
                    } else {
                        max_run = max_run.max(run);
                        run = 0;
                    }
                }
            } else {
                if class_c_next.wrapping_sub(class_c_curr) >> 8 == 1 {
                    subnet_run += 1;
                } else {
                    max_subnet_run = max_subnet_run.max(subnet_run);
                    subnet_run = 1;
                }
                max_run = max_run.max(run);
                run = 0;
                max_dip_count = max_dip_count.max(dip_count);
                dip_count = 1;
            }
        } else {
            max_run = max_run.max(run);
            max_subnet_run = max_subnet_run.max(subnet_run);
            max_dip_count = max_dip_count.max(dip_count);
        }
    }

    let total_dip_count = metrics.unique_dsts;
    let echo_ratio = f64::from(metrics.flows_icmp_echo) / f64::from(metrics.event_size);
    let event_size = metrics.event_size;

    let icmp = metrics.icmp_mut();
    icmp.max_class_c_dip_run_length = max_run;
    icmp.max_class_c_subnet_run_length = max_subnet_run;
    icmp.max_class_c_dip_count = max_dip_count;
    icmp.total_dip_count = total_dip_count;
    icmp.echo_ratio = echo_ratio;

    verbose.result(
        event_size,
        &format!(
            "\ticmp ({}, {}, {}, {}, {:.3})",
            max_subnet_run, max_run, max_dip_count, total_dip_count, echo_ratio
        ),
    );
}

pub fn calculate_scan_probability(metrics: &mut EventMetrics) {
    let icmp = metrics.icmp();
    let y = BETA0
        + BETA1 * f64::from(icmp.max_class_c_subnet_run_length)
        + BETA5 * f64::from(icmp.max_class_c_dip_run_length)
        + BETA6 * f64::from(icmp.max_class_c_dip_count)
        + BETA11 * f64::from(icmp.total_dip_count)
        + BETA22 * icmp.echo_ratio;

    metrics.scan_probability = logistic(y);
    if metrics.scan_probability > 0.5 {
        metrics.event_class = EventClass::Scan;
    }
}
